//! Loading and saving calibrated cameras.
//!
//! Three sources are supported:
//! * the Kalibr-like `cam0` YAML layout (one camera per file),
//! * the multi-camera panoptic studio calibration JSON,
//! * a generic JSON map `name -> CameraRecord` used for paired color/depth rigs.

use crate::camera::{Camera, CameraError, RadTan, Resolution};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use yaml_rust::{Yaml, YamlLoader};

fn yaml_floats(node: &Yaml, name: &str, expected: usize) -> Result<Vec<f64>, CameraError> {
    let values = node.as_vec().ok_or_else(|| {
        CameraError::InvalidParams(format!("YAML missing '{name}' or not an array"))
    })?;
    if values.len() != expected {
        return Err(CameraError::InvalidParams(format!(
            "Expected {expected} values for '{name}', found {}",
            values.len()
        )));
    }
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            // yaml-rust keeps integers apart from reals
            value
                .as_f64()
                .or_else(|| value.as_i64().map(|v| v as f64))
                .ok_or_else(|| {
                    CameraError::InvalidParams(format!("Invalid '{name}' value at index {i}"))
                })
        })
        .collect()
}

impl Camera {
    /// Loads a camera from a YAML file.
    ///
    /// Expected layout:
    ///
    /// ```yaml
    /// cam0:
    ///   camera_model: pinhole_radtan
    ///   intrinsics: [fx, fy, cx, cy]
    ///   distortion: [k1, k2, p1, p2, k3]   # optional
    ///   resolution: [width, height]
    ///   rotation: [r00, r01, r02, r10, r11, r12, r20, r21, r22]   # optional, world->camera
    ///   position: [x, y, z]                                       # optional, optical center
    /// ```
    ///
    /// # Errors
    ///
    /// * [`CameraError::IOError`] if the file cannot be read.
    /// * [`CameraError::YamlError`] if the content is not valid YAML.
    /// * [`CameraError::InvalidParams`] for missing or malformed fields.
    /// * Validation errors from [`Camera::new`].
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraError::InvalidParams("Empty YAML document".to_string()))?;
        let cam = &doc["cam0"];

        let intrinsics = yaml_floats(&cam["intrinsics"], "intrinsics", 4)?;
        let resolution = yaml_floats(&cam["resolution"], "resolution", 2)?;

        let distortion = if cam["distortion"].is_badvalue() {
            None
        } else {
            let values = cam["distortion"].as_vec().ok_or_else(|| {
                CameraError::InvalidParams("'distortion' is not an array".to_string())
            })?;
            let count = values.len();
            RadTan::from_slice(&yaml_floats(&cam["distortion"], "distortion", count)?)?
        };

        let rotation = if cam["rotation"].is_badvalue() {
            Matrix3::identity()
        } else {
            Matrix3::from_row_slice(&yaml_floats(&cam["rotation"], "rotation", 9)?)
        };
        let position = if cam["position"].is_badvalue() {
            Vector3::zeros()
        } else {
            Vector3::from_row_slice(&yaml_floats(&cam["position"], "position", 3)?)
        };

        let intrinsic_matrix = Matrix3::new(
            intrinsics[0],
            0.0,
            intrinsics[2],
            0.0,
            intrinsics[1],
            intrinsics[3],
            0.0,
            0.0,
            1.0,
        );

        Camera::new(
            rotation,
            position,
            intrinsic_matrix,
            distortion,
            Resolution {
                width: resolution[0] as u32,
                height: resolution[1] as u32,
            },
        )
    }

    /// Saves the camera in the layout read by [`Camera::load_from_yaml`].
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CameraError> {
        let to_yaml = |value: Result<serde_yaml::Value, serde_yaml::Error>| {
            value.map_err(|e| CameraError::YamlError(e.to_string()))
        };
        let intrinsics = self.intrinsics();
        let rotation: Vec<f64> = self.rotation().transpose().iter().copied().collect();
        let distortion = self
            .distortion()
            .map(|model| model.coefficients.to_vec())
            .unwrap_or_default();

        let cam0 = serde_yaml::Mapping::from_iter([
            (
                serde_yaml::Value::String("camera_model".to_string()),
                serde_yaml::Value::String("pinhole_radtan".to_string()),
            ),
            (
                serde_yaml::Value::String("intrinsics".to_string()),
                to_yaml(serde_yaml::to_value(vec![
                    intrinsics.fx,
                    intrinsics.fy,
                    intrinsics.cx,
                    intrinsics.cy,
                ]))?,
            ),
            (
                serde_yaml::Value::String("distortion".to_string()),
                to_yaml(serde_yaml::to_value(distortion))?,
            ),
            (
                serde_yaml::Value::String("resolution".to_string()),
                to_yaml(serde_yaml::to_value(vec![
                    self.resolution().width,
                    self.resolution().height,
                ]))?,
            ),
            (
                serde_yaml::Value::String("rotation".to_string()),
                to_yaml(serde_yaml::to_value(rotation))?,
            ),
            (
                serde_yaml::Value::String("position".to_string()),
                to_yaml(serde_yaml::to_value(
                    self.position().iter().copied().collect::<Vec<f64>>(),
                ))?,
            ),
        ]);
        let yaml = serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::Value::Mapping(cam0),
        )]);

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CameraError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }
}

/// A 3-vector stored either flat (`[x, y, z]`) or as a column (`[[x], [y], [z]]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum VectorRepr {
    Flat([f64; 3]),
    Column([[f64; 1]; 3]),
}

impl VectorRepr {
    fn to_vector(&self) -> Vector3<f64> {
        match self {
            VectorRepr::Flat(v) => Vector3::new(v[0], v[1], v[2]),
            VectorRepr::Column(v) => Vector3::new(v[0][0], v[1][0], v[2][0]),
        }
    }
}

fn matrix_from_rows(rows: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| rows[r][c])
}

#[derive(Debug, Deserialize)]
struct PanopticCalibration {
    cameras: Vec<PanopticCamera>,
}

#[derive(Debug, Deserialize)]
struct PanopticCamera {
    name: String,
    panel: u32,
    #[serde(default)]
    resolution: Option<[u32; 2]>,
    #[serde(rename = "K")]
    intrinsic_matrix: [[f64; 3]; 3],
    #[serde(rename = "distCoef", default)]
    distortion: Vec<f64>,
    #[serde(rename = "R")]
    rotation: [[f64; 3]; 3],
    t: VectorRepr,
}

/// Loads the HD cameras (panel 0) named in `names` from a panoptic studio
/// calibration file. The file stores `x_cam = R x_world + t`; positions
/// are recovered as `-Rᵀ t`. Cameras without a resolution entry default to
/// 1920×1080.
pub fn load_panoptic_cameras<P: AsRef<Path>>(
    path: P,
    names: &[String],
) -> Result<HashMap<String, Camera>, CameraError> {
    let contents = fs::read_to_string(path)?;
    let calibration: PanopticCalibration = serde_json::from_str(&contents)?;

    let mut cameras = HashMap::new();
    for entry in calibration.cameras {
        if entry.panel != 0 || !names.contains(&entry.name) {
            continue;
        }
        let [width, height] = entry.resolution.unwrap_or([1920, 1080]);
        let camera = Camera::from_extrinsics(
            matrix_from_rows(&entry.rotation),
            entry.t.to_vector(),
            matrix_from_rows(&entry.intrinsic_matrix),
            RadTan::from_slice(&entry.distortion)?,
            Resolution { width, height },
        )?;
        log::debug!("Loaded camera {} from panoptic calibration", entry.name);
        cameras.insert(entry.name, camera);
    }
    Ok(cameras)
}

/// Calibration record of one camera in a generic camera map.
///
/// Exactly one of `position` (optical center) or `translation`
/// (`x_cam = R x_world + t`) is expected; `position` wins when both exist.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraRecord {
    pub rotation: [[f64; 3]; 3],
    #[serde(default)]
    pub position: Option<[f64; 3]>,
    #[serde(default)]
    pub translation: Option<[f64; 3]>,
    pub intrinsic_matrix: [[f64; 3]; 3],
    #[serde(default)]
    pub distortion: Vec<f64>,
    pub resolution: [u32; 2],
}

impl CameraRecord {
    pub fn to_camera(&self) -> Result<Camera, CameraError> {
        let rotation = matrix_from_rows(&self.rotation);
        let intrinsic_matrix = matrix_from_rows(&self.intrinsic_matrix);
        let distortion = RadTan::from_slice(&self.distortion)?;
        let resolution = Resolution {
            width: self.resolution[0],
            height: self.resolution[1],
        };
        match (self.position, self.translation) {
            (Some(p), _) => Camera::new(
                rotation,
                Vector3::from(p),
                intrinsic_matrix,
                distortion,
                resolution,
            ),
            (None, Some(t)) => Camera::from_extrinsics(
                rotation,
                Vector3::from(t),
                intrinsic_matrix,
                distortion,
                resolution,
            ),
            (None, None) => Err(CameraError::InvalidParams(
                "Camera record needs a position or a translation".to_string(),
            )),
        }
    }
}

/// Loads a JSON object mapping camera names to [`CameraRecord`]s.
pub fn load_camera_map<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Camera>, CameraError> {
    let contents = fs::read_to_string(path)?;
    let records: HashMap<String, CameraRecord> = serde_json::from_str(&contents)?;
    records
        .into_iter()
        .map(|(name, record)| Ok((name, record.to_camera()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_camera;
    use approx::assert_relative_eq;

    #[test]
    fn test_load_from_yaml() {
        let camera = Camera::load_from_yaml("samples/pinhole_radtan.yaml").unwrap();
        let intrinsics = camera.intrinsics();

        assert_eq!(intrinsics.fx, 461.629);
        assert_eq!(intrinsics.fy, 460.152);
        assert_eq!(intrinsics.cx, 362.68);
        assert_eq!(intrinsics.cy, 246.049);
        assert_eq!(camera.resolution().width, 752);
        assert_eq!(camera.resolution().height, 480);

        let distortion = camera.distortion().unwrap();
        assert_eq!(distortion.coefficients[0], -0.28340811);
        assert_eq!(distortion.coefficients[4], 0.0);
        assert_eq!(*camera.rotation(), Matrix3::identity());
    }

    #[test]
    fn test_save_to_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("camera_saved.yaml");
        let output_path = output_path.to_str().unwrap();

        let camera = test_camera();
        camera.save_to_yaml(output_path).unwrap();
        let saved = Camera::load_from_yaml(output_path).unwrap();

        assert_relative_eq!(*saved.rotation(), *camera.rotation(), epsilon = 1e-12);
        assert_relative_eq!(*saved.position(), *camera.position(), epsilon = 1e-12);
        assert_eq!(saved.intrinsics(), camera.intrinsics());
        assert_eq!(saved.distortion(), camera.distortion());
        assert_eq!(saved.resolution(), camera.resolution());
    }

    #[test]
    fn test_load_panoptic_cameras() {
        let names = vec!["00_00".to_string(), "00_03".to_string()];
        let cameras = load_panoptic_cameras("samples/panoptic_calibration.json", &names).unwrap();

        // "00_07" is not requested and "01_01" is a VGA panel camera
        assert_eq!(cameras.len(), 2);

        let camera = &cameras["00_00"];
        assert_eq!(camera.resolution().width, 1920);
        // t = -R * position
        let translation = -(camera.rotation() * camera.position());
        assert_relative_eq!(translation, Vector3::new(-20.0, 110.0, 280.0), epsilon = 1e-9);
        assert!(camera.distortion().is_some());
        assert!(cameras["00_03"].distortion().is_none());
    }

    #[test]
    fn test_load_camera_map() {
        let cameras = load_camera_map("samples/depth_cameras.json").unwrap();
        assert_eq!(cameras.len(), 2);
        let depth = &cameras["depth"];
        assert_eq!(depth.resolution(), Resolution { width: 512, height: 424 });
        assert_relative_eq!(*depth.position(), Vector3::new(5.2, 0.0, 0.0));
    }
}

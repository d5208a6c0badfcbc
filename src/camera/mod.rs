//! Pinhole camera with extrinsics, intrinsics and optional radial-tangential
//! distortion.
//!
//! A [`Camera`] is a value: every edit (`shift_to_center`, `scale_output`,
//! `zoom`, `turn_towards`, `undistort`, `square_pixels`, `horizontal_flip`,
//! `center_principal_point`) returns a new camera and leaves the source
//! untouched, so a single calibrated camera can feed many derived samples.
//!
//! Coordinate frames:
//! * world: calibration frame of the capture rig,
//! * camera: `R * (p - position)`, z pointing along the optical axis,
//! * image: pixels, `(0, 0)` at the center of the top-left pixel.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod calibration;
pub mod distortion;
pub mod remap;

pub use calibration::{load_camera_map, load_panoptic_cameras};
pub use distortion::RadTan;
pub use remap::{reproject_image, Image, PixelSample};

/// Depth along the optical axis used when a pixel is lifted to a 3D point
/// only to be re-projected by a camera sharing the same optical center.
pub const CALIBRATION_DEPTH: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn square(side: u32) -> Self {
        Resolution {
            width: side,
            height: side,
        }
    }

    fn scaled(&self, factor: f64) -> Self {
        Resolution {
            width: (self.width as f64 * factor).round() as u32,
            height: (self.height as f64 * factor).round() as u32,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("Point is behind the camera or at the camera center")]
    PointBehindCamera,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Rotation matrix is not orthonormal")]
    RotationNotOrthonormal,
    #[error("Cameras do not share the same optical center")]
    OpticalCenterMismatch,
    #[error("Viewing direction is parallel to the camera's vertical axis")]
    DegenerateDirection,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("Failed to parse JSON: {0}")]
    JsonError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        CameraError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for CameraError {
    fn from(err: serde_json::Error) -> Self {
        CameraError::JsonError(err.to_string())
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraError> {
        if intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(CameraError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    /// Accepts proper rotations as well as the reflections produced by
    /// [`Camera::horizontal_flip`].
    pub fn validate_rotation(rotation: &Matrix3<f64>) -> Result<(), CameraError> {
        let residual = rotation.transpose() * rotation - Matrix3::identity();
        if residual.norm() > 1e-4 {
            return Err(CameraError::RotationNotOrthonormal);
        }
        Ok(())
    }
}

/// A calibrated pinhole camera.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{Matrix3, Vector3};
/// use depth_pose_tools::camera::{Camera, Resolution};
///
/// let intrinsic = Matrix3::new(1000.0, 0.0, 960.0, 0.0, 1000.0, 540.0, 0.0, 0.0, 1.0);
/// let camera = Camera::new(
///     Matrix3::identity(),
///     Vector3::zeros(),
///     intrinsic,
///     None,
///     Resolution { width: 1920, height: 1080 },
/// )
/// .unwrap();
///
/// let pixel = camera.world_to_image(&Vector3::new(0.1, 0.2, 2.0)).unwrap();
/// assert!((pixel.x - 1010.0).abs() < 1e-9);
/// assert!((pixel.y - 640.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    rotation: Matrix3<f64>,
    position: Vector3<f64>,
    intrinsic_matrix: Matrix3<f64>,
    distortion: Option<RadTan>,
    resolution: Resolution,
}

impl Camera {
    /// Creates a camera from its world→camera rotation, its optical center in
    /// world coordinates, the intrinsic matrix and optional distortion.
    ///
    /// # Errors
    ///
    /// * [`CameraError::FocalLengthMustBePositive`]
    /// * [`CameraError::PrincipalPointMustBeFinite`]
    /// * [`CameraError::RotationNotOrthonormal`]
    pub fn new(
        rotation: Matrix3<f64>,
        position: Vector3<f64>,
        intrinsic_matrix: Matrix3<f64>,
        distortion: Option<RadTan>,
        resolution: Resolution,
    ) -> Result<Self, CameraError> {
        let camera = Camera {
            rotation,
            position,
            intrinsic_matrix,
            distortion,
            resolution,
        };
        camera.validate_params()?;
        Ok(camera)
    }

    /// Creates a camera from the `x_cam = R * x_world + t` convention used by
    /// most calibration files; the optical center is `-Rᵀ t`.
    pub fn from_extrinsics(
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        intrinsic_matrix: Matrix3<f64>,
        distortion: Option<RadTan>,
        resolution: Resolution,
    ) -> Result<Self, CameraError> {
        let position = -(rotation.transpose() * translation);
        Camera::new(rotation, position, intrinsic_matrix, distortion, resolution)
    }

    pub fn validate_params(&self) -> Result<(), CameraError> {
        validation::validate_intrinsics(&self.intrinsics())?;
        validation::validate_rotation(&self.rotation)?;
        Ok(())
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    pub fn intrinsic_matrix(&self) -> &Matrix3<f64> {
        &self.intrinsic_matrix
    }

    pub fn distortion(&self) -> Option<&RadTan> {
        self.distortion.as_ref()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics {
            fx: self.intrinsic_matrix[(0, 0)],
            fy: self.intrinsic_matrix[(1, 1)],
            cx: self.intrinsic_matrix[(0, 2)],
            cy: self.intrinsic_matrix[(1, 2)],
        }
    }

    /// `R * (p - position)`
    pub fn world_to_camera(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * (point - self.position)
    }

    pub fn camera_to_world(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transpose() * point + self.position
    }

    /// Projects a camera-space point to pixels, applying distortion when present.
    ///
    /// # Errors
    ///
    /// * [`CameraError::PointBehindCamera`] if `z` is not positive.
    pub fn camera_to_image(&self, point: &Vector3<f64>) -> Result<Vector2<f64>, CameraError> {
        if point.z < f64::EPSILON.sqrt() {
            return Err(CameraError::PointBehindCamera);
        }
        let normalized = Vector2::new(point.x / point.z, point.y / point.z);
        let normalized = match &self.distortion {
            Some(model) => model.distort(&normalized),
            None => normalized,
        };
        Ok(self.normalized_to_pixel(&normalized))
    }

    pub fn world_to_image(&self, point: &Vector3<f64>) -> Result<Vector2<f64>, CameraError> {
        self.camera_to_image(&self.world_to_camera(point))
    }

    /// Lifts a pixel to the camera-space point at the given depth along the
    /// optical axis, removing distortion first.
    pub fn image_to_camera(
        &self,
        pixel: &Vector2<f64>,
        depth: f64,
    ) -> Result<Vector3<f64>, CameraError> {
        let normalized = self.pixel_to_normalized(pixel);
        let normalized = match &self.distortion {
            Some(model) => model.undistort(&normalized)?,
            None => normalized,
        };
        Ok(Vector3::new(normalized.x, normalized.y, 1.0) * depth)
    }

    pub fn image_to_world(
        &self,
        pixel: &Vector2<f64>,
        depth: f64,
    ) -> Result<Vector3<f64>, CameraError> {
        Ok(self.camera_to_world(&self.image_to_camera(pixel, depth)?))
    }

    fn normalized_to_pixel(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        let k = &self.intrinsic_matrix;
        Vector2::new(
            k[(0, 0)] * normalized.x + k[(0, 1)] * normalized.y + k[(0, 2)],
            k[(1, 1)] * normalized.y + k[(1, 2)],
        )
    }

    fn pixel_to_normalized(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let k = &self.intrinsic_matrix;
        let y = (pixel.y - k[(1, 2)]) / k[(1, 1)];
        let x = (pixel.x - k[(0, 2)] - k[(0, 1)] * y) / k[(0, 0)];
        Vector2::new(x, y)
    }

    /// Moves the principal point so that `center` lands in the middle of an
    /// output image of size `extent` (width, height). The output resolution
    /// becomes `extent`.
    pub fn shift_to_center(&self, center: &Vector2<f64>, extent: (f64, f64)) -> Camera {
        let mut camera = self.clone();
        camera.intrinsic_matrix[(0, 2)] += extent.0 / 2.0 - center.x;
        camera.intrinsic_matrix[(1, 2)] += extent.1 / 2.0 - center.y;
        camera.resolution = Resolution {
            width: extent.0.round() as u32,
            height: extent.1.round() as u32,
        };
        camera
    }

    /// Scales the output image: focal lengths and principal point are
    /// multiplied by `factor`.
    pub fn scale_output(&self, factor: f64) -> Camera {
        let mut camera = self.clone();
        for row in 0..2 {
            for col in 0..3 {
                camera.intrinsic_matrix[(row, col)] *= factor;
            }
        }
        camera.resolution = self.resolution.scaled(factor);
        camera
    }

    /// Multiplies the focal lengths (and skew) by `factor`, keeping the
    /// principal point.
    pub fn zoom(&self, factor: f64) -> Camera {
        let mut camera = self.clone();
        for row in 0..2 {
            for col in 0..2 {
                camera.intrinsic_matrix[(row, col)] *= factor;
            }
        }
        camera
    }

    /// Rotates the camera about its optical center so that the optical axis
    /// passes through the given pixel. The image-down axis of the current
    /// camera is kept as the reference for the new roll.
    ///
    /// # Errors
    ///
    /// * [`CameraError::DegenerateDirection`] if the target ray is parallel
    ///   to the current vertical axis.
    pub fn turn_towards(&self, target: &Vector2<f64>) -> Result<Camera, CameraError> {
        let ray = self.image_to_camera(target, CALIBRATION_DEPTH)?;
        let forward = (self.rotation.transpose() * ray).normalize();
        let down = self.rotation.row(1).transpose();

        let side = down.cross(&forward);
        if side.norm() < 1e-9 {
            return Err(CameraError::DegenerateDirection);
        }
        let new_x = side.normalize();
        let new_y = forward.cross(&new_x);

        let mut camera = self.clone();
        camera.rotation = Matrix3::from_rows(&[
            new_x.transpose(),
            new_y.transpose(),
            forward.transpose(),
        ]);
        Ok(camera)
    }

    /// Drops the distortion model. The caller warps the image accordingly
    /// (see [`reproject_image`]).
    pub fn undistort(&self) -> Camera {
        let mut camera = self.clone();
        camera.distortion = None;
        camera
    }

    /// Equalizes the focal lengths to their mean and removes skew.
    pub fn square_pixels(&self) -> Camera {
        let mut camera = self.clone();
        let focal = 0.5 * (self.intrinsic_matrix[(0, 0)] + self.intrinsic_matrix[(1, 1)]);
        camera.intrinsic_matrix[(0, 0)] = focal;
        camera.intrinsic_matrix[(1, 1)] = focal;
        camera.intrinsic_matrix[(0, 1)] = 0.0;
        camera
    }

    /// Mirrors the camera about the vertical image axis.
    ///
    /// The camera x-axis is negated and the principal point is reflected so
    /// that pixel `(x, y)` of the original image maps to `(width - 1 - x, y)`.
    /// Skew and the tangential `p2` coefficient change sign with the axis.
    /// Applying the flip twice yields the original camera.
    pub fn horizontal_flip(&self) -> Camera {
        let mut camera = self.clone();
        let flipped = -self.rotation.row(0).clone_owned();
        camera.rotation.set_row(0, &flipped);
        camera.intrinsic_matrix[(0, 1)] = -self.intrinsic_matrix[(0, 1)];
        camera.intrinsic_matrix[(0, 2)] =
            (self.resolution.width as f64 - 1.0) - self.intrinsic_matrix[(0, 2)];
        camera.distortion = self.distortion.as_ref().map(RadTan::mirrored);
        camera
    }

    /// Places the principal point at the middle of an image of `size`.
    pub fn center_principal_point(&self, size: Resolution) -> Camera {
        let mut camera = self.clone();
        camera.intrinsic_matrix[(0, 2)] = (size.width as f64 - 1.0) / 2.0;
        camera.intrinsic_matrix[(1, 2)] = (size.height as f64 - 1.0) / 2.0;
        camera.resolution = size;
        camera
    }

    pub fn shares_optical_center(&self, other: &Camera) -> bool {
        let scale = self.position.norm().max(other.position.norm()).max(1.0);
        (self.position - other.position).norm() <= 1e-9 * scale
    }

    /// Rotation that maps camera-space coordinates of `derived` back into the
    /// camera frame of `original`: `R_original * R_derivedᵀ`.
    pub fn back_rotation(original: &Camera, derived: &Camera) -> Matrix3<f64> {
        original.rotation * derived.rotation.transpose()
    }
}

/// Re-expresses pixel coordinates observed by `source` in the image of
/// `destination`, through a world round trip at [`CALIBRATION_DEPTH`].
///
/// # Errors
///
/// * [`CameraError::OpticalCenterMismatch`] when the cameras do not share an
///   optical center (the round trip would depend on scene depth).
/// * [`CameraError::PointBehindCamera`] when a point leaves the destination
///   camera's front half-space.
pub fn reproject_points(
    points: &[Vector2<f64>],
    source: &Camera,
    destination: &Camera,
) -> Result<Vec<Vector2<f64>>, CameraError> {
    if !source.shares_optical_center(destination) {
        return Err(CameraError::OpticalCenterMismatch);
    }
    points
        .iter()
        .map(|point| {
            let world = source.image_to_world(point, CALIBRATION_DEPTH)?;
            destination.world_to_image(&world)
        })
        .collect()
}

//! On-the-fly network inputs.
//!
//! A stored sample is re-rendered by a virtual camera that looks straight
//! at the person and frames the longer box side across `side_in` pixels.
//! Training adds a random zoom, a horizontal flip, color jitter and
//! occluders; targets are returned in the frame of the virtual color
//! camera.

use crate::camera::{reproject_image, Camera, CameraError, Image, Resolution, CALIBRATION_DEPTH};
use crate::dataset::augment::{enhance_depth, range_to_depth, ColorJitter, Occluders};
use crate::dataset::DatasetError;
use crate::geometry::BoundingBox;
use crate::sample::{DepthSample, JointInfo, Phase, PoseSample};
use crate::training::PipelineConfig;
use image::{Luma, RgbImage};
use nalgebra::{Matrix3, Vector2, Vector3};
use ndarray::Array2;
use rand::Rng;
use std::path::Path;

pub type DepthImage = Image<Luma<u16>>;

/// Random view changes drawn once per sample. `flip` and `zoom` are
/// shared by the color and depth renderings; the photometric changes touch
/// the color input only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewAugment {
    pub flip: bool,
    pub zoom: f64,
    pub color: Option<ColorJitter>,
    pub occlude: bool,
}

impl ViewAugment {
    pub fn identity() -> Self {
        ViewAugment {
            flip: false,
            zoom: 1.0,
            color: None,
            occlude: false,
        }
    }
}

/// One network input with its targets.
#[derive(Debug, Clone)]
pub struct ViewSample {
    pub color: RgbImage,
    /// Encoded depth input `(side_in, side_in)`, see [`enhance_depth`].
    pub depth: Option<Array2<f32>>,
    /// Joints in the virtual color camera frame.
    pub camera_coords: Vec<Vector3<f64>>,
    pub valid: Vec<bool>,
    /// Maps virtual-camera coordinates back into the stored camera frame.
    /// Only produced outside training.
    pub back_rotation: Option<Matrix3<f64>>,
    pub camera: Camera,
}

#[derive(Debug, Clone)]
pub struct ViewSynthesizer {
    side_in: u32,
    random_zoom: f64,
    geometry: bool,
    flip: bool,
    colour: bool,
    to_depth: bool,
    nexponent: bool,
    occluders: Option<Occluders>,
    at_test: bool,
    mirror: Vec<usize>,
}

impl ViewSynthesizer {
    pub fn new(config: &PipelineConfig, phase: Phase, joint_info: &JointInfo) -> Self {
        ViewSynthesizer {
            side_in: config.side_in,
            random_zoom: config.random_zoom,
            geometry: config.geometry,
            flip: config.flip,
            colour: config.colour,
            to_depth: config.to_depth,
            nexponent: config.nexponent,
            occluders: None,
            at_test: !phase.is_train(),
            mirror: joint_info.mirror().to_vec(),
        }
    }

    /// Like [`ViewSynthesizer::new`], loading the occluders from
    /// `config.occ_path` when training with `config.occluder`.
    pub fn load(
        config: &PipelineConfig,
        phase: Phase,
        joint_info: &JointInfo,
    ) -> Result<Self, DatasetError> {
        let synth = ViewSynthesizer::new(config, phase, joint_info);
        if config.occluder && phase.is_train() {
            return Ok(synth.with_occluders(Occluders::load(&config.occ_path)?));
        }
        Ok(synth)
    }

    pub fn with_occluders(mut self, occluders: Occluders) -> Self {
        self.occluders = Some(occluders);
        self
    }

    pub fn side_in(&self) -> u32 {
        self.side_in
    }

    pub fn draw_augment<R: Rng + ?Sized>(&self, rng: &mut R) -> ViewAugment {
        if self.at_test {
            return ViewAugment::identity();
        }
        let flip = self.flip && rng.random_bool(0.5);
        let zoom = if self.geometry && self.random_zoom < 1.0 {
            rng.random_range(self.random_zoom..=1.0 / self.random_zoom)
        } else {
            1.0
        };
        let color = self.colour.then(|| ColorJitter::draw(rng));
        let occlude =
            self.occluders.as_ref().is_some_and(|o| !o.is_empty()) && rng.random_bool(0.5);
        ViewAugment {
            flip,
            zoom,
            color,
            occlude,
        }
    }

    /// Virtual camera for a person seen by `camera` inside `bbox`.
    ///
    /// The camera turns towards the box center, drops distortion, squares
    /// its pixels and zooms until the longer box side spans `side_in`
    /// pixels around the centered principal point.
    pub fn view_camera(
        &self,
        camera: &Camera,
        bbox: &BoundingBox,
        augment: ViewAugment,
    ) -> Result<Camera, CameraError> {
        let center = bbox.center();
        let half = if bbox.w < bbox.h {
            Vector2::new(0.0, bbox.h / 2.0)
        } else {
            Vector2::new(bbox.w / 2.0, 0.0)
        };
        let far_side = [center - half, center + half];

        let turned = camera.turn_towards(&center)?.undistort().square_pixels();

        let mut ends = Vec::with_capacity(2);
        for point in &far_side {
            let world = camera.image_to_world(point, CALIBRATION_DEPTH)?;
            ends.push(turned.world_to_image(&world)?);
        }
        let far_dist = (ends[0] - ends[1]).norm();
        if far_dist <= f64::EPSILON {
            return Err(CameraError::InvalidParams(
                "Bounding box has no extent".to_string(),
            ));
        }

        let mut view = turned
            .zoom(self.side_in as f64 / far_dist)
            .center_principal_point(Resolution::square(self.side_in));
        if !self.at_test && self.geometry {
            view = view.zoom(augment.zoom);
        }
        if augment.flip {
            view = view.horizontal_flip();
        }
        Ok(view)
    }

    /// Joint targets in the frame of `view`; a flipped view swaps the
    /// left and right joints.
    pub fn targets(
        &self,
        view: &Camera,
        skeleton: &[Vector3<f64>],
        valid: &[bool],
        flip: bool,
    ) -> Result<(Vec<Vector3<f64>>, Vec<bool>), DatasetError> {
        if skeleton.len() != self.mirror.len() || valid.len() != self.mirror.len() {
            return Err(DatasetError::Format(format!(
                "Expected {} joints, found {} coordinates and {} flags",
                self.mirror.len(),
                skeleton.len(),
                valid.len()
            )));
        }
        let coords: Vec<Vector3<f64>> = skeleton.iter().map(|p| view.world_to_camera(p)).collect();
        if flip {
            Ok((
                self.mirror.iter().map(|&m| coords[m]).collect(),
                self.mirror.iter().map(|&m| valid[m]).collect(),
            ))
        } else {
            Ok((coords, valid.to_vec()))
        }
    }

    fn back_rotation(&self, stored: &Camera, view: &Camera) -> Option<Matrix3<f64>> {
        self.at_test.then(|| Camera::back_rotation(stored, view))
    }

    fn render_color<R: Rng + ?Sized>(
        &self,
        path: &Path,
        camera: &Camera,
        view: &Camera,
        augment: &ViewAugment,
        rng: &mut R,
    ) -> Result<RgbImage, DatasetError> {
        let image = image::open(path)?.to_rgb8();
        let mut image = reproject_image(&image, camera, view, Resolution::square(self.side_in))?;
        if let Some(jitter) = &augment.color {
            jitter.apply(&mut image);
        }
        if let (true, Some(occluders)) = (augment.occlude, &self.occluders) {
            occluders.paste(&mut image, rng);
        }
        Ok(image)
    }

    fn render_depth(
        &self,
        path: &Path,
        camera: &Camera,
        bbox: &BoundingBox,
        augment: ViewAugment,
    ) -> Result<Array2<f32>, DatasetError> {
        let view = self.view_camera(camera, bbox, augment)?;
        let frame = image::open(path)?.to_luma16();
        let mut depth = reproject_image(&frame, camera, &view, Resolution::square(self.side_in))?;
        if self.to_depth {
            depth = range_to_depth(&depth, &view)?;
        }
        Ok(enhance_depth(&depth, self.nexponent))
    }

    /// Builds the input of a color/depth sample. The depth input is
    /// rendered when the sample has a stored depth frame and
    /// `depth_camera` (the camera that captured it) is given.
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        sample: &DepthSample,
        depth_camera: Option<&Camera>,
        rng: &mut R,
    ) -> Result<ViewSample, DatasetError> {
        let augment = self.draw_augment(rng);

        let view = self.view_camera(&sample.camera, &sample.bbox, augment)?;
        let color =
            self.render_color(&sample.image_path, &sample.camera, &view, &augment, rng)?;

        let depth = match (&sample.depth_path, depth_camera) {
            (Some(path), Some(camera)) => {
                Some(self.render_depth(path, camera, &sample.depth_bbox, augment)?)
            }
            _ => None,
        };

        let (camera_coords, valid) =
            self.targets(&view, &sample.skeleton, &sample.valid, augment.flip)?;

        Ok(ViewSample {
            color,
            depth,
            camera_coords,
            valid,
            back_rotation: self.back_rotation(&sample.camera, &view),
            camera: view,
        })
    }

    /// Builds the input of a color-only sample. Joints with zero keypoint
    /// confidence are marked invalid.
    pub fn synthesize_color<R: Rng + ?Sized>(
        &self,
        sample: &PoseSample,
        rng: &mut R,
    ) -> Result<ViewSample, DatasetError> {
        let augment = self.draw_augment(rng);
        let view = self.view_camera(&sample.camera, &sample.bbox, augment)?;
        let color =
            self.render_color(&sample.image_path, &sample.camera, &view, &augment, rng)?;

        let valid: Vec<bool> = sample.image_coords.iter().map(|c| c.z > 0.0).collect();
        let (camera_coords, valid) =
            self.targets(&view, &sample.world_pose, &valid, augment.flip)?;

        Ok(ViewSample {
            color,
            depth: None,
            camera_coords,
            valid,
            back_rotation: self.back_rotation(&sample.camera, &view),
            camera: view,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{simple_camera, test_camera};
    use approx::assert_relative_eq;
    use image::Rgb;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;

    fn synthesizer(phase: Phase, geometry: bool, flip: bool) -> ViewSynthesizer {
        let config = PipelineConfig {
            side_in: 65,
            geometry,
            flip,
            ..PipelineConfig::default()
        };
        ViewSynthesizer::new(&config, phase, &JointInfo::cmu_panoptic().unwrap())
    }

    fn skeleton() -> Vec<Vector3<f64>> {
        (0..19)
            .map(|j| Vector3::new(j as f64 * 3.0 - 20.0, (j % 4) as f64 * 10.0 - 120.0, 40.0))
            .collect()
    }

    #[test]
    fn test_box_center_lands_in_the_middle() {
        let camera = test_camera();
        let bbox = BoundingBox::new(700.0, 300.0, 200.0, 400.0);
        let synth = synthesizer(Phase::Valid, false, false);
        let view = synth
            .view_camera(&camera, &bbox, ViewAugment::identity())
            .unwrap();

        assert_eq!(view.resolution(), Resolution::square(65));
        assert!(view.distortion().is_none());

        let world = camera
            .image_to_world(&bbox.center(), CALIBRATION_DEPTH)
            .unwrap();
        let pixel = view.world_to_image(&world).unwrap();
        assert_relative_eq!(pixel.x, 32.0, epsilon = 1e-6);
        assert_relative_eq!(pixel.y, 32.0, epsilon = 1e-6);

        // the box height spans the whole input
        let ends: Vec<Vector2<f64>> = [bbox.y, bbox.y + bbox.h]
            .iter()
            .map(|&y| {
                let world = camera
                    .image_to_world(&Vector2::new(bbox.center().x, y), CALIBRATION_DEPTH)
                    .unwrap();
                view.world_to_image(&world).unwrap()
            })
            .collect();
        assert_relative_eq!((ends[0] - ends[1]).norm(), 65.0, epsilon = 1e-6);
    }

    #[test]
    fn test_augment_only_when_training() {
        let mut rng = StdRng::seed_from_u64(7);
        let test = synthesizer(Phase::Test, true, true);
        for _ in 0..20 {
            assert_eq!(test.draw_augment(&mut rng), ViewAugment::identity());
        }

        let train = synthesizer(Phase::Train, true, true);
        let draws: Vec<ViewAugment> = (0..200).map(|_| train.draw_augment(&mut rng)).collect();
        assert!(draws.iter().any(|a| a.flip) && draws.iter().any(|a| !a.flip));
        for draw in &draws {
            assert!(draw.zoom >= 0.9 && draw.zoom <= 1.0 / 0.9);
        }
    }

    #[test]
    fn test_flip_mirrors_targets() {
        let camera = test_camera();
        let bbox = BoundingBox::new(700.0, 300.0, 200.0, 400.0);
        let synth = synthesizer(Phase::Train, false, true);
        let joints = JointInfo::cmu_panoptic().unwrap();
        let mut valid = vec![true; 19];
        valid[3] = false;

        let plain = synth
            .view_camera(&camera, &bbox, ViewAugment::identity())
            .unwrap();
        let flipped = synth
            .view_camera(
                &camera,
                &bbox,
                ViewAugment {
                    flip: true,
                    ..ViewAugment::identity()
                },
            )
            .unwrap();

        let (coords, _) = synth.targets(&plain, &skeleton(), &valid, false).unwrap();
        let (mirrored, mirrored_valid) = synth.targets(&flipped, &skeleton(), &valid, true).unwrap();
        for j in 0..19 {
            let m = joints.mirror()[j];
            assert_relative_eq!(mirrored[j].x, -coords[m].x, epsilon = 1e-9);
            assert_relative_eq!(mirrored[j].y, coords[m].y, epsilon = 1e-9);
            assert_relative_eq!(mirrored[j].z, coords[m].z, epsilon = 1e-9);
            assert_eq!(mirrored_valid[j], valid[m]);
        }
        assert!(!mirrored_valid[joints.mirror()[3]]);
    }

    #[test]
    fn test_back_rotation_restores_stored_frame() {
        let dir = tempfile::tempdir().unwrap();
        let camera = simple_camera(320, 240, 300.0);
        let image_path: PathBuf = dir.path().join("crop.png");
        RgbImage::from_pixel(320, 240, Rgb([120, 60, 30]))
            .save(&image_path)
            .unwrap();

        let world_pose = skeleton()
            .iter()
            .map(|p| Vector3::new(p.x * 0.01, (p.y + 100.0) * 0.01, 3.0))
            .collect::<Vec<_>>();
        let sample = DepthSample {
            image_path,
            depth_path: None,
            skeleton: world_pose.clone(),
            valid: vec![true; 19],
            video: "v".to_string(),
            frame: 0,
            bbox: BoundingBox::new(200.0, 40.0, 60.0, 120.0),
            depth_bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            camera: camera.clone(),
        };

        let synth = synthesizer(Phase::Test, false, false);
        let view = synth
            .synthesize(&sample, None, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(view.color.dimensions(), (65, 65));
        assert!(view.depth.is_none());

        let back = view.back_rotation.unwrap();
        for (coord, joint) in view.camera_coords.iter().zip(&world_pose) {
            let restored = back * coord;
            let expected = camera.world_to_camera(joint);
            assert_relative_eq!(restored, expected, epsilon = 1e-9);
        }

        let train = synthesizer(Phase::Train, false, false);
        let view = train
            .synthesize(&sample, None, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert!(view.back_rotation.is_none());
    }

    #[test]
    fn test_depth_view_uses_depth_box() {
        let dir = tempfile::tempdir().unwrap();
        let color = simple_camera(320, 240, 300.0);
        let depth_camera = simple_camera(160, 120, 150.0);
        let color_path = dir.path().join("color.png");
        let depth_path = dir.path().join("depth.png");
        RgbImage::from_pixel(320, 240, Rgb([1, 2, 3]))
            .save(&color_path)
            .unwrap();
        DepthImage::from_pixel(160, 120, Luma([2500u16]))
            .save(&depth_path)
            .unwrap();

        let sample = DepthSample {
            image_path: color_path,
            depth_path: Some(depth_path),
            skeleton: vec![Vector3::new(0.0, 0.0, 3.0); 19],
            valid: vec![true; 19],
            video: "v".to_string(),
            frame: 4,
            bbox: BoundingBox::new(130.0, 60.0, 60.0, 120.0),
            depth_bbox: BoundingBox::new(65.0, 30.0, 30.0, 60.0),
            camera: color,
        };
        let view = synthesizer(Phase::Valid, false, false)
            .synthesize(&sample, Some(&depth_camera), &mut StdRng::seed_from_u64(3))
            .unwrap();

        let depth = view.depth.unwrap();
        assert_eq!(depth.dim(), (65, 65));
        assert_relative_eq!(depth[[32, 32]], 2.5, epsilon = 1e-6);

        // no depth camera, no depth input
        let view = synthesizer(Phase::Valid, false, false)
            .synthesize(&sample, None, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert!(view.depth.is_none());

        let config = PipelineConfig {
            side_in: 65,
            nexponent: true,
            ..PipelineConfig::default()
        };
        let synth = ViewSynthesizer::new(&config, Phase::Valid, &JointInfo::cmu_panoptic().unwrap());
        let depth = synth
            .synthesize(&sample, Some(&depth_camera), &mut StdRng::seed_from_u64(3))
            .unwrap()
            .depth
            .unwrap();
        assert_relative_eq!(depth[[32, 32]], (-2.5f32).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_photometric_augments_are_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let camera = simple_camera(320, 240, 300.0);
        let image_path = dir.path().join("color.png");
        RgbImage::from_fn(320, 240, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
            .save(&image_path)
            .unwrap();
        let sample = DepthSample {
            image_path,
            depth_path: None,
            skeleton: vec![Vector3::new(0.0, 0.0, 3.0); 19],
            valid: vec![true; 19],
            video: "v".to_string(),
            frame: 0,
            bbox: BoundingBox::new(130.0, 60.0, 60.0, 120.0),
            depth_bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            camera,
        };

        let config = PipelineConfig {
            side_in: 65,
            colour: true,
            occluder: true,
            ..PipelineConfig::default()
        };
        let patch = image::RgbaImage::from_pixel(12, 12, image::Rgba([255, 0, 255, 255]));
        let occluders = Occluders::from_patches(vec![patch]);
        let joints = JointInfo::cmu_panoptic().unwrap();
        let train = ViewSynthesizer::new(&config, Phase::Train, &joints).with_occluders(occluders.clone());

        let draws: Vec<ViewAugment> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..100).map(|_| train.draw_augment(&mut rng)).collect()
        };
        assert!(draws.iter().all(|a| a.color.is_some()));
        assert!(draws.iter().any(|a| a.occlude) && draws.iter().any(|a| !a.occlude));

        let a = train.synthesize(&sample, None, &mut StdRng::seed_from_u64(21)).unwrap();
        let b = train.synthesize(&sample, None, &mut StdRng::seed_from_u64(21)).unwrap();
        assert_eq!(a.color, b.color);

        // evaluation inputs stay untouched
        let plain = synthesizer(Phase::Valid, false, false);
        let valid = ViewSynthesizer::new(&config, Phase::Valid, &joints).with_occluders(occluders);
        let expected = plain.synthesize(&sample, None, &mut StdRng::seed_from_u64(4)).unwrap();
        let actual = valid.synthesize(&sample, None, &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(actual.color, expected.color);
    }

    #[test]
    fn test_load_reads_occluders_for_training_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            occluder: true,
            occ_path: dir.path().join("missing"),
            ..PipelineConfig::default()
        };
        let joints = JointInfo::cmu_panoptic().unwrap();
        assert!(matches!(
            ViewSynthesizer::load(&config, Phase::Train, &joints),
            Err(DatasetError::MissingFile(_))
        ));
        assert!(ViewSynthesizer::load(&config, Phase::Test, &joints).is_ok());
    }
}

//! Derivation of cropped samples from full-frame captures.

use crate::camera::{reproject_image, reproject_points, Camera};
use crate::geometry::{transfer_bbox, BoundingBox, SWEEP_ANGLE};
use crate::sample::{DepthSample, ImageCache, PoseSample, SampleError};
use image::{DynamicImage, RgbImage};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Crop sizing shared by the color and depth builders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropParams {
    /// Side of the network input in pixels.
    pub side_in: f64,
    /// Smallest random zoom applied later during training; crops keep
    /// enough resolution to survive it.
    pub random_zoom: f64,
}

/// A full-frame color capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub image_path: PathBuf,
    pub image_coords: Vec<Vector3<f64>>,
    pub bbox: BoundingBox,
    pub world_pose: Vec<Vector3<f64>>,
}

/// One annotated person in a frame of a depth-sensor video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDepthSample {
    pub skeleton: Vec<Vector3<f64>>,
    pub valid: Vec<bool>,
    pub video: String,
    pub frame: usize,
    pub bbox: BoundingBox,
}

struct CropPlan {
    camera: Camera,
    bbox: BoundingBox,
    factor: f64,
}

/// Places a square crop of side `side` on the box center and scales it so
/// that the longer box side fits `side_in / random_zoom`, never upscaling.
///
/// The output side is rounded once, from `side * factor`.
fn plan_crop(
    camera: &Camera,
    bbox: &BoundingBox,
    side: f64,
    params: &CropParams,
) -> Result<CropPlan, SampleError> {
    let factor = (params.side_in / bbox.max_side() / params.random_zoom).min(1.0);
    let scaled_side = side * factor;
    let derived = camera
        .scale_output(factor)
        .shift_to_center(&(bbox.center() * factor), (scaled_side, scaled_side));

    let corner = reproject_points(&[bbox.corner()], camera, &derived)?[0];
    Ok(CropPlan {
        bbox: BoundingBox::new(corner.x, corner.y, bbox.w * factor, bbox.h * factor),
        camera: derived,
        factor,
    })
}

/// Reprojects `(x, y, confidence)` keypoints. A point whose reprojection
/// fails keeps its coordinates and loses its confidence.
fn reproject_coords(coords: &[Vector3<f64>], source: &Camera, destination: &Camera) -> Vec<Vector3<f64>> {
    coords
        .iter()
        .map(|coord| {
            match reproject_points(&[Vector2::new(coord.x, coord.y)], source, destination) {
                Ok(moved) => Vector3::new(moved[0].x, moved[0].y, coord.z),
                Err(e) => {
                    log::debug!("Dropping keypoint ({}, {}): {e}", coord.x, coord.y);
                    Vector3::new(coord.x, coord.y, 0.0)
                }
            }
        })
        .collect()
}

fn is_usable(bbox: &BoundingBox, camera: &Camera) -> bool {
    bbox.w > 0.0 && bbox.h > 0.0 && bbox.within(camera.resolution())
}

/// Builds a cropped color sample.
///
/// The crop side is the box diagonal, so in-plane rotations applied later
/// never clip the person. The crop is rendered into `cache` under
/// `relative_path` unless it already exists there.
///
/// Returns `Ok(None)` when the box is empty or leaves the sensor.
pub fn make_sample(
    raw: &RawSample,
    camera: &Camera,
    params: &CropParams,
    cache: &ImageCache,
    relative_path: &str,
) -> Result<Option<PoseSample>, SampleError> {
    if !is_usable(&raw.bbox, camera) {
        log::debug!("Rejected {}: box outside the sensor", raw.image_path.display());
        return Ok(None);
    }

    let plan = plan_crop(camera, &raw.bbox, raw.bbox.diagonal(), params)?;
    let image_coords = reproject_coords(&raw.image_coords, camera, &plan.camera);

    let new_path = cache.path(relative_path);
    cache.write_once(&new_path, || {
        let image = image::open(&raw.image_path)?.to_rgb8();
        let crop = reproject_image(&image, camera, &plan.camera, plan.camera.resolution())?;
        Ok(DynamicImage::ImageRgb8(crop))
    })?;

    Ok(Some(PoseSample {
        image_path: new_path,
        world_pose: raw.world_pose.clone(),
        image_coords,
        bbox: plan.bbox,
        camera: plan.camera,
    }))
}

/// Mean distance of the valid joints along the optical axis of `camera`.
fn subject_depth(skeleton: &[Vector3<f64>], valid: &[bool], camera: &Camera) -> Option<f64> {
    let depths: Vec<f64> = skeleton
        .iter()
        .zip(valid)
        .filter(|(_, ok)| **ok)
        .map(|(joint, _)| camera.world_to_camera(joint).z)
        .collect();
    if depths.is_empty() {
        return None;
    }
    let mean = depths.iter().sum::<f64>() / depths.len() as f64;
    (mean > 0.0).then_some(mean)
}

/// Builds a cropped sample from a decoded depth-video color frame.
///
/// The crop side is the 30° rotation-swept side of the box, and the box is
/// additionally transferred into `depth_camera`. The crop is stored under
/// `<video>/<frame>.jpg` in `cache`.
///
/// Returns `Ok(None)` when the box is unusable or no valid joint lies in
/// front of the color camera.
pub fn make_depth_sample(
    raw: &RawDepthSample,
    frame_image: &RgbImage,
    color_camera: &Camera,
    depth_camera: &Camera,
    params: &CropParams,
    cache: &ImageCache,
) -> Result<Option<DepthSample>, SampleError> {
    if !is_usable(&raw.bbox, color_camera) {
        return Ok(None);
    }
    let Some(depth) = subject_depth(&raw.skeleton, &raw.valid, color_camera) else {
        log::debug!("Rejected {} frame {}: no valid joint", raw.video, raw.frame);
        return Ok(None);
    };

    let depth_bbox = transfer_bbox(&raw.bbox, color_camera, depth_camera, depth)?;
    let side = raw.bbox.rotation_swept_side(SWEEP_ANGLE);
    let plan = plan_crop(color_camera, &raw.bbox, side, params)?;
    log::trace!(
        "{} frame {}: crop side {:.1} scaled by {:.3}",
        raw.video,
        raw.frame,
        side,
        plan.factor
    );

    let new_path = cache.path(format!("{}/{}.jpg", raw.video, raw.frame));
    cache.write_once(&new_path, || {
        let crop = reproject_image(
            frame_image,
            color_camera,
            &plan.camera,
            plan.camera.resolution(),
        )?;
        Ok(DynamicImage::ImageRgb8(crop))
    })?;

    Ok(Some(DepthSample {
        image_path: new_path,
        depth_path: None,
        skeleton: raw.skeleton.clone(),
        valid: raw.valid.clone(),
        video: raw.video.clone(),
        frame: raw.frame,
        bbox: plan.bbox,
        depth_bbox,
        camera: plan.camera,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{simple_camera, test_camera};
    use approx::assert_relative_eq;
    use image::Rgb;
    use nalgebra::Matrix3;

    fn params() -> CropParams {
        CropParams {
            side_in: 64.0,
            random_zoom: 0.9,
        }
    }

    #[test]
    fn test_rejects_box_outside_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RawSample {
            image_path: dir.path().join("missing.jpg"),
            image_coords: vec![],
            bbox: BoundingBox::new(1900.0, 100.0, 50.0, 50.0),
            world_pose: vec![],
        };
        let sample = make_sample(
            &raw,
            &test_camera(),
            &params(),
            &ImageCache::new(dir.path()),
            "crop.jpg",
        )
        .unwrap();
        assert!(sample.is_none());
    }

    #[test]
    fn test_make_sample_keeps_annotations_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let camera = simple_camera(320, 240, 300.0);
        let source_path = dir.path().join("frame.png");
        RgbImage::from_fn(320, 240, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 0]))
            .save(&source_path)
            .unwrap();

        let world_pose = vec![Vector3::new(0.1, -0.2, 3.0), Vector3::new(-0.3, 0.4, 2.5)];
        let image_coords = world_pose
            .iter()
            .map(|p| {
                let px = camera.world_to_image(p).unwrap();
                Vector3::new(px.x, px.y, 1.0)
            })
            .collect();
        let raw = RawSample {
            image_path: source_path,
            image_coords,
            bbox: BoundingBox::new(100.0, 50.0, 120.0, 160.0),
            world_pose: world_pose.clone(),
        };

        let cache = ImageCache::new(dir.path().join("down"));
        let sample = make_sample(&raw, &camera, &params(), &cache, "seq/frame.png")
            .unwrap()
            .unwrap();

        // 64 / 160 / 0.9 < 1, crop side is the diagonal (200)
        let factor: f64 = 64.0 / 160.0 / 0.9;
        let side = (200.0_f64 * factor).round() as u32;
        assert_eq!(sample.camera.resolution().width, side);
        assert_relative_eq!(sample.bbox.w, 120.0 * factor, epsilon = 1e-9);
        assert_relative_eq!(sample.bbox.h, 160.0 * factor, epsilon = 1e-9);

        // the box center lands in the middle of the crop
        let center = sample.bbox.center();
        assert_relative_eq!(center.x, 100.0 * factor, epsilon = 1e-6);
        assert_relative_eq!(center.y, 100.0 * factor, epsilon = 1e-6);

        // coordinates agree with projecting the world pose through the new camera
        for (coord, joint) in sample.image_coords.iter().zip(&world_pose) {
            let expected = sample.camera.world_to_image(joint).unwrap();
            assert_relative_eq!(coord.x, expected.x, epsilon = 1e-6);
            assert_relative_eq!(coord.y, expected.y, epsilon = 1e-6);
            assert_eq!(coord.z, 1.0);
        }

        let crop = image::open(&sample.image_path).unwrap();
        assert_eq!(crop.width(), side);
        assert_eq!(sample.world_pose, world_pose);
    }

    #[test]
    fn test_crop_side_rounded_once() {
        let camera = simple_camera(320, 240, 300.0);
        let bbox = BoundingBox::new(100.0, 50.0, 80.0, 100.0);
        let params = CropParams {
            side_in: 50.0,
            random_zoom: 1.0,
        };

        // 200.6 * 0.5 = 100.3, rounding 200.6 first would give 101
        let plan = plan_crop(&camera, &bbox, 200.6, &params).unwrap();
        assert_relative_eq!(plan.factor, 0.5);
        assert_eq!(plan.camera.resolution().width, 100);
        assert_eq!(plan.camera.resolution().height, 100);

        let center = plan.bbox.center();
        assert_relative_eq!(center.x, 50.15, epsilon = 1e-6);
        assert_relative_eq!(center.y, 50.15, epsilon = 1e-6);
        assert_relative_eq!(plan.bbox.w, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_make_depth_sample() {
        let dir = tempfile::tempdir().unwrap();
        let color = simple_camera(640, 480, 500.0);
        let depth = Camera::new(
            Matrix3::identity(),
            Vector3::new(0.05, 0.0, 0.0),
            *simple_camera(320, 240, 250.0).intrinsic_matrix(),
            None,
            simple_camera(320, 240, 250.0).resolution(),
        )
        .unwrap();

        let raw = RawDepthSample {
            skeleton: vec![Vector3::new(0.0, 0.0, 2.0), Vector3::new(0.0, 0.5, 2.0)],
            valid: vec![true, true],
            video: "S001C001P001R001A001".to_string(),
            frame: 12,
            bbox: BoundingBox::new(250.0, 150.0, 100.0, 200.0),
        };
        let frame = RgbImage::from_pixel(640, 480, Rgb([40, 80, 120]));
        let cache = ImageCache::new(dir.path());
        let sample = make_depth_sample(&raw, &frame, &color, &depth, &params(), &cache)
            .unwrap()
            .unwrap();

        assert!(sample.image_path.ends_with("S001C001P001R001A001/12.jpg"));
        assert!(sample.image_path.exists());

        let factor: f64 = 64.0 / 200.0 / 0.9;
        let swept = raw.bbox.rotation_swept_side(SWEEP_ANGLE);
        assert_eq!(
            sample.camera.resolution().width,
            (swept * factor).round() as u32
        );
        // half focal length and baseline 0.05 at depth 2 shifts by 6.25 pixels
        let expected_x = (250.0 - 319.5) / 2.0 + 159.5 - 6.25;
        assert_relative_eq!(sample.depth_bbox.x, expected_x, epsilon = 1e-9);
        assert_relative_eq!(sample.depth_bbox.w, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_depth_sample_needs_valid_joint() {
        let dir = tempfile::tempdir().unwrap();
        let camera = simple_camera(640, 480, 500.0);
        let raw = RawDepthSample {
            skeleton: vec![Vector3::new(0.0, 0.0, 2.0)],
            valid: vec![false],
            video: "v".to_string(),
            frame: 0,
            bbox: BoundingBox::new(10.0, 10.0, 50.0, 50.0),
        };
        let frame = RgbImage::new(640, 480);
        let sample = make_depth_sample(
            &raw,
            &frame,
            &camera,
            &camera,
            &params(),
            &ImageCache::new(dir.path()),
        )
        .unwrap();
        assert!(sample.is_none());
    }
}

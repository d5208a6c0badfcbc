//! Depth Pose Tools Library
//!
//! Building blocks for camera-relative 3D human pose estimation from color
//! and depth imagery:
//! - Pinhole camera with radial-tangential distortion and composable edits
//! - Consistent reprojection of images, keypoints and boxes between cameras
//! - Sample preparation for multi-camera and depth-video captures
//! - Volumetric heatmap decoding
//! - Root-relative evaluation (PCK, AUC, error buckets)
//!
//! Training support (schedules, distillation loss, mixed-precision step
//! guard, model registry and the evaluation epoch runner) lives in
//! [`training`]; network architectures are supplied by the caller through
//! [`training::PoseModel`].

pub mod camera;
pub mod dataset;
pub mod evaluation;
pub mod geometry;
pub mod heatmap;
pub mod sample;
pub mod training;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use camera::{reproject_image, reproject_points, Camera, CameraError, Intrinsics, Resolution};
pub use geometry::{box_from_keypoints, BoundingBox};
pub use sample::{DepthSample, JointInfo, Phase, PoseGroup, PoseSample, SampleError};

pub use evaluation::{analyze, parse_epoch, BatchStats, EpochStats, Thresholds};
pub use heatmap::{decode, to_heatmap, PlanarUnits};
pub use training::{PipelineConfig, TrainingError};

//! Dataset adapters: group builders for the supported captures and the
//! per-sample view synthesis used when feeding a model.

use crate::camera::CameraError;
use crate::sample::SampleError;
use std::path::PathBuf;

pub mod augment;
pub mod depth;
pub mod panoptic;
pub mod view;

pub use augment::{enhance_depth, range_to_depth, ColorJitter, Occluders};
pub use depth::{
    build_depth_group, load_exclusions, ntu_depth_frame, ntu_person_key, ntu_rig_key, DepthRig,
    FrameSource, ImageDirectoryFrames, PersonSplit, VideoFrame,
};
pub use panoptic::{build_panoptic_group, PanopticSplits};
pub use view::{DepthImage, ViewAugment, ViewSample, ViewSynthesizer};

#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("Sample error: {0}")]
    Sample(#[from] SampleError),
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing file: {0}")]
    MissingFile(PathBuf),
    #[error("No camera '{0}' in the calibration")]
    MissingCamera(String),
    #[error("Malformed annotation: {0}")]
    Format(String),
}

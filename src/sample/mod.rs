//! Pose samples and the preprocessing that derives them from raw captures.
//!
//! A raw capture (full-frame image, 2D keypoints, box, 3D pose) is turned
//! into a [`PoseSample`] whose image is a crop rendered by a derived camera.
//! Coordinates, box and camera of a sample always describe the same image.

use crate::camera::{Camera, CameraError};
use crate::geometry::BoundingBox;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub mod builder;
pub mod cache;
pub mod joints;
pub mod matching;
pub mod pool;

pub use builder::{make_depth_sample, make_sample, CropParams, RawDepthSample, RawSample};
pub use cache::ImageCache;
pub use joints::JointInfo;
pub use matching::{match_detections, PersonDetector};
pub use pool::WorkerPool;

#[derive(thiserror::Error, Debug)]
pub enum SampleError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid joint info: {0}")]
    InvalidJointInfo(String),
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
    #[error("Detector failed: {0}")]
    Detector(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Valid,
    Test,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Valid => "valid",
            Phase::Test => "test",
        }
    }

    pub fn is_train(&self) -> bool {
        matches!(self, Phase::Train)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Phase::Train),
            "valid" => Ok(Phase::Valid),
            "test" => Ok(Phase::Test),
            other => Err(format!("Unknown phase '{other}'")),
        }
    }
}

/// A color sample: crop path, world pose, image coordinates `(x, y,
/// confidence)`, box and the camera that renders the crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub image_path: PathBuf,
    pub world_pose: Vec<Vector3<f64>>,
    pub image_coords: Vec<Vector3<f64>>,
    pub bbox: BoundingBox,
    pub camera: Camera,
}

/// A color/depth sample from a depth-video capture.
///
/// `bbox` and `camera` describe the color crop; `depth_bbox` is the person
/// box in the full depth frame of the paired depth camera, stored at
/// `depth_path` when the capture provided one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSample {
    pub image_path: PathBuf,
    #[serde(default)]
    pub depth_path: Option<PathBuf>,
    pub skeleton: Vec<Vector3<f64>>,
    pub valid: Vec<bool>,
    pub video: String,
    pub frame: usize,
    pub bbox: BoundingBox,
    pub depth_bbox: BoundingBox,
    pub camera: Camera,
}

/// The samples of one phase together with their skeleton metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseGroup<S = PoseSample> {
    pub phase: Phase,
    pub joint_info: JointInfo,
    pub samples: Vec<S>,
}

impl<S> PoseGroup<S> {
    pub fn new(phase: Phase, joint_info: JointInfo, samples: Vec<S>) -> Self {
        PoseGroup {
            phase,
            joint_info,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

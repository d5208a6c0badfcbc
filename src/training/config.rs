//! Pipeline configuration.
//!
//! [`PipelineConfig`] is built once (from defaults, YAML or JSON) and passed
//! by reference to every component that needs a setting.

use crate::evaluation::{DatasetMetadata, Thresholds};
use crate::sample::CropParams;
use crate::training::TrainingError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // data
    pub data_name: String,
    /// Root of the raw dataset.
    pub root_path: PathBuf,
    /// Root of the derived-image cache.
    pub root_down: PathBuf,
    pub num_processes: usize,
    pub box_margin: f64,
    pub side_in: u32,
    /// Lower bound of the training zoom range `[random_zoom, 1 / random_zoom]`.
    pub random_zoom: f64,
    pub geometry: bool,
    pub flip: bool,
    /// Color jitter on training inputs.
    pub colour: bool,
    /// Paste occluders from `occ_path` over training inputs.
    pub occluder: bool,
    pub occ_path: PathBuf,
    /// Convert ray distances of the depth frames to axial depth.
    pub to_depth: bool,
    /// Feed `exp(-depth)` instead of depth in metres.
    pub nexponent: bool,
    pub iou_floor: f64,

    // model
    pub model: String,
    pub criterion: String,
    pub num_joints: usize,
    pub depth: usize,
    pub stride: usize,
    pub depth_range: f64,

    // optimization
    pub n_epochs: usize,
    pub batch_size: usize,
    pub warmup: usize,
    pub warmup_factor: f64,
    pub learn_rate: f64,
    pub learn_decay: f64,
    pub grad_norm: f64,
    pub grad_scaling: f64,
    pub half_acc: bool,
    pub loss_div: f64,

    // distillation
    pub do_teach: bool,
    pub alpha_init: f64,
    pub alpha_dest: f64,
    pub alpha_span: usize,
    pub sigmoid: bool,
    pub bin_dist: bool,

    // evaluation
    pub flip_test: bool,
    pub semi_cubic: bool,
    /// Export the decoded test predictions under `save_path`.
    pub save_last: bool,
    pub save_path: PathBuf,
    pub thresholds: Thresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_name: "cmu_panoptic".to_string(),
            root_path: PathBuf::from("data"),
            root_down: PathBuf::from("data_down"),
            num_processes: 6,
            box_margin: 0.6,
            side_in: 257,
            random_zoom: 0.9,
            geometry: false,
            flip: false,
            colour: false,
            occluder: false,
            occ_path: PathBuf::from("occluders"),
            to_depth: false,
            nexponent: false,
            iou_floor: 0.5,

            model: "resnet".to_string(),
            criterion: "SmoothL1".to_string(),
            num_joints: 19,
            depth: 16,
            stride: 16,
            depth_range: 100.0,

            n_epochs: 20,
            batch_size: 64,
            warmup: 1,
            warmup_factor: 0.2,
            learn_rate: 5e-5,
            learn_decay: 0.2,
            grad_norm: 5.0,
            grad_scaling: 32.0,
            half_acc: false,
            loss_div: 1.0,

            do_teach: false,
            alpha_init: 0.1,
            alpha_dest: 1.0,
            alpha_span: 10,
            sigmoid: false,
            bin_dist: false,

            flip_test: false,
            semi_cubic: false,
            save_last: false,
            save_path: PathBuf::from("save"),
            thresholds: Thresholds::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, TrainingError> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TrainingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, TrainingError> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)
            .map_err(|e| TrainingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), TrainingError> {
        let yaml = serde_yaml::to_string(self).map_err(|e| TrainingError::Config(e.to_string()))?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Side of the heatmap grid produced for an input of `side_in`.
    pub fn side_out(&self) -> usize {
        crate::heatmap::output_side(self.side_in as usize, self.stride)
    }

    /// Replaces the thresholds with the ones listed for `data_name`.
    pub fn apply_metadata(&mut self, metadata: &DatasetMetadata) -> Result<(), TrainingError> {
        self.thresholds = metadata.thresholds(&self.data_name)?;
        Ok(())
    }

    /// Where test predictions are exported, when `save_last` is set.
    pub fn last_path(&self) -> Option<PathBuf> {
        self.save_last.then(|| {
            self.save_path
                .join(format!("last_{}", self.data_name))
                .join("predictions.csv")
        })
    }

    /// Factor the loss is multiplied by before the backward pass.
    pub fn loss_scale(&self) -> f32 {
        if self.half_acc {
            self.grad_scaling as f32
        } else {
            1.0
        }
    }

    pub fn crop_params(&self) -> CropParams {
        CropParams {
            side_in: self.side_in as f64,
            random_zoom: self.random_zoom,
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let invalid = |message: &str| Err(TrainingError::Config(message.to_string()));

        if self.side_in == 0 || self.stride == 0 || self.depth == 0 || self.num_joints == 0 {
            return invalid("side_in, stride, depth and num_joints must be positive");
        }
        if !(self.random_zoom > 0.0 && self.random_zoom <= 1.0) {
            return invalid("random_zoom must lie in (0, 1]");
        }
        if !(self.box_margin > 0.0) {
            return invalid("box_margin must be positive");
        }
        if !(self.depth_range > 0.0) {
            return invalid("depth_range must be positive");
        }
        if self.batch_size == 0 || self.num_processes == 0 {
            return invalid("batch_size and num_processes must be positive");
        }
        if !(self.learn_rate > 0.0) || !(self.grad_norm > 0.0) || !(self.grad_scaling > 0.0) {
            return invalid("learn_rate, grad_norm and grad_scaling must be positive");
        }
        if !(0.0..=1.0).contains(&self.iou_floor) {
            return invalid("iou_floor must lie in [0, 1]");
        }
        if self.do_teach && self.alpha_span == 0 {
            return invalid("alpha_span must be positive for distillation");
        }
        if self.warmup > self.n_epochs {
            return invalid("warmup cannot exceed n_epochs");
        }
        Ok(())
    }
}

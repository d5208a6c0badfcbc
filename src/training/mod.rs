//! Training support: configuration, schedules, mixed-precision step guard,
//! distillation loss, the model registry and the evaluation epoch runner.
//!
//! Models themselves are external collaborators behind [`PoseModel`].

use crate::dataset::DatasetError;
use crate::evaluation::EvaluationError;
use crate::heatmap::HeatmapError;

pub mod config;
pub mod distill;
pub mod evaluate;
pub mod precision;
pub mod registry;
pub mod schedule;

pub use config::PipelineConfig;
pub use distill::{distillation_loss, DistillKind};
pub use evaluate::{EpochRecord, EvalBatch, Evaluator};
pub use precision::{clip_grad_norm, guard_step, StepOutcome};
pub use registry::{Criterion, ModelFactory, ModelOutput, ModelRegistry, PoseModel};
pub use schedule::{distill_weight, learning_rate, proportional_learning_rate};

#[derive(thiserror::Error, Debug)]
pub enum TrainingError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Unknown model '{0}'")]
    UnknownModel(String),
    #[error("Unknown criterion '{0}'")]
    UnknownCriterion(String),
    #[error("Shape mismatch: {0}")]
    Shape(String),
    #[error("Model failed: {0}")]
    Model(String),
    #[error("Heatmap error: {0}")]
    Heatmap(#[from] HeatmapError),
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

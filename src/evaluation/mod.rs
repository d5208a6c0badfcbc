//! Root-relative 3D pose evaluation.
//!
//! [`analyze`] scores one batch; [`parse_epoch`] merges batch scores into
//! epoch scores, weighting every batch by its number of samples.

use ndarray::{ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub mod export;

pub use export::{read_predictions, PredictionRow, PredictionWriter};

#[derive(thiserror::Error, Debug)]
pub enum EvaluationError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("No thresholds for dataset '{0}'")]
    UnknownDataset(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error thresholds, in the unit of the evaluated coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// PCK threshold; AUC decays linearly to zero at this error.
    pub score: f64,
    pub solid: f64,
    pub close: f64,
    pub rough: f64,
    /// Planar (x, y) error below which a joint counts as jitter-free.
    pub jitter: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            score: 15.0,
            solid: 0.5,
            close: 2.0,
            rough: 5.0,
            jitter: 1.0,
        }
    }
}

/// Per-dataset evaluation metadata file.
///
/// ```json
/// { "thresholds": { "ntu": { "score": 15, ... } }, "no_depth": { "ntu": false } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub thresholds: HashMap<String, Thresholds>,
    #[serde(default)]
    pub no_depth: HashMap<String, bool>,
}

impl DatasetMetadata {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EvaluationError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn thresholds(&self, dataset: &str) -> Result<Thresholds, EvaluationError> {
        self.thresholds
            .get(dataset)
            .copied()
            .ok_or_else(|| EvaluationError::UnknownDataset(dataset.to_string()))
    }

    /// Whether the dataset lacks depth frames; unknown datasets have them.
    pub fn no_depth(&self, dataset: &str) -> bool {
        self.no_depth.get(dataset).copied().unwrap_or(false)
    }
}

/// Scores of one batch. Fractions are taken over the valid joints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub batch_size: usize,
    pub valid_count: usize,
    pub mean_error: f64,
    pub score_pck: f64,
    pub score_auc: f64,
    pub solid: f64,
    pub close: f64,
    pub rough: f64,
    /// Joints closer to their mirrored counterpart than to themselves.
    pub mirrored: f64,
    pub jitter: f64,
}

/// Scores of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub num_samples: usize,
    pub cam_mean: f64,
    pub score_pck: f64,
    pub score_auc: f64,
    pub solid: f64,
    pub close: f64,
    pub rough: f64,
    pub mirrored: f64,
    pub jitter: f64,
}

/// Scores a batch of predictions `(batch, joint, 3)` against the truth.
///
/// Both sets are re-rooted on `key_index` first, so a translation applied
/// to both leaves the scores unchanged. Only entries flagged in `valid`
/// are scored.
pub fn analyze(
    prediction: ArrayView3<f32>,
    truth: ArrayView3<f32>,
    valid: ArrayView2<bool>,
    mirror: &[usize],
    key_index: usize,
    thresholds: &Thresholds,
) -> Result<BatchStats, EvaluationError> {
    let (batch, joints, dims) = prediction.dim();
    if truth.dim() != prediction.dim() || dims != 3 {
        return Err(EvaluationError::ShapeMismatch(format!(
            "prediction {:?} vs truth {:?}",
            prediction.dim(),
            truth.dim()
        )));
    }
    if valid.dim() != (batch, joints)
        || mirror.len() != joints
        || mirror.iter().any(|&m| m >= joints)
        || key_index >= joints
    {
        return Err(EvaluationError::ShapeMismatch(format!(
            "valid {:?}, {} mirror entries, key {} for {} joints",
            valid.dim(),
            mirror.len(),
            key_index,
            joints
        )));
    }

    let prediction = prediction.mapv(f64::from);
    let truth = truth.mapv(f64::from);
    let prediction = &prediction - &prediction.slice(ndarray::s![.., key_index..key_index + 1, ..]);
    let truth = &truth - &truth.slice(ndarray::s![.., key_index..key_index + 1, ..]);
    let mirrored_truth = truth.select(Axis(1), mirror);

    let mut cubics = Vec::new();
    let mut reflects = Vec::new();
    let mut tangents = Vec::new();
    for b in 0..batch {
        for j in 0..joints {
            if !valid[[b, j]] {
                continue;
            }
            let p = prediction.slice(ndarray::s![b, j, ..]);
            let t = truth.slice(ndarray::s![b, j, ..]);
            let m = mirrored_truth.slice(ndarray::s![b, j, ..]);
            let dx = p[0] - t[0];
            let dy = p[1] - t[1];
            let dz = p[2] - t[2];
            cubics.push((dx * dx + dy * dy + dz * dz).sqrt());
            tangents.push((dx * dx + dy * dy).sqrt());
            reflects.push((&p - &m).mapv(|v| v * v).sum().sqrt());
        }
    }

    let valid_count = cubics.len();
    if valid_count == 0 {
        return Ok(BatchStats {
            batch_size: batch,
            valid_count,
            mean_error: 0.0,
            score_pck: 0.0,
            score_auc: 0.0,
            solid: 0.0,
            close: 0.0,
            rough: 0.0,
            mirrored: 0.0,
            jitter: 0.0,
        });
    }

    let n = valid_count as f64;
    let fraction = |hits: usize| hits as f64 / n;
    let below = |values: &[f64], limit: f64| values.iter().filter(|&&e| e <= limit).count();

    Ok(BatchStats {
        batch_size: batch,
        valid_count,
        mean_error: cubics.iter().sum::<f64>() / n,
        score_pck: fraction(below(&cubics, thresholds.score)),
        score_auc: cubics
            .iter()
            .map(|e| (1.0 - e / thresholds.score).max(0.0))
            .sum::<f64>()
            / n,
        solid: fraction(below(&cubics, thresholds.solid)),
        close: fraction(below(&cubics, thresholds.close)),
        rough: fraction(below(&cubics, thresholds.rough)),
        mirrored: fraction(
            cubics
                .iter()
                .zip(&reflects)
                .filter(|(cubic, reflect)| reflect < cubic)
                .count(),
        ),
        jitter: fraction(below(&tangents, thresholds.jitter)),
    })
}

/// Merges batch scores, weighting each batch by its size.
///
/// Batches without any valid joint add to the sample count but not to the
/// averaged scores.
pub fn parse_epoch(stats: &[BatchStats]) -> EpochStats {
    let num_samples = stats.iter().map(|s| s.batch_size).sum();
    let scored: Vec<&BatchStats> = stats.iter().filter(|s| s.valid_count > 0).collect();
    let weight: f64 = scored.iter().map(|s| s.batch_size as f64).sum();

    let average = |field: fn(&BatchStats) -> f64| {
        if weight == 0.0 {
            return 0.0;
        }
        scored
            .iter()
            .map(|s| field(s) * s.batch_size as f64)
            .sum::<f64>()
            / weight
    };

    EpochStats {
        num_samples,
        cam_mean: average(|s| s.mean_error),
        score_pck: average(|s| s.score_pck),
        score_auc: average(|s| s.score_auc),
        solid: average(|s| s.solid),
        close: average(|s| s.close),
        rough: average(|s| s.rough),
        mirrored: average(|s| s.mirrored),
        jitter: average(|s| s.jitter),
    }
}

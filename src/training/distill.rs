//! Feature distillation from a color+depth teacher to a student network.

use crate::training::{PipelineConfig, TrainingError};
use ndarray::{ArrayView4, Axis, Zip};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistillKind {
    /// L2 norm of the attended feature difference.
    L2,
    /// L2 norm of the attended difference of sigmoid activations.
    SigmoidL2,
    /// Attended binary cross-entropy of the student logits against the
    /// teacher's sigmoid activations.
    BinaryCrossEntropy,
}

impl DistillKind {
    /// The configured loss, or `None` when `do_teach` is off.
    pub fn from_config(config: &PipelineConfig) -> Option<Self> {
        if !config.do_teach {
            None
        } else if config.bin_dist {
            Some(DistillKind::BinaryCrossEntropy)
        } else if config.sigmoid {
            Some(DistillKind::SigmoidL2)
        } else {
            Some(DistillKind::L2)
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn bce_with_logits(logit: f32, target: f32) -> f32 {
    logit.max(0.0) - logit * target + (-logit.abs()).exp().ln_1p()
}

/// Distillation loss of a batch of `(batch, channel, row, col)` feature
/// maps. `attention` is broadcast against the features (typically
/// `(batch, 1, row, col)`). The per-sample reductions are averaged over
/// the batch.
pub fn distillation_loss(
    kind: DistillKind,
    teacher: ArrayView4<f32>,
    student: ArrayView4<f32>,
    attention: ArrayView4<f32>,
) -> Result<f32, TrainingError> {
    if teacher.dim() != student.dim() {
        return Err(TrainingError::Shape(format!(
            "Teacher features {:?} vs student features {:?}",
            teacher.dim(),
            student.dim()
        )));
    }
    let attention = attention.broadcast(teacher.raw_dim()).ok_or_else(|| {
        TrainingError::Shape(format!(
            "Attention map {:?} does not broadcast to {:?}",
            attention.dim(),
            teacher.dim()
        ))
    })?;

    let batch = teacher.len_of(Axis(0));
    if batch == 0 {
        return Ok(0.0);
    }

    let mut total = 0.0f32;
    for ((t, s), a) in teacher
        .outer_iter()
        .zip(student.outer_iter())
        .zip(attention.outer_iter())
    {
        let mut acc = 0.0f32;
        Zip::from(&t).and(&s).and(&a).for_each(|&t, &s, &a| {
            let term = match kind {
                DistillKind::L2 => (t - s) * a,
                DistillKind::SigmoidL2 => (sigmoid(t) - sigmoid(s)) * a,
                DistillKind::BinaryCrossEntropy => bce_with_logits(s, sigmoid(t)) * a,
            };
            acc += match kind {
                DistillKind::BinaryCrossEntropy => term,
                _ => term * term,
            };
        });
        total += match kind {
            DistillKind::BinaryCrossEntropy => acc,
            _ => acc.sqrt(),
        };
    }
    Ok(total / batch as f32)
}

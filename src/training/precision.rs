//! Gradient handling for loss-scaled (half precision) steps.
//!
//! Gradients are flat `f32` buffers, one per parameter tensor.

use crate::training::PipelineConfig;
use ndarray::ArrayD;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Gradients were unscaled and clipped; `norm` is the global norm
    /// before clipping.
    Applied { norm: f32 },
    /// A gradient overflowed; the optimizer must not step.
    Skipped,
}

impl StepOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, StepOutcome::Applied { .. })
    }
}

/// Rescales all gradients so that their global L2 norm is at most
/// `max_norm`. Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut [ArrayD<f32>], max_norm: f32) -> f32 {
    let total = grads
        .iter()
        .map(|g| g.iter().map(|v| v * v).sum::<f32>())
        .sum::<f32>()
        .sqrt();
    let coefficient = max_norm / (total + 1e-6);
    if coefficient < 1.0 {
        for grad in grads.iter_mut() {
            grad.mapv_inplace(|v| v * coefficient);
        }
    }
    total
}

/// Prepares the gradients of a loss multiplied by
/// [`PipelineConfig::loss_scale`] for an optimizer step.
///
/// With `half_acc`, a non-finite gradient skips the step and leaves the
/// gradients untouched; otherwise they are divided by `grad_scaling`.
/// The gradients are then clipped to `grad_norm`.
pub fn guard_step(grads: &mut [ArrayD<f32>], config: &PipelineConfig) -> StepOutcome {
    if config.half_acc {
        if grads.iter().any(|g| g.iter().any(|v| !v.is_finite())) {
            log::warn!("update step skipped");
            return StepOutcome::Skipped;
        }
        let scaling = config.grad_scaling as f32;
        for grad in grads.iter_mut() {
            grad.mapv_inplace(|v| v / scaling);
        }
    }
    StepOutcome::Applied {
        norm: clip_grad_norm(grads, config.grad_norm as f32),
    }
}

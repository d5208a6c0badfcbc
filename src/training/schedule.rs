//! Per-epoch schedules. Epochs are counted from 1.

use crate::training::PipelineConfig;

/// Learning-rate milestones (0-based epoch index) after which the rate is
/// multiplied by `learn_decay` once more.
const DECAY_MILESTONES: [usize; 3] = [15, 20, 25];

/// Warmup, then constant, then one decay step at each milestone.
pub fn learning_rate(config: &PipelineConfig, epoch: usize) -> f64 {
    let index = epoch.saturating_sub(1);
    if index < config.warmup {
        return config.learn_rate * config.warmup_factor;
    }
    let decays = DECAY_MILESTONES.iter().filter(|&&m| index >= m).count();
    config.learn_rate * config.learn_decay.powi(decays as i32)
}

/// Rate of the color-only trainer: full rate for the first 60% of the
/// epochs, then 0.2x, then 0.04x for the last 10%.
pub fn proportional_learning_rate(config: &PipelineConfig, epoch: usize) -> f64 {
    let index = epoch.saturating_sub(1) as f64;
    let total = config.n_epochs as f64;
    if index < total * 0.6 {
        config.learn_rate
    } else if index < total * 0.9 {
        config.learn_rate * 0.2
    } else {
        config.learn_rate * 0.04
    }
}

/// Weight of the distillation term: linear ramp from `alpha_init` to
/// `alpha_dest` over the first `alpha_span` epochs, then `alpha_dest`.
/// Zero when `do_teach` is off.
pub fn distill_weight(config: &PipelineConfig, epoch: usize) -> f64 {
    if !config.do_teach {
        return 0.0;
    }
    let index = epoch.saturating_sub(1);
    if index >= config.alpha_span {
        return config.alpha_dest;
    }
    if config.alpha_span == 1 {
        return config.alpha_init;
    }
    let t = index as f64 / (config.alpha_span - 1) as f64;
    config.alpha_init + (config.alpha_dest - config.alpha_init) * t
}

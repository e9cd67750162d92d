//! Learning Rate Scheduler Module
//!
//! Epoch-indexed learning-rate schedules. The learner asks for the rate of the
//! current epoch and passes it to the optimizer step.

use serde::{Deserialize, Serialize};

use crate::config::{RunConfig, SchedulerKind};

/// Learning rate scheduler that adjusts the learning rate during training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LRScheduler {
    /// Constant learning rate (no scheduling)
    Constant { lr: f64 },

    /// Multiply by `decay_factor` at each listed epoch
    StepDecay {
        initial_lr: f64,
        decay_factor: f64,
        step_epochs: Vec<usize>,
    },

    /// `lr0 * cos(7 * pi * epoch / (16 * total_epochs))`
    Cosine { initial_lr: f64, total_epochs: usize },
}

impl LRScheduler {
    pub fn from_config(config: &RunConfig) -> Self {
        match config.scheduler {
            SchedulerKind::None => Self::Constant { lr: config.lr },
            SchedulerKind::Step => Self::StepDecay {
                initial_lr: config.lr,
                decay_factor: config.lr_decay_ratio,
                step_epochs: config.epoch_steps.clone(),
            },
            SchedulerKind::Cosine => Self::Cosine {
                initial_lr: config.lr,
                total_epochs: config.nb_epochs,
            },
        }
    }

    /// Get the learning rate for a given epoch
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,

            Self::StepDecay {
                initial_lr,
                decay_factor,
                step_epochs,
            } => {
                let decays = step_epochs.iter().filter(|&&e| epoch >= e).count();
                initial_lr * decay_factor.powi(decays as i32)
            }

            Self::Cosine {
                initial_lr,
                total_epochs,
            } => {
                let progress = epoch as f64 / (*total_epochs).max(1) as f64;
                initial_lr * (7.0 * std::f64::consts::PI * progress / 16.0).cos()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let sched = LRScheduler::Constant { lr: 0.01 };
        assert_eq!(sched.get_lr(0), 0.01);
        assert_eq!(sched.get_lr(100), 0.01);
    }

    #[test]
    fn test_step_decay() {
        let sched = LRScheduler::StepDecay {
            initial_lr: 0.1,
            decay_factor: 0.2,
            step_epochs: vec![60, 120, 160],
        };
        assert_eq!(sched.get_lr(0), 0.1);
        assert!((sched.get_lr(60) - 0.02).abs() < 1e-12);
        assert!((sched.get_lr(130) - 0.004).abs() < 1e-12);
        assert!((sched.get_lr(200) - 0.0008).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_decreases_but_stays_positive() {
        let sched = LRScheduler::from_config(&RunConfig {
            lr: 1e-3,
            nb_epochs: 100,
            ..Default::default()
        });
        assert_eq!(sched.get_lr(0), 1e-3);
        let mut previous = f64::INFINITY;
        for epoch in 0..=100 {
            let lr = sched.get_lr(epoch);
            assert!(lr > 0.0 && lr <= previous);
            previous = lr;
        }
        assert!((previous - 1e-3 * (7.0 * std::f64::consts::PI / 16.0).cos()).abs() < 1e-12);
    }
}

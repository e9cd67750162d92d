//! Coefficient ramp-up and the per-step weight schedule

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RampUpSteps, RunConfig};
use crate::training::loss::{LossComponent, LossWeights};
use crate::training::uniloss::Uniloss;
use crate::utils::error::Result;

/// Linear increase from 0 to `target` over `nb_steps`, then constant.
/// `nb_steps == 0` disables the ramp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampUp {
    pub nb_steps: usize,
    pub target: f64,
    step: usize,
}

impl RampUp {
    pub fn new(nb_steps: usize, target: f64) -> Self {
        Self {
            nb_steps,
            target,
            step: 0,
        }
    }

    pub fn value(&self) -> f64 {
        if self.nb_steps == 0 {
            return self.target;
        }
        let progress = self.step.min(self.nb_steps) as f64 / self.nb_steps as f64;
        self.target * progress
    }

    pub fn step(&mut self) {
        if self.step < self.nb_steps {
            self.step += 1;
        }
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    pub fn current_step(&self) -> usize {
        self.step
    }
}

/// Produces the [`LossWeights`] used by each optimizer step.
///
/// Read [`WeightSchedule::current`] before computing the loss, then call
/// [`WeightSchedule::step_iteration`] after the optimizer step and
/// [`WeightSchedule::step_epoch`] after validation.
#[derive(Debug, Clone)]
pub struct WeightSchedule {
    base: LossWeights,
    ramps: Vec<(LossComponent, RampUp)>,
    rampup_each_epoch: bool,
    uniloss: Option<Uniloss>,
}

impl WeightSchedule {
    /// Constant weights, no ramp-up and no uniloss
    pub fn constant(base: LossWeights) -> Self {
        Self {
            base,
            ramps: Vec::new(),
            rampup_each_epoch: true,
            uniloss: None,
        }
    }

    /// Ramp the unsupervised, strong-unsupervised and self-supervised weights over `nb_steps`
    pub fn with_rampup(mut self, nb_steps: usize, each_epoch: bool) -> Self {
        if nb_steps > 0 {
            self.ramps = [
                LossComponent::Unsupervised,
                LossComponent::UnsupervisedStrong,
                LossComponent::SelfSupervised,
            ]
            .into_iter()
            .map(|component| (component, RampUp::new(nb_steps, self.base.get(component))))
            .collect();
        }
        self.rampup_each_epoch = each_epoch;
        self
    }

    pub fn with_uniloss(mut self, uniloss: Uniloss) -> Self {
        self.uniloss = Some(uniloss);
        self
    }

    /// Build the schedule a run needs. `iterations_per_epoch` sizes per-iteration schedules.
    pub fn from_config(config: &RunConfig, iterations_per_epoch: usize) -> Result<Self> {
        let base = LossWeights::from_config(config);
        let ramp_steps = match config.nb_rampup_steps {
            // Per-iteration ramp-up counts "nb_epochs" in iterations
            RampUpSteps::NbEpochs if !config.rampup_each_epoch => {
                config.rampup_steps() * iterations_per_epoch
            }
            _ => config.rampup_steps(),
        };
        let mut schedule =
            Self::constant(base).with_rampup(ramp_steps, config.rampup_each_epoch);

        if let Some(uniloss) = Uniloss::from_config(config, iterations_per_epoch)? {
            schedule = schedule.with_uniloss(uniloss);
        }

        debug!("Initial loss weights: {:?}", schedule.current());
        Ok(schedule)
    }

    /// Weights for the next loss evaluation
    pub fn current(&self) -> LossWeights {
        let mut weights = self.base;
        for (component, ramp) in &self.ramps {
            weights.set(*component, ramp.value());
        }
        if let Some(uniloss) = &self.uniloss {
            weights = uniloss.apply(weights);
        }
        weights
    }

    pub fn step_iteration(&mut self) -> Result<()> {
        if !self.rampup_each_epoch {
            self.ramps.iter_mut().for_each(|(_, ramp)| ramp.step());
        }
        match &mut self.uniloss {
            Some(uniloss) => uniloss.step_iteration(),
            None => Ok(()),
        }
    }

    pub fn step_epoch(&mut self) -> Result<()> {
        if self.rampup_each_epoch {
            self.ramps.iter_mut().for_each(|(_, ramp)| ramp.step());
        }
        match &mut self.uniloss {
            Some(uniloss) => uniloss.step_epoch(),
            None => Ok(()),
        }
    }
}

//! Experimental schedules that train on a single loss term at a time
//!
//! At any moment one component keeps its weight and the others are set to 0.
//! Which component is active is drawn at random with probabilities that depend
//! on the epoch (constant-epoch) or move linearly during training (weight-linear).

use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{Method, RunConfig, UnilossMode};
use crate::training::loss::{LossComponent, LossWeights};
use crate::utils::error::{Result, SslError};

fn draw(rng: &mut ChaCha8Rng, ratios: &[f64]) -> Result<usize> {
    let index = WeightedIndex::new(ratios)
        .map_err(|e| SslError::Config(format!("Invalid uniloss ratios {:?}: {}", ratios, e)))?;
    Ok(index.sample(rng))
}

/// Activation probabilities used between two epochs (both inclusive)
#[derive(Debug, Clone, PartialEq)]
pub struct RatioRange {
    pub ratios: Vec<f64>,
    pub first_epoch: usize,
    pub last_epoch: usize,
}

/// Draws the active component once per epoch
#[derive(Debug, Clone)]
pub struct ConstantEpochUniloss {
    components: Vec<LossComponent>,
    ranges: Vec<RatioRange>,
    epoch: usize,
    active: usize,
    rng: ChaCha8Rng,
}

impl ConstantEpochUniloss {
    pub fn new(components: Vec<LossComponent>, ranges: Vec<RatioRange>, seed: u64) -> Result<Self> {
        if let Some(bad) = ranges.iter().find(|r| r.ratios.len() != components.len()) {
            return Err(SslError::Config(format!(
                "Uniloss range has {} ratios for {} components",
                bad.ratios.len(),
                components.len()
            )));
        }
        let mut uniloss = Self {
            components,
            ranges,
            epoch: 0,
            active: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        uniloss.choose()?;
        Ok(uniloss)
    }

    /// Supervised only for the first 10% of epochs, either one until 90%, then unsupervised only
    pub fn three_phase(nb_epochs: usize, seed: u64) -> Result<Self> {
        let begin_uniform = nb_epochs / 10;
        let begin_only_u = nb_epochs * 9 / 10;
        Self::new(
            vec![LossComponent::Supervised, LossComponent::Unsupervised],
            vec![
                RatioRange {
                    ratios: vec![1.0, 0.0],
                    first_epoch: 0,
                    last_epoch: begin_uniform.saturating_sub(1),
                },
                RatioRange {
                    ratios: vec![0.5, 0.5],
                    first_epoch: begin_uniform,
                    last_epoch: begin_only_u.saturating_sub(1),
                },
                RatioRange {
                    ratios: vec![0.0, 1.0],
                    first_epoch: begin_only_u,
                    last_epoch: nb_epochs,
                },
            ],
            seed,
        )
    }

    /// Supervised only for the first 10% of epochs, then either one
    pub fn two_phase(nb_epochs: usize, seed: u64) -> Result<Self> {
        let begin_uniform = nb_epochs / 10;
        Self::new(
            vec![LossComponent::Supervised, LossComponent::Unsupervised],
            vec![
                RatioRange {
                    ratios: vec![1.0, 0.0],
                    first_epoch: 0,
                    last_epoch: begin_uniform.saturating_sub(1),
                },
                RatioRange {
                    ratios: vec![0.5, 0.5],
                    first_epoch: begin_uniform,
                    last_epoch: nb_epochs,
                },
            ],
            seed,
        )
    }

    // Outside every range the previous choice is kept.
    fn choose(&mut self) -> Result<()> {
        let epoch = self.epoch;
        if let Some(range) = self
            .ranges
            .iter()
            .find(|r| r.first_epoch <= epoch && epoch <= r.last_epoch)
        {
            let ratios = range.ratios.clone();
            self.active = draw(&mut self.rng, &ratios)?;
        }
        Ok(())
    }

    pub fn step_epoch(&mut self) -> Result<()> {
        self.epoch += 1;
        self.choose()
    }

    pub fn active(&self) -> LossComponent {
        self.components[self.active]
    }

    fn components(&self) -> &[LossComponent] {
        &self.components
    }
}

/// Target of a weight-linear schedule: probability at the start and the end of training
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTarget {
    pub component: LossComponent,
    pub start: f64,
    pub end: f64,
}

/// Redraws the active component every iteration; probabilities advance every `period` steps
#[derive(Debug, Clone)]
pub struct WeightLinearUniloss {
    targets: Vec<LinearTarget>,
    nb_steps: usize,
    index: usize,
    period: usize,
    local: usize,
    on_epoch: bool,
    active: usize,
    rng: ChaCha8Rng,
}

impl WeightLinearUniloss {
    pub fn new(
        targets: Vec<LinearTarget>,
        nb_steps: usize,
        period: usize,
        on_epoch: bool,
        seed: u64,
    ) -> Result<Self> {
        if targets.is_empty() || nb_steps == 0 {
            return Err(SslError::Config(
                "Weight linear uniloss needs targets and at least one step".to_string(),
            ));
        }
        let mut uniloss = Self {
            targets,
            nb_steps,
            index: 0,
            period: period.max(1),
            local: 0,
            on_epoch,
            active: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        uniloss.resample()?;
        Ok(uniloss)
    }

    /// Interpolated activation probabilities at the current index
    pub fn ratios(&self) -> Vec<f64> {
        let progress = self.index as f64 / self.nb_steps as f64;
        self.targets
            .iter()
            .map(|t| t.start + progress * (t.end - t.start))
            .collect()
    }

    fn resample(&mut self) -> Result<()> {
        let ratios = self.ratios();
        self.active = draw(&mut self.rng, &ratios)?;
        Ok(())
    }

    fn advance(&mut self) {
        self.local += 1;
        if self.local >= self.period {
            self.local = 0;
            self.index = (self.index + 1).min(self.nb_steps);
        }
    }

    pub fn step_iteration(&mut self) -> Result<()> {
        if !self.on_epoch {
            self.advance();
        }
        self.resample()
    }

    pub fn step_epoch(&mut self) {
        if self.on_epoch {
            self.advance();
        }
    }

    pub fn active(&self) -> LossComponent {
        self.targets[self.active].component
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Either uniloss schedule, as held by the weight schedule
#[derive(Debug, Clone)]
pub enum Uniloss {
    ConstantEpoch(ConstantEpochUniloss),
    WeightLinear(WeightLinearUniloss),
}

impl Uniloss {
    pub fn from_config(config: &RunConfig, iterations_per_epoch: usize) -> Result<Option<Self>> {
        let seed = config.seed;
        let uniloss = match config.uniloss {
            UnilossMode::None => return Ok(None),
            UnilossMode::ConstantEpochThreePhase => {
                Uniloss::ConstantEpoch(ConstantEpochUniloss::three_phase(config.nb_epochs, seed)?)
            }
            UnilossMode::ConstantEpochTwoPhase => {
                Uniloss::ConstantEpoch(ConstantEpochUniloss::two_phase(config.nb_epochs, seed)?)
            }
            UnilossMode::WeightLinear => {
                let targets = match config.run {
                    Method::ReMixMatch => vec![
                        LinearTarget { component: LossComponent::Supervised, start: 1.0, end: 0.0 },
                        LinearTarget { component: LossComponent::Unsupervised, start: 0.0, end: 1.0 / 3.0 },
                        LinearTarget { component: LossComponent::UnsupervisedStrong, start: 0.0, end: 1.0 / 3.0 },
                        LinearTarget { component: LossComponent::SelfSupervised, start: 0.0, end: 1.0 / 3.0 },
                    ],
                    _ => vec![
                        LinearTarget { component: LossComponent::Supervised, start: 1.0, end: 0.0 },
                        LinearTarget { component: LossComponent::Unsupervised, start: 0.0, end: 1.0 },
                    ],
                };
                let period = if config.wlu_on_epoch {
                    config.nb_epochs / config.wlu_steps
                } else {
                    config.nb_epochs * iterations_per_epoch / config.wlu_steps
                };
                Uniloss::WeightLinear(WeightLinearUniloss::new(
                    targets,
                    config.wlu_steps,
                    period,
                    config.wlu_on_epoch,
                    seed,
                )?)
            }
        };
        Ok(Some(uniloss))
    }

    /// Zero every weight but the active component's
    pub fn apply(&self, weights: LossWeights) -> LossWeights {
        let (active, components): (LossComponent, Vec<LossComponent>) = match self {
            Uniloss::ConstantEpoch(u) => (u.active(), u.components().to_vec()),
            Uniloss::WeightLinear(u) => (u.active(), u.targets.iter().map(|t| t.component).collect()),
        };
        let mut out = weights;
        for component in components {
            if component != active {
                out.set(component, 0.0);
            }
        }
        out
    }

    pub fn step_iteration(&mut self) -> Result<()> {
        match self {
            Uniloss::WeightLinear(u) => u.step_iteration(),
            Uniloss::ConstantEpoch(_) => Ok(()),
        }
    }

    pub fn step_epoch(&mut self) -> Result<()> {
        match self {
            Uniloss::ConstantEpoch(u) => u.step_epoch(),
            Uniloss::WeightLinear(u) => {
                u.step_epoch();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_phase_follows_epoch_ranges() {
        let mut uniloss = ConstantEpochUniloss::three_phase(20, 7).unwrap();
        // Epochs 0 and 1 are supervised only
        assert_eq!(uniloss.active(), LossComponent::Supervised);
        uniloss.step_epoch().unwrap();
        assert_eq!(uniloss.active(), LossComponent::Supervised);

        for _ in 1..18 {
            uniloss.step_epoch().unwrap();
        }
        // Epoch 18 onwards is unsupervised only
        assert_eq!(uniloss.active(), LossComponent::Unsupervised);
    }

    #[test]
    fn test_middle_phase_uses_both_components() {
        let mut uniloss = ConstantEpochUniloss::two_phase(200, 3).unwrap();
        let mut seen_s = false;
        let mut seen_u = false;
        for _ in 0..199 {
            uniloss.step_epoch().unwrap();
            match uniloss.active() {
                LossComponent::Supervised => seen_s = true,
                _ => seen_u = true,
            }
        }
        assert!(seen_s && seen_u);
    }

    #[test]
    fn test_mismatched_ratios_are_rejected() {
        let result = ConstantEpochUniloss::new(
            vec![LossComponent::Supervised],
            vec![RatioRange { ratios: vec![0.5, 0.5], first_epoch: 0, last_epoch: 3 }],
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_ratios_abort_the_epoch_step() {
        let uniloss = ConstantEpochUniloss::new(
            vec![LossComponent::Supervised, LossComponent::Unsupervised],
            vec![
                RatioRange { ratios: vec![1.0, 0.0], first_epoch: 0, last_epoch: 0 },
                RatioRange { ratios: vec![0.0, 0.0], first_epoch: 1, last_epoch: 3 },
            ],
            0,
        )
        .unwrap();
        let mut uniloss = Uniloss::ConstantEpoch(uniloss);
        assert!(uniloss.step_iteration().is_ok());
        assert!(matches!(uniloss.step_epoch(), Err(SslError::Config(_))));
    }

    #[test]
    fn test_weight_linear_ratios_interpolate() {
        let targets = vec![
            LinearTarget { component: LossComponent::Supervised, start: 1.0, end: 0.0 },
            LinearTarget { component: LossComponent::Unsupervised, start: 0.0, end: 1.0 },
        ];
        let mut wlu = WeightLinearUniloss::new(targets, 4, 2, true, 0).unwrap();
        assert_eq!(wlu.ratios(), vec![1.0, 0.0]);
        assert_eq!(wlu.active(), LossComponent::Supervised);

        for _ in 0..4 {
            wlu.step_epoch();
        }
        assert_eq!(wlu.index(), 2);
        assert_eq!(wlu.ratios(), vec![0.5, 0.5]);

        for _ in 0..20 {
            wlu.step_epoch();
        }
        assert_eq!(wlu.index(), 4);
        wlu.step_iteration().unwrap();
        assert_eq!(wlu.active(), LossComponent::Unsupervised);
    }

    #[test]
    fn test_apply_keeps_only_active_weight() {
        let uniloss = Uniloss::ConstantEpoch(ConstantEpochUniloss::three_phase(10, 1).unwrap());
        let weights = uniloss.apply(LossWeights::default());
        assert_eq!(weights.lambda_s, 1.0);
        assert_eq!(weights.lambda_u, 0.0);
        // Components outside the schedule are untouched
        assert_eq!(weights.lambda_u1, 0.5);
    }
}

//! Loss combiners for the supervised baselines and the three SSL methods
//!
//! Coefficients are never stored in a combiner. Each call receives the
//! [`LossWeights`] snapshot for the current step, so a ramp-up or uniloss
//! schedule only has to produce a new value.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::{LabelMode, RunConfig, UnsupervisedCriterion};
use crate::training::criterion::{binary_cross_entropy, cross_entropy, sq_diff};
use crate::training::mask::confidence_mask;
use crate::utils::error::Result;

/// A weighted term of the combined loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LossComponent {
    Supervised,
    Unsupervised,
    UnsupervisedStrong,
    SelfSupervised,
}

/// Coefficients of the combined loss at one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub lambda_s: f64,
    pub lambda_u: f64,
    pub lambda_u1: f64,
    pub lambda_r: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            lambda_s: 1.0,
            lambda_u: 1.0,
            lambda_u1: 0.5,
            lambda_r: 0.5,
        }
    }
}

impl LossWeights {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            lambda_s: config.lambda_s,
            lambda_u: config.lambda_u,
            lambda_u1: config.lambda_u1,
            lambda_r: config.lambda_r,
        }
    }

    pub fn get(&self, component: LossComponent) -> f64 {
        match component {
            LossComponent::Supervised => self.lambda_s,
            LossComponent::Unsupervised => self.lambda_u,
            LossComponent::UnsupervisedStrong => self.lambda_u1,
            LossComponent::SelfSupervised => self.lambda_r,
        }
    }

    pub fn set(&mut self, component: LossComponent, value: f64) {
        match component {
            LossComponent::Supervised => self.lambda_s = value,
            LossComponent::Unsupervised => self.lambda_u = value,
            LossComponent::UnsupervisedStrong => self.lambda_u1 = value,
            LossComponent::SelfSupervised => self.lambda_r = value,
        }
    }
}

/// The combined loss and the components it was built from
#[derive(Debug, Clone)]
pub struct LossParts<B: Backend> {
    pub total: Tensor<B, 1>,
    pub loss_s: Tensor<B, 1>,
    pub loss_u: Option<Tensor<B, 1>>,
    pub loss_u1: Option<Tensor<B, 1>>,
    pub loss_r: Option<Tensor<B, 1>>,
    /// Confidence mask over the unlabeled batch (FixMatch only)
    pub mask: Option<Tensor<B, 1>>,
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem::<f64>()
}

impl<B: Backend> LossParts<B> {
    fn supervised_only(loss_s: Tensor<B, 1>, lambda_s: f64) -> Self {
        Self {
            total: loss_s.clone().mul_scalar(lambda_s),
            loss_s,
            loss_u: None,
            loss_u1: None,
            loss_r: None,
            mask: None,
        }
    }

    /// Host copies of every component, named as they are logged
    pub fn scalars(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![("loss", scalar(&self.total)), ("loss_s", scalar(&self.loss_s))];
        if let Some(loss_u) = &self.loss_u {
            out.push(("loss_u", scalar(loss_u)));
        }
        if let Some(loss_u1) = &self.loss_u1 {
            out.push(("loss_u1", scalar(loss_u1)));
        }
        if let Some(loss_r) = &self.loss_r {
            out.push(("loss_r", scalar(loss_r)));
        }
        if let Some(mask) = &self.mask {
            out.push(("mask", mask.clone().mean().into_scalar().elem::<f64>()));
        }
        out
    }
}

fn criterion_for<B: Backend>(
    mode: LabelMode,
    pred: Tensor<B, 2>,
    target: Tensor<B, 2>,
) -> Result<Tensor<B, 1>> {
    match mode {
        LabelMode::Onehot => cross_entropy(pred, target),
        LabelMode::Multihot => binary_cross_entropy(pred, target),
    }
}

/// Plain supervised loss used by the baselines
pub fn supervised_loss<B: Backend>(
    pred: Tensor<B, 2>,
    target: Tensor<B, 2>,
    mode: LabelMode,
) -> Result<LossParts<B>> {
    let loss_s = criterion_for(mode, pred, target)?.mean();
    Ok(LossParts::supervised_only(loss_s, 1.0))
}

/// FixMatch: supervised loss on weak views, masked loss on strong views against guessed labels
#[derive(Debug, Clone)]
pub struct FixMatchLoss {
    pub mode: LabelMode,
    pub threshold_confidence: f64,
}

impl FixMatchLoss {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            mode: config.label_mode,
            threshold_confidence: config.threshold_confidence,
        }
    }

    pub fn compute<B: Backend>(
        &self,
        pred_s_weak: Tensor<B, 2>,
        labels_s: Tensor<B, 2>,
        pred_u_weak: Tensor<B, 2>,
        pred_u_strong: Tensor<B, 2>,
        labels_u_guessed: Tensor<B, 2>,
        weights: &LossWeights,
    ) -> Result<LossParts<B>> {
        let loss_s = criterion_for(self.mode, pred_s_weak, labels_s)?.mean();

        let mask = confidence_mask(pred_u_weak.detach(), self.threshold_confidence, self.mode);
        let loss_u = criterion_for(self.mode, pred_u_strong, labels_u_guessed)?;
        let loss_u = (loss_u * mask.clone()).mean();

        let total = loss_s.clone().mul_scalar(weights.lambda_s)
            + loss_u.clone().mul_scalar(weights.lambda_u);

        Ok(LossParts {
            total,
            loss_s,
            loss_u: Some(loss_u),
            loss_u1: None,
            loss_r: None,
            mask: Some(mask),
        })
    }
}

/// MixMatch: cross-entropy on the mixed labeled part, `criterion_u` on the mixed unlabeled part
#[derive(Debug, Clone)]
pub struct MixMatchLoss {
    pub criterion_u: UnsupervisedCriterion,
}

impl MixMatchLoss {
    pub fn compute<B: Backend>(
        &self,
        s_pred: Tensor<B, 2>,
        s_target: Tensor<B, 2>,
        u_pred: Tensor<B, 2>,
        u_target: Tensor<B, 2>,
        weights: &LossWeights,
    ) -> Result<LossParts<B>> {
        let loss_s = cross_entropy(s_pred, s_target)?.mean();
        let loss_u = match self.criterion_u {
            UnsupervisedCriterion::SqDiff => sq_diff(u_pred, u_target)?,
            UnsupervisedCriterion::CrossEntropy => cross_entropy(u_pred, u_target)?,
        }
        .mean();

        let total = loss_s.clone().mul_scalar(weights.lambda_s)
            + loss_u.clone().mul_scalar(weights.lambda_u);

        Ok(LossParts {
            total,
            loss_s,
            loss_u: Some(loss_u),
            loss_u1: None,
            loss_r: None,
            mask: None,
        })
    }
}

/// Predictions and targets of the self-supervised head
pub struct SelfSupervisedTerm<B: Backend> {
    pub pred: Tensor<B, 2>,
    pub target: Tensor<B, 2>,
}

/// ReMixMatch: mixed supervised/unsupervised terms, an unmixed strong-view term,
/// and an optional self-supervised term
#[derive(Debug, Clone, Default)]
pub struct ReMixMatchLoss;

impl ReMixMatchLoss {
    #[allow(clippy::too_many_arguments)]
    pub fn compute<B: Backend>(
        &self,
        s_pred: Tensor<B, 2>,
        s_target: Tensor<B, 2>,
        u_pred: Tensor<B, 2>,
        u_target: Tensor<B, 2>,
        u1_pred: Tensor<B, 2>,
        u1_target: Tensor<B, 2>,
        self_supervised: Option<SelfSupervisedTerm<B>>,
        weights: &LossWeights,
    ) -> Result<LossParts<B>> {
        let loss_s = cross_entropy(s_pred, s_target)?.mean();
        let loss_u = cross_entropy(u_pred, u_target)?.mean();
        let loss_u1 = cross_entropy(u1_pred, u1_target)?.mean();

        let mut total = loss_s.clone().mul_scalar(weights.lambda_s)
            + loss_u.clone().mul_scalar(weights.lambda_u)
            + loss_u1.clone().mul_scalar(weights.lambda_u1);

        // A disabled self-supervised component reports a zero term
        let loss_r = match self_supervised {
            Some(term) => {
                let loss_r = cross_entropy(term.pred, term.target)?.mean();
                total = total + loss_r.clone().mul_scalar(weights.lambda_r);
                loss_r
            }
            None => loss_s.zeros_like(),
        };

        Ok(LossParts {
            total,
            loss_s,
            loss_u: Some(loss_u),
            loss_u1: Some(loss_u1),
            loss_r: Some(loss_r),
            mask: None,
        })
    }
}

//! Training epochs
//!
//! Each method implements [`TrainStep`]: given the model, one index batch per
//! loader and a [`LossWeights`] snapshot, it builds the views it needs and
//! returns the combined loss. [`Trainer`] owns the loaders and runs the
//! shared part of every iteration:
//!
//! weights snapshot → step loss → backward → optimizer step → schedule step → metrics

use burn::{
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, backend::Backend, Tensor},
};
use indicatif::ProgressBar;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::config::{AugmentStrength, LabelMode, Method, RunConfig};
use crate::dataset::{BatchLoader, LabeledSplit, SslBatcher, ZipCycle};
use crate::model::{activation, SslClassifier};
use crate::training::distributions::ModelDistributions;
use crate::training::guesser::{
    AlignmentSharpenGuesser, ArgmaxGuesser, ArgmaxSmoothGuesser, Guesser, MeanArgmaxGuesser,
    MeanSharpenGuesser, MultihotGuesser,
};
use crate::training::loss::{
    supervised_loss, FixMatchLoss, LossParts, LossWeights, MixMatchLoss, ReMixMatchLoss,
    SelfSupervisedTerm,
};
use crate::training::mixup::MatchMixer;
use crate::training::rampup::WeightSchedule;
use crate::training::self_supervised::SelfSupervisedTransform;
use crate::utils::error::{Result, SslError};
use crate::utils::metrics::{categorical_accuracy, multilabel_accuracy, EpochMeans};

/// Host scalars reported by one iteration besides the loss components
pub type StepScalars = Vec<(&'static str, f64)>;

/// Loss computation of one method
pub trait TrainStep<B: AutodiffBackend> {
    fn method(&self) -> Method;

    /// `batches` holds one index batch per loader, in the order of [`build_loaders`]
    fn loss(
        &mut self,
        model: &SslClassifier<B>,
        batches: &[Vec<usize>],
        seed: u64,
        weights: &LossWeights,
    ) -> Result<(LossParts<B>, StepScalars)>;
}

fn accuracy<B: Backend>(pred: &Tensor<B, 2>, target: &Tensor<B, 2>, mode: LabelMode, threshold: f64) -> f64 {
    match mode {
        LabelMode::Onehot => categorical_accuracy(pred.clone(), target.clone()),
        LabelMode::Multihot => multilabel_accuracy(pred.clone(), target.clone(), threshold),
    }
}

fn batch<'a>(batches: &'a [Vec<usize>], i: usize) -> Result<&'a [usize]> {
    batches
        .get(i)
        .map(Vec::as_slice)
        .ok_or_else(|| SslError::Training(format!("Missing index batch {} ({} given)", i, batches.len())))
}

/// Plain supervised epochs on the full set or the labeled part
pub struct SupervisedStep<B: AutodiffBackend> {
    pub method: Method,
    pub batcher: SslBatcher<B>,
    pub mode: LabelMode,
    pub augment: AugmentStrength,
    pub threshold: f64,
}

impl<B: AutodiffBackend> TrainStep<B> for SupervisedStep<B> {
    fn method(&self) -> Method {
        self.method
    }

    fn loss(
        &mut self,
        model: &SslClassifier<B>,
        batches: &[Vec<usize>],
        seed: u64,
        _weights: &LossWeights,
    ) -> Result<(LossParts<B>, StepScalars)> {
        let s = self.batcher.labeled(batch(batches, 0)?, self.augment, seed)?;
        let pred = activation(model.forward(s.inputs), self.mode);
        let acc_s = accuracy(&pred, &s.targets, self.mode, self.threshold);
        Ok((supervised_loss(pred, s.targets, self.mode)?, vec![("acc_s", acc_s)]))
    }
}

/// FixMatch: weak labeled views, guessed labels from the weak unlabeled view(s)
/// and a masked loss on the strong unlabeled view
pub struct FixMatchStep<B: AutodiffBackend> {
    pub batcher: SslBatcher<B>,
    pub criterion: FixMatchLoss,
    pub guesser: Box<dyn Guesser<B>>,
    pub nb_weak: usize,
    pub threshold: f64,
}

impl<B: AutodiffBackend> TrainStep<B> for FixMatchStep<B> {
    fn method(&self) -> Method {
        Method::FixMatch
    }

    fn loss(
        &mut self,
        model: &SslClassifier<B>,
        batches: &[Vec<usize>],
        seed: u64,
        weights: &LossWeights,
    ) -> Result<(LossParts<B>, StepScalars)> {
        let mode = self.criterion.mode;
        let s = self.batcher.labeled(batch(batches, 0)?, AugmentStrength::Weak, seed)?;
        let u = self
            .batcher
            .unlabeled(batch(batches, 1)?, self.nb_weak, 1, seed.wrapping_add(1))?;

        let pred_s = activation(model.forward(s.inputs), mode);
        let preds_u_weak: Vec<Tensor<B, 2>> = u
            .weak
            .into_iter()
            .map(|x| activation(model.forward(x), mode).detach())
            .collect();
        let guessed = self.guesser.guess(&preds_u_weak)?;

        let strong = u
            .strong
            .into_iter()
            .next()
            .ok_or_else(|| SslError::Training("FixMatch needs a strong view".to_string()))?;
        let pred_u_strong = activation(model.forward(strong), mode);

        // The mask looks at the averaged weak views
        let nb_views = preds_u_weak.len();
        let pred_u_weak = preds_u_weak
            .into_iter()
            .reduce(|acc, p| acc + p)
            .map(|sum| sum.div_scalar(nb_views as f64))
            .ok_or_else(|| SslError::Training("FixMatch needs a weak view".to_string()))?;

        let acc_s = accuracy(&pred_s, &s.targets, mode, self.threshold);
        let acc_u = accuracy(&pred_u_strong, &u.targets, mode, self.threshold);

        let parts = self.criterion.compute(
            pred_s,
            s.targets,
            pred_u_weak,
            pred_u_strong,
            guessed,
            weights,
        )?;
        Ok((parts, vec![("acc_s", acc_s), ("acc_u", acc_u)]))
    }
}

/// MixMatch: K weak unlabeled views, mean-sharpen guess, MixUp of both parts
pub struct MixMatchStep<B: AutodiffBackend> {
    pub batcher: SslBatcher<B>,
    pub criterion: MixMatchLoss,
    pub guesser: MeanSharpenGuesser,
    pub mixer: MatchMixer,
    pub nb_augms: usize,
}

impl<B: AutodiffBackend> TrainStep<B> for MixMatchStep<B> {
    fn method(&self) -> Method {
        Method::MixMatch
    }

    fn loss(
        &mut self,
        model: &SslClassifier<B>,
        batches: &[Vec<usize>],
        seed: u64,
        weights: &LossWeights,
    ) -> Result<(LossParts<B>, StepScalars)> {
        let s = self.batcher.labeled(batch(batches, 0)?, AugmentStrength::Weak, seed)?;
        let u = self
            .batcher
            .unlabeled(batch(batches, 1)?, self.nb_augms, 0, seed.wrapping_add(1))?;

        let preds_u: Vec<Tensor<B, 2>> = u
            .weak
            .iter()
            .map(|x| activation(model.forward(x.clone()), LabelMode::Onehot).detach())
            .collect();
        let guessed = self.guesser.guess(&preds_u)?;

        let mixed = self.mixer.mix(s.inputs, s.targets, &u.weak, guessed)?;
        let s_pred = activation(model.forward(mixed.s_inputs), LabelMode::Onehot);
        let u_pred = activation(model.forward(mixed.u_inputs), LabelMode::Onehot);

        let acc_s = categorical_accuracy(s_pred.clone(), mixed.s_targets.clone());
        let acc_u = categorical_accuracy(u_pred.clone(), mixed.u_targets.clone());

        let parts = self
            .criterion
            .compute(s_pred, mixed.s_targets, u_pred, mixed.u_targets, weights)?;
        Ok((parts, vec![("acc_s", acc_s), ("acc_u", acc_u)]))
    }
}

/// ReMixMatch: strong labeled views, aligned guess on the weak view, MixUp with
/// K strong views, an unmixed term on the first strong view and an optional
/// self-supervised term
pub struct ReMixMatchStep<B: AutodiffBackend> {
    pub batcher: SslBatcher<B>,
    pub criterion: ReMixMatchLoss,
    pub guesser: AlignmentSharpenGuesser,
    pub mixer: MatchMixer,
    pub self_supervised: Option<SelfSupervisedTransform>,
    pub nb_augms_strong: usize,
}

impl<B: AutodiffBackend> TrainStep<B> for ReMixMatchStep<B> {
    fn method(&self) -> Method {
        Method::ReMixMatch
    }

    fn loss(
        &mut self,
        model: &SslClassifier<B>,
        batches: &[Vec<usize>],
        seed: u64,
        weights: &LossWeights,
    ) -> Result<(LossParts<B>, StepScalars)> {
        let s = self.batcher.labeled(batch(batches, 0)?, AugmentStrength::Strong, seed)?;
        let u = self.batcher.unlabeled(
            batch(batches, 1)?,
            1,
            self.nb_augms_strong,
            seed.wrapping_add(1),
        )?;

        self.guesser.observe_labeled(s.targets.clone())?;
        let pred_u_weak: Vec<Tensor<B, 2>> = u
            .weak
            .into_iter()
            .map(|x| activation(model.forward(x), LabelMode::Onehot).detach())
            .collect();
        let guessed = self.guesser.guess(&pred_u_weak)?;

        let first_strong = u
            .strong
            .first()
            .cloned()
            .ok_or_else(|| SslError::Training("ReMixMatch needs a strong view".to_string()))?;

        let mixed = self
            .mixer
            .mix(s.inputs, s.targets, &u.strong, guessed.clone())?;
        let s_pred = activation(model.forward(mixed.s_inputs), LabelMode::Onehot);
        let u_pred = activation(model.forward(mixed.u_inputs), LabelMode::Onehot);
        let u1_pred = activation(model.forward(first_strong.clone()), LabelMode::Onehot);

        let mut scalars = vec![
            ("acc_s", categorical_accuracy(s_pred.clone(), mixed.s_targets.clone())),
            ("acc_u", categorical_accuracy(u_pred.clone(), mixed.u_targets.clone())),
            ("acc_u1", categorical_accuracy(u1_pred.clone(), guessed.clone())),
        ];

        let term = match &mut self.self_supervised {
            Some(transform) => {
                let (inputs, target) = transform.apply(first_strong)?;
                let pred = activation(model.forward_rot(inputs)?, LabelMode::Onehot);
                scalars.push(("acc_r", categorical_accuracy(pred.clone(), target.clone())));
                Some(SelfSupervisedTerm { pred, target })
            }
            None => None,
        };

        let parts = self.criterion.compute(
            s_pred,
            mixed.s_targets,
            u_pred,
            mixed.u_targets,
            u1_pred,
            guessed,
            term,
            weights,
        )?;
        Ok((parts, scalars))
    }
}

/// Labeled and unlabeled loaders of a method
pub fn build_loaders(config: &RunConfig, split: &LabeledSplit) -> Result<ZipCycle> {
    let loaders = match config.run {
        Method::SupervisedFull => vec![BatchLoader::train(split.all(), config.batch_size_s, config.seed)?],
        Method::SupervisedPart => vec![BatchLoader::train(
            split.labeled.clone(),
            config.batch_size_s,
            config.seed,
        )?],
        Method::FixMatch | Method::MixMatch | Method::ReMixMatch => vec![
            BatchLoader::train(split.labeled.clone(), config.batch_size_s, config.seed)?,
            BatchLoader::train(
                split.unlabeled.clone(),
                config.batch_size_u,
                config.seed.wrapping_add(1),
            )?,
        ],
    };
    ZipCycle::new(loaders)
}

fn fixmatch_guesser<B: AutodiffBackend>(config: &RunConfig) -> Box<dyn Guesser<B>> {
    match (config.label_mode, config.mean_guesser) {
        (LabelMode::Multihot, _) => Box::new(MultihotGuesser {
            threshold: config.threshold_multihot,
        }),
        (LabelMode::Onehot, true) => Box::new(MeanArgmaxGuesser),
        (LabelMode::Onehot, false) if config.label_smoothing > 0.0 => Box::new(ArgmaxSmoothGuesser {
            smoothing: config.label_smoothing,
        }),
        (LabelMode::Onehot, false) => Box::new(ArgmaxGuesser),
    }
}

/// The step of the configured method
pub fn build_step<B: AutodiffBackend>(
    config: &RunConfig,
    batcher: SslBatcher<B>,
) -> Result<Box<dyn TrainStep<B>>> {
    let step: Box<dyn TrainStep<B>> = match config.run {
        Method::SupervisedFull | Method::SupervisedPart => Box::new(SupervisedStep {
            method: config.run,
            batcher,
            mode: config.label_mode,
            augment: config.supervised_augment,
            threshold: config.threshold_multihot,
        }),
        Method::FixMatch => Box::new(FixMatchStep {
            batcher,
            criterion: FixMatchLoss::from_config(config),
            guesser: fixmatch_guesser(config),
            nb_weak: if config.mean_guesser { config.nb_augms } else { 1 },
            threshold: config.threshold_multihot,
        }),
        Method::MixMatch => Box::new(MixMatchStep {
            batcher,
            criterion: MixMatchLoss {
                criterion_u: config.criterion_name_u,
            },
            guesser: MeanSharpenGuesser {
                temperature: config.sharpen_temperature,
            },
            mixer: MatchMixer::from_config(config),
            nb_augms: config.nb_augms,
        }),
        Method::ReMixMatch => {
            let distributions = ModelDistributions::labeled_unlabeled(
                config.history_size,
                config.nb_classes,
                config.label_mode,
            )?;
            let self_supervised = if config.uses_self_supervision() {
                SelfSupervisedTransform::new(config.self_supervised_component, config.seed)
            } else {
                None
            };
            Box::new(ReMixMatchStep {
                batcher,
                criterion: ReMixMatchLoss,
                guesser: AlignmentSharpenGuesser::new(distributions, config.sharpen_temperature),
                mixer: MatchMixer::from_config(config),
                self_supervised,
                nb_augms_strong: config.nb_augms_strong,
            })
        }
    };
    Ok(step)
}

/// Runs training epochs of one method
pub struct Trainer<B: AutodiffBackend> {
    step: Box<dyn TrainStep<B>>,
    loaders: ZipCycle,
    rng: ChaCha8Rng,
    log_interval: usize,
    debug_mode: bool,
    means: EpochMeans,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(step: Box<dyn TrainStep<B>>, loaders: ZipCycle, config: &RunConfig) -> Self {
        Self {
            step,
            loaders,
            rng: ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(2)),
            log_interval: config.log_interval.max(1),
            debug_mode: config.debug_mode,
            means: EpochMeans::new(),
        }
    }

    pub fn iterations_per_epoch(&self) -> usize {
        self.loaders.len()
    }

    /// One epoch over the zipped loaders. Returns the updated model and the
    /// epoch mean of every scalar.
    pub fn train_epoch<O>(
        &mut self,
        mut model: SslClassifier<B>,
        optimizer: &mut O,
        schedule: &mut WeightSchedule,
        lr: f64,
        epoch: usize,
        progress: Option<&ProgressBar>,
    ) -> Result<(SslClassifier<B>, Vec<(String, f64)>)>
    where
        O: Optimizer<SslClassifier<B>, B>,
    {
        self.means.reset();
        let batches = self.loaders.epoch();
        let nb_iterations = batches.len();

        for (i, batch) in batches.iter().enumerate() {
            let weights = schedule.current();
            let seed = self.rng.next_u64();

            let (parts, scalars) = self.step.loss(&model, batch, seed, &weights)?;
            for (name, value) in parts.scalars().into_iter().chain(scalars) {
                self.means.add(name, value);
            }
            self.means.add("lambda_u", weights.lambda_u);
            self.means.add("lr", lr);

            if self.debug_mode {
                trace!(
                    "Iteration {}: weights {:?}, loss parts {:?}",
                    i,
                    weights,
                    parts.scalars()
                );
            }

            let grads = parts.total.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(lr, model, grads);
            schedule.step_iteration()?;

            if let Some(pb) = progress {
                pb.inc(1);
            }
            if (i + 1) % self.log_interval == 0 || i + 1 == nb_iterations {
                debug!(
                    "{} epoch {}, {:>4}/{}: loss = {:.4}",
                    self.step.method(),
                    epoch + 1,
                    i + 1,
                    nb_iterations,
                    self.means.mean("loss").unwrap_or(f64::NAN)
                );
            }
        }

        Ok((model, self.means.means()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use burn::backend::{Autodiff, NdArray};
    use burn::optim::AdamConfig;

    use crate::dataset::augmentation::AugmentSet;
    use crate::dataset::batcher::ItemBatcher;
    use crate::dataset::{InMemoryDataset, SslItem};
    use crate::model::SslClassifierConfig;

    type TestBackend = Autodiff<NdArray>;

    const SHAPE: [usize; 3] = [3, 8, 8];

    fn config(run: Method) -> RunConfig {
        RunConfig {
            run,
            nb_classes: 3,
            batch_size_s: 4,
            batch_size_u: 4,
            nb_augms: 2,
            nb_augms_strong: 2,
            history_size: 8,
            supervised_ratio: 0.25,
            ..Default::default()
        }
    }

    fn dataset() -> Arc<InMemoryDataset> {
        let items = (0..24)
            .map(|i| SslItem {
                data: (0..192).map(|v| ((v * (i + 1)) % 17) as f32 / 17.0).collect(),
                label: i % 3,
            })
            .collect();
        Arc::new(InMemoryDataset::new(items, SHAPE).unwrap())
    }

    fn run_one_epoch(config: RunConfig) -> Vec<(String, f64)> {
        let device = Default::default();
        let dataset = dataset();
        let split = LabeledSplit::from_labels(
            &dataset.labels(),
            config.nb_classes,
            config.dataset_ratio,
            config.supervised_ratio,
            config.seed,
        )
        .unwrap();

        let batcher = SslBatcher::new(
            ItemBatcher::<TestBackend>::from_config(device, SHAPE, &config),
            dataset,
            Arc::new(AugmentSet::for_config(&config)),
        );
        let step = build_step(&config, batcher).unwrap();
        let loaders = build_loaders(&config, &split).unwrap();
        let mut trainer = Trainer::new(step, loaders, &config);
        let mut schedule =
            WeightSchedule::from_config(&config, trainer.iterations_per_epoch()).unwrap();

        let model = SslClassifierConfig::from_run_config(&config)
            .with_base_filters(2)
            .with_hidden_size(4)
            .init::<TestBackend>(&Default::default());
        let mut optimizer = AdamConfig::new().init();

        let (_, means) = trainer
            .train_epoch(model, &mut optimizer, &mut schedule, 1e-3, 0, None)
            .unwrap();
        means
    }

    fn names(means: &[(String, f64)]) -> Vec<&str> {
        means.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn test_supervised_epoch() {
        let means = run_one_epoch(config(Method::SupervisedPart));
        let names = names(&means);
        assert!(names.contains(&"loss"));
        assert!(names.contains(&"acc_s"));
        assert!(!names.contains(&"loss_u"));
        assert!(means.iter().all(|(_, v)| v.is_finite()));
    }

    #[test]
    fn test_fixmatch_epoch_reports_mask() {
        let means = run_one_epoch(config(Method::FixMatch));
        let names = names(&means);
        assert!(names.contains(&"loss_u"));
        assert!(names.contains(&"mask"));
        assert!(means.iter().all(|(_, v)| v.is_finite()));
    }

    #[test]
    fn test_mixmatch_epoch() {
        let means = run_one_epoch(config(Method::MixMatch));
        assert!(names(&means).contains(&"acc_u"));
        assert!(means.iter().all(|(_, v)| v.is_finite()));
    }

    #[test]
    fn test_remixmatch_epoch_with_self_supervision() {
        let means = run_one_epoch(config(Method::ReMixMatch));
        let names = names(&means);
        assert!(names.contains(&"loss_u1"));
        assert!(names.contains(&"loss_r"));
        assert!(names.contains(&"acc_r"));
        assert!(means.iter().all(|(_, v)| v.is_finite()));
    }

    #[test]
    fn test_semi_supervised_loaders_are_zipped() {
        let dataset = dataset();
        let config = config(Method::FixMatch);
        let split = LabeledSplit::from_labels(&dataset.labels(), 3, 1.0, 0.25, 0).unwrap();
        let loaders = build_loaders(&config, &split).unwrap();
        // 6 labeled examples give 1 batch, 18 unlabeled give 4
        assert_eq!(loaders.len(), 4);

        let supervised = build_loaders(&RunConfig { run: Method::SupervisedFull, ..config }, &split).unwrap();
        assert_eq!(supervised.len(), 6);
    }
}

//! Outer training loop
//!
//! Loads the data, builds the method's trainer, then for each epoch: train,
//! validate, write scalars, checkpoint on a new best `val/acc`, and step the
//! epoch schedules.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, AdamWConfig, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::{DatasetName, OptimizerKind, RunConfig};
use crate::dataset::batcher::ItemBatcher;
use crate::dataset::{load_datasets, AugmentSet, DatasetPair, LabeledSplit, SslBatcher};
use crate::model::{SslClassifier, SslClassifierConfig};
use crate::training::checkpoint::Checkpoint;
use crate::training::rampup::WeightSchedule;
use crate::training::scheduler::LRScheduler;
use crate::training::trainer::{build_loaders, build_step, Trainer};
use crate::training::validator::Validator;
use crate::utils::error::{Result, SslError};
use crate::utils::format_duration;
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::MetricsRecorder;
use crate::utils::writer::{ScalarWriter, ARGS_FILE, AUGMENTS_FILE};

/// What a finished run reports
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub best_acc: f64,
    pub best_epoch: Option<usize>,
    pub log_dir: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub metrics: MetricsRecorder,
}

/// Validate the config, read the dataset and train
pub fn run_training<B: AutodiffBackend>(config: &RunConfig, device: B::Device) -> Result<RunSummary> {
    config.validate()?;
    let data = load_datasets(config)?;
    train_on::<B>(config, data, device)
}

/// Train on already loaded data with the configured optimizer
pub fn train_on<B: AutodiffBackend>(
    config: &RunConfig,
    data: DatasetPair,
    device: B::Device,
) -> Result<RunSummary> {
    let weight_decay = config.weight_decay.map(WeightDecayConfig::new);
    match config.optimizer {
        OptimizerKind::Adam => {
            let optimizer = AdamConfig::new()
                .with_weight_decay(weight_decay)
                .init::<B, SslClassifier<B>>();
            fit(config, data, device, optimizer)
        }
        OptimizerKind::AdamW => {
            let mut optimizer_config = AdamWConfig::new();
            if let Some(penalty) = config.weight_decay {
                optimizer_config = optimizer_config.with_weight_decay(penalty as f32);
            }
            fit(config, data, device, optimizer_config.init::<B, SslClassifier<B>>())
        }
        OptimizerKind::Sgd => {
            let momentum = config
                .momentum
                .map(|momentum| MomentumConfig::new().with_momentum(momentum));
            let optimizer = SgdConfig::new()
                .with_weight_decay(weight_decay)
                .with_momentum(momentum)
                .init::<B, SslClassifier<B>>();
            fit(config, data, device, optimizer)
        }
    }
}

fn epoch_progress(total: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| SslError::Training(e.to_string()))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn fit<B, O>(config: &RunConfig, data: DatasetPair, device: B::Device, mut optimizer: O) -> Result<RunSummary>
where
    B: AutodiffBackend,
    O: Optimizer<SslClassifier<B>, B>,
{
    let shape = data.train.shape();
    let train = Arc::new(data.train);
    let val = Arc::new(data.val);

    let split = LabeledSplit::from_labels(
        &train.labels(),
        config.nb_classes,
        config.dataset_ratio,
        config.supervised_ratio,
        config.seed,
    )?;
    if config.standardize && config.dataset_name == DatasetName::Ubs8k {
        warn!("standardize only applies to CIFAR10, UBS8K spectrograms are used as is");
    }

    let augments = Arc::new(AugmentSet::for_config(config));
    let batcher = SslBatcher::new(
        ItemBatcher::<B>::from_config(device.clone(), shape, config),
        train.clone(),
        augments.clone(),
    );
    let loaders = build_loaders(config, &split)?;
    let mut trainer = Trainer::new(build_step(config, batcher)?, loaders, config);
    let mut validator = Validator::new(
        ItemBatcher::<B::InnerBackend>::from_config(device.clone(), shape, config),
        val.clone(),
        config.batch_size_s,
        config,
    )?;

    let iterations = trainer.iterations_per_epoch();
    let scheduler = LRScheduler::from_config(config);
    let mut schedule = WeightSchedule::from_config(config, iterations)?;
    let mut model = SslClassifierConfig::from_run_config(config).init::<B>(&device);

    let date = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let mut writer = if config.write_results {
        let writer = ScalarWriter::create(config.run_log_dir(&date))?;
        writer.write_json(ARGS_FILE, config)?;
        writer.write_json(AUGMENTS_FILE, augments.as_ref())?;
        Some(writer)
    } else {
        None
    };
    let mut checkpoint = config.write_results.then(|| Checkpoint::new(config));

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Method:            {}", config.run);
    println!("  Dataset:           {}", config.dataset_name);
    println!("  Training examples: {}", train.len());
    println!("  Labeled / unlabeled: {} / {}", split.labeled.len(), split.unlabeled.len());
    println!("  Validation examples: {}", val.len());
    println!("  Epochs:            {}", config.nb_epochs);
    println!("  Iterations/epoch:  {}", iterations);
    println!("  Device:            {:?}", device);
    if let Some(writer) = &writer {
        println!("  Run directory:     {:?}", writer.log_dir());
    }
    println!();

    let mut recorder = MetricsRecorder::new();
    let mut logger = TrainingLogger::new(config.run, config.nb_epochs);
    let pb = epoch_progress((config.nb_epochs * iterations) as u64)?;
    let start = Instant::now();

    for epoch in 0..config.nb_epochs {
        logger.start_epoch(epoch);
        pb.set_message(format!("epoch {}/{}", epoch + 1, config.nb_epochs));
        let lr = scheduler.get_lr(epoch);

        let (trained, train_means) =
            trainer.train_epoch(model, &mut optimizer, &mut schedule, lr, epoch, Some(&pb))?;
        model = trained;

        let result = validator.validate(&model.valid())?;
        recorder.record("val/acc", result.acc);
        recorder.record("val/ce", result.ce);
        for (name, value) in &train_means {
            recorder.record(&format!("train/{}", name), *value);
        }

        if let Some(writer) = writer.as_mut() {
            for (name, value) in &train_means {
                writer.add_scalar(&format!("train/{}", name), *value, epoch)?;
            }
            writer.add_scalar("val/acc", result.acc, epoch)?;
            writer.add_scalar("val/ce", result.ce, epoch)?;
            writer.add_scalar("val/acc_max", recorder.max("val/acc").unwrap_or(result.acc), epoch)?;
            writer.add_scalar("val/ce_min", recorder.min("val/ce").unwrap_or(result.ce), epoch)?;
            writer.flush()?;
        }

        let train_loss = train_means
            .iter()
            .find(|(name, _)| name == "loss")
            .map_or(f64::NAN, |(_, v)| *v);
        logger.end_epoch(train_loss, result.acc, result.ce, lr);

        if let Some(checkpoint) = checkpoint.as_mut() {
            if checkpoint.step(result.acc, epoch, &model, &optimizer)? {
                logger.log_new_best(result.acc);
            }
        }

        schedule.step_epoch()?;
    }
    pb.finish_and_clear();

    let best_acc = recorder.max("val/acc").unwrap_or(0.0);
    logger.log_complete(best_acc);

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Best val/acc: {:.2}%", best_acc * 100.0);
    println!("  Duration:     {}", format_duration(start.elapsed().as_secs_f64()));
    println!();
    println!("{}", "Metrics (min / max over epochs):".cyan().bold());
    println!("{}", recorder.summary());
    info!("Run finished: best val/acc = {:.4}", best_acc);

    Ok(RunSummary {
        best_acc,
        best_epoch: recorder.best_epoch("val/acc"),
        log_dir: writer.as_ref().map(|w| w.log_dir().to_path_buf()),
        checkpoint: checkpoint.as_ref().map(|c| c.metadata_path()),
        metrics: recorder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    use crate::config::Method;
    use crate::dataset::{InMemoryDataset, SslItem};
    use crate::utils::writer::SCALARS_FILE;

    type TestBackend = Autodiff<NdArray>;

    fn images(len: usize, offset: usize) -> InMemoryDataset {
        let items = (0..len)
            .map(|i| SslItem {
                data: (0..3 * 32 * 32)
                    .map(|v| ((v + i + offset) % 29) as f32 / 29.0)
                    .collect(),
                label: i % 2,
            })
            .collect();
        InMemoryDataset::new(items, [3, 32, 32]).unwrap()
    }

    fn config(run: Method, dir: &std::path::Path) -> RunConfig {
        RunConfig {
            run,
            nb_classes: 2,
            nb_epochs: 2,
            batch_size_s: 4,
            batch_size_u: 4,
            supervised_ratio: 0.5,
            nb_augms: 2,
            nb_augms_strong: 1,
            history_size: 16,
            logdir: dir.join("logs"),
            checkpoint_path: dir.join("models"),
            suffix: "test".to_string(),
            ..Default::default()
        }
    }

    fn data() -> DatasetPair {
        DatasetPair {
            train: images(16, 0),
            val: images(8, 7),
        }
    }

    #[test]
    fn test_fixmatch_run_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(Method::FixMatch, dir.path());
        let summary = train_on::<TestBackend>(&config, data(), Default::default()).unwrap();

        assert!((0.0..=1.0).contains(&summary.best_acc));
        assert!(summary.best_epoch.is_some());
        assert_eq!(summary.metrics.history("val/acc").unwrap().values.len(), 2);

        let log_dir = summary.log_dir.unwrap();
        assert!(log_dir.join(ARGS_FILE).exists());
        assert!(log_dir.join(AUGMENTS_FILE).exists());
        let scalars = std::fs::read_to_string(log_dir.join(SCALARS_FILE)).unwrap();
        assert!(scalars.contains("\"train/loss_u\""));
        assert!(scalars.contains("\"val/acc_max\""));

        assert!(summary.checkpoint.unwrap().exists());
    }

    #[test]
    fn test_supervised_run_without_results() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            write_results: false,
            optimizer: OptimizerKind::Sgd,
            momentum: Some(0.9),
            weight_decay: Some(5e-4),
            ..config(Method::SupervisedFull, dir.path())
        };
        let summary = train_on::<TestBackend>(&config, data(), Default::default()).unwrap();
        assert!(summary.log_dir.is_none());
        assert!(summary.checkpoint.is_none());
        assert!(!dir.path().join("logs").exists());
    }

    #[test]
    fn test_too_few_labeled_examples() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            supervised_ratio: 0.1,
            batch_size_s: 8,
            batch_size_u: 8,
            ..config(Method::MixMatch, dir.path())
        };
        assert!(train_on::<TestBackend>(&config, data(), Default::default()).is_err());
    }

    #[test]
    fn test_adam_and_adamw_accept_weight_decay() {
        let dir = tempfile::tempdir().unwrap();
        for optimizer in [OptimizerKind::Adam, OptimizerKind::AdamW] {
            let config = RunConfig {
                write_results: false,
                optimizer,
                weight_decay: Some(1e-4),
                nb_epochs: 1,
                ..config(Method::SupervisedPart, dir.path())
            };
            let summary = train_on::<TestBackend>(&config, data(), Default::default()).unwrap();
            assert_eq!(summary.metrics.history("val/acc").unwrap().values.len(), 1);
        }
    }
}

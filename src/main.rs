//! match_ssl CLI
//!
//! Trains one method on one dataset (one UBS8K fold) per invocation.
//! Flags override the defaults, an optional TOML `--config` sits under the
//! flags, and each `--args-file` overrides everything given before it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use match_ssl::backend::{backend_name, default_device, TrainingBackend};
use match_ssl::config::{
    parse_bool, parse_optional_f64, AugmentStrength, DatasetName, LabelMode, Method,
    MixUpDistribution, OptimizerKind, RampUpSteps, RunConfig, SchedulerKind, SelfSupervisedKind,
    UnilossMode, UnsupervisedCriterion,
};
use match_ssl::training::run_training;
use match_ssl::utils::logging::{init_logging, LogConfig};

/// Semi-supervised training with FixMatch, MixMatch and ReMixMatch
#[derive(Parser, Debug)]
#[command(name = "match_ssl")]
#[command(version)]
#[command(about = "Semi-supervised classification on CIFAR10 and UrbanSound8K with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model
    Train(ConfigArgs),

    /// Print the resolved and validated configuration as JSON
    ShowConfig(ConfigArgs),
}

/// Value of a flag that accepts "none"
#[derive(Debug, Clone, Copy)]
struct MaybeF64(Option<f64>);

fn parse_maybe_f64(s: &str) -> match_ssl::Result<MaybeF64> {
    parse_optional_f64(s).map(MaybeF64)
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// TOML file with RunConfig keys, applied below the command-line flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file with RunConfig keys, applied above the flags (repeatable, later wins)
    #[arg(long = "args-file")]
    args_file: Vec<PathBuf>,

    #[command(flatten)]
    flags: RunFlags,
}

#[derive(Args, Debug)]
struct RunFlags {
    /// fixmatch|fm, mixmatch|mm, remixmatch|rmm, supervised_full|sf, supervised_part|sp
    #[arg(long)]
    run: Option<Method>,
    #[arg(long)]
    seed: Option<u64>,
    /// Log per-batch values at trace level
    #[arg(long, value_parser = parse_bool)]
    debug_mode: Option<bool>,
    #[arg(long)]
    suffix: Option<String>,

    #[arg(long)]
    dataset_path: Option<PathBuf>,
    /// cifar10 or ubs8k
    #[arg(long)]
    dataset_name: Option<DatasetName>,
    #[arg(long)]
    nb_classes: Option<usize>,
    /// onehot or multihot
    #[arg(long)]
    label_mode: Option<LabelMode>,
    /// UBS8K validation fold (1 to 10)
    #[arg(long)]
    fold_val: Option<usize>,
    #[arg(long)]
    dataset_ratio: Option<f64>,
    #[arg(long)]
    supervised_ratio: Option<f64>,
    /// Standardize CIFAR10 inputs per channel
    #[arg(long, value_parser = parse_bool)]
    standardize: Option<bool>,

    #[arg(long)]
    logdir: Option<PathBuf>,
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,
    #[arg(long, value_parser = parse_bool)]
    write_results: Option<bool>,
    #[arg(long)]
    checkpoint_metric_name: Option<String>,
    #[arg(long)]
    log_interval: Option<usize>,

    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    dropout: Option<f64>,
    #[arg(long)]
    nb_epochs: Option<usize>,
    #[arg(long)]
    batch_size_s: Option<usize>,
    #[arg(long)]
    batch_size_u: Option<usize>,

    /// adam, adamw or sgd
    #[arg(long)]
    optimizer: Option<OptimizerKind>,
    /// cosine, step or none
    #[arg(long)]
    scheduler: Option<SchedulerKind>,
    #[arg(long)]
    lr: Option<f64>,
    /// Weight decay, or "none"
    #[arg(long, value_parser = parse_maybe_f64)]
    weight_decay: Option<MaybeF64>,
    /// SGD momentum, or "none"
    #[arg(long, value_parser = parse_maybe_f64)]
    momentum: Option<MaybeF64>,
    #[arg(long)]
    lr_decay_ratio: Option<f64>,
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    epoch_steps: Option<Vec<usize>>,

    #[arg(long, value_parser = parse_bool)]
    use_rampup: Option<bool>,
    /// Ramp-up length in steps, or "nb_epochs"
    #[arg(long)]
    nb_rampup_steps: Option<RampUpSteps>,
    #[arg(long, value_parser = parse_bool)]
    rampup_each_epoch: Option<bool>,

    #[arg(long)]
    lambda_s: Option<f64>,
    #[arg(long)]
    lambda_u: Option<f64>,
    #[arg(long)]
    lambda_u1: Option<f64>,
    #[arg(long)]
    lambda_r: Option<f64>,

    #[arg(long)]
    nb_augms: Option<usize>,
    #[arg(long)]
    nb_augms_strong: Option<usize>,
    #[arg(long)]
    history_size: Option<usize>,
    /// RandAugment magnitude in [0, 10], or "none" for a random magnitude
    #[arg(long, value_parser = parse_maybe_f64)]
    ra_magnitude: Option<MaybeF64>,
    #[arg(long)]
    ra_nb_choices: Option<usize>,

    #[arg(long)]
    threshold_confidence: Option<f64>,
    #[arg(long)]
    threshold_multihot: Option<f64>,
    /// cross_entropy or sq_diff
    #[arg(long)]
    criterion_name_u: Option<UnsupervisedCriterion>,

    #[arg(long)]
    sharpen_temperature: Option<f64>,
    #[arg(long)]
    mixup_alpha: Option<f64>,
    /// beta, uniform or constant
    #[arg(long)]
    mixup_distribution_name: Option<MixUpDistribution>,
    #[arg(long, value_parser = parse_bool)]
    shuffle_s_with_u: Option<bool>,

    /// none, weak or strong
    #[arg(long)]
    supervised_augment: Option<AugmentStrength>,
    #[arg(long)]
    label_smoothing: Option<f64>,
    #[arg(long)]
    nb_classes_self_supervised: Option<usize>,
    /// rotation, flips or none
    #[arg(long)]
    self_supervised_component: Option<SelfSupervisedKind>,

    #[arg(long, value_parser = parse_bool)]
    mean_guesser: Option<bool>,
    /// none, constant_epoch_three_phase, constant_epoch_two_phase or weight_linear
    #[arg(long)]
    uniloss: Option<UnilossMode>,
    #[arg(long, value_parser = parse_bool)]
    wlu_on_epoch: Option<bool>,
    #[arg(long)]
    wlu_steps: Option<usize>,
}

macro_rules! override_fields {
    ($flags:ident, $config:ident; $($field:ident),* $(,)?) => {
        $(
            if let Some(value) = $flags.$field {
                $config.$field = value;
            }
        )*
    };
}

impl RunFlags {
    fn apply(self, mut config: RunConfig) -> RunConfig {
        let flags = self;
        override_fields!(flags, config;
            run, seed, debug_mode, suffix,
            dataset_path, dataset_name, nb_classes, label_mode, fold_val,
            dataset_ratio, supervised_ratio, standardize,
            logdir, checkpoint_path, write_results, checkpoint_metric_name, log_interval,
            model, dropout, nb_epochs, batch_size_s, batch_size_u,
            optimizer, scheduler, lr, lr_decay_ratio, epoch_steps,
            use_rampup, nb_rampup_steps, rampup_each_epoch,
            lambda_s, lambda_u, lambda_u1, lambda_r,
            nb_augms, nb_augms_strong, history_size, ra_nb_choices,
            threshold_confidence, threshold_multihot, criterion_name_u,
            sharpen_temperature, mixup_alpha, mixup_distribution_name, shuffle_s_with_u,
            supervised_augment, label_smoothing, nb_classes_self_supervised,
            self_supervised_component, mean_guesser, uniloss, wlu_on_epoch, wlu_steps,
        );
        if let Some(MaybeF64(value)) = flags.weight_decay {
            config.weight_decay = value;
        }
        if let Some(MaybeF64(value)) = flags.momentum {
            config.momentum = value;
        }
        if let Some(MaybeF64(value)) = flags.ra_magnitude {
            config.ra_magnitude = value;
        }
        config
    }
}

impl ConfigArgs {
    fn resolve(self) -> Result<RunConfig> {
        let mut config = RunConfig::default();
        if let Some(path) = &self.config {
            config = config
                .merge_toml_file(path)
                .with_context(|| format!("Failed to apply config file {:?}", path))?;
        }
        config = self.flags.apply(config);
        for path in &self.args_file {
            config = config
                .merge_json_file(path)
                .with_context(|| format!("Failed to apply arguments file {:?}", path))?;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn print_banner() {
    println!();
    println!("{}", "match_ssl".cyan().bold());
    println!(
        "{}",
        format!("v{} | backend: {}", match_ssl::VERSION, backend_name()).dimmed()
    );
    println!();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => {
            let config = args.resolve()?;

            let log_config = if config.debug_mode {
                LogConfig::trace()
            } else if cli.verbose {
                LogConfig::verbose()
            } else {
                LogConfig::default()
            };
            let _ = init_logging(&log_config);

            print_banner();
            info!("Training {} on {}", config.run, config.dataset_name);

            let summary = run_training::<TrainingBackend>(&config, default_device())
                .context("Training failed")?;

            if let Some(dir) = &summary.log_dir {
                println!("  Results:    {:?}", dir);
            }
            if let Some(path) = &summary.checkpoint {
                println!("  Checkpoint: {:?}", path);
            }
        }

        Commands::ShowConfig(args) => {
            let config = args.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RunConfig {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Train(args) | Commands::ShowConfig(args) => args.resolve().unwrap(),
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "match_ssl",
            "train",
            "--run",
            "mm",
            "--lr",
            "0.003",
            "--use-rampup",
            "true",
            "--weight-decay",
            "none",
            "--epoch-steps",
            "10,20",
        ]);
        assert_eq!(config.run, Method::MixMatch);
        assert_eq!(config.lr, 0.003);
        assert!(config.use_rampup);
        assert_eq!(config.weight_decay, None);
        assert_eq!(config.epoch_steps, vec![10, 20]);
        assert_eq!(config.seed, RunConfig::default().seed);
    }

    #[test]
    fn test_args_files_override_flags_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        std::fs::write(&first, r#"{"lr": 0.01, "seed": 7}"#).unwrap();
        std::fs::write(&second, r#"{"lr": 0.02}"#).unwrap();

        let config = parse(&[
            "match_ssl",
            "show-config",
            "--lr",
            "0.5",
            "--args-file",
            first.to_str().unwrap(),
            "--args-file",
            second.to_str().unwrap(),
        ]);
        assert_eq!(config.lr, 0.02);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cli = Cli::try_parse_from([
            "match_ssl",
            "train",
            "--run",
            "rmm",
            "--batch-size-s",
            "32",
            "--batch-size-u",
            "64",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else {
            panic!("expected the train command");
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn test_unknown_run_is_a_parse_error() {
        assert!(Cli::try_parse_from(["match_ssl", "train", "--run", "pseudo"]).is_err());
    }
}

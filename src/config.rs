//! Run configuration
//!
//! `RunConfig` gathers every hyperparameter of a training run. It is built from
//! command-line flags, optionally overridden by TOML/JSON files, validated once
//! and then passed read-only to the rest of the crate. The resolved config is
//! saved as `args.json` in the run directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{Result, SslError};

/// Training method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[serde(alias = "fm")]
    FixMatch,
    #[serde(alias = "mm")]
    MixMatch,
    #[serde(alias = "rmm")]
    ReMixMatch,
    #[serde(alias = "sf")]
    SupervisedFull,
    #[serde(alias = "sp")]
    SupervisedPart,
}

impl Method {
    /// Name used in checkpoint files and run directories
    pub fn train_name(&self) -> &'static str {
        match self {
            Method::FixMatch => "FixMatch",
            Method::MixMatch => "MixMatch",
            Method::ReMixMatch => "ReMixMatch",
            Method::SupervisedFull => "Supervised_Full",
            Method::SupervisedPart => "Supervised_Part",
        }
    }

    pub fn is_semi_supervised(&self) -> bool {
        matches!(self, Method::FixMatch | Method::MixMatch | Method::ReMixMatch)
    }
}

impl FromStr for Method {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fixmatch" | "fm" => Ok(Method::FixMatch),
            "mixmatch" | "mm" => Ok(Method::MixMatch),
            "remixmatch" | "rmm" => Ok(Method::ReMixMatch),
            "supervised_full" | "sf" => Ok(Method::SupervisedFull),
            "supervised_part" | "sp" => Ok(Method::SupervisedPart),
            other => Err(SslError::Config(format!("Unknown run \"{}\"", other))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::FixMatch => "fixmatch",
            Method::MixMatch => "mixmatch",
            Method::ReMixMatch => "remixmatch",
            Method::SupervisedFull => "supervised_full",
            Method::SupervisedPart => "supervised_part",
        };
        write!(f, "{}", name)
    }
}

/// Dataset to train on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetName {
    #[serde(rename = "CIFAR10", alias = "cifar10")]
    Cifar10,
    #[serde(rename = "UBS8K", alias = "ubs8k")]
    Ubs8k,
}

impl FromStr for DatasetName {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cifar10" => Ok(DatasetName::Cifar10),
            "ubs8k" => Ok(DatasetName::Ubs8k),
            other => Err(SslError::Config(format!("Unknown dataset \"{}\"", other))),
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetName::Cifar10 => write!(f, "CIFAR10"),
            DatasetName::Ubs8k => write!(f, "UBS8K"),
        }
    }
}

/// Single-label (softmax) or multi-label (sigmoid) targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelMode {
    Onehot,
    Multihot,
}

impl FromStr for LabelMode {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "onehot" => Ok(LabelMode::Onehot),
            "multihot" => Ok(LabelMode::Multihot),
            other => Err(SslError::Config(format!("Invalid mode \"{}\"", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    #[serde(rename = "adamw")]
    AdamW,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(SslError::Config(format!("Unknown optimizer \"{}\"", other))),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "Adam"),
            OptimizerKind::AdamW => write!(f, "AdamW"),
            OptimizerKind::Sgd => write!(f, "SGD"),
        }
    }
}

/// Learning-rate schedule, stepped once per epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    #[serde(alias = "cosinelrscheduler")]
    Cosine,
    #[serde(alias = "steplrscheduler", alias = "multisteplr")]
    Step,
    None,
}

impl FromStr for SchedulerKind {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" | "cosinelrscheduler" => Ok(SchedulerKind::Cosine),
            "step" | "steplrscheduler" | "multisteplr" => Ok(SchedulerKind::Step),
            "none" => Ok(SchedulerKind::None),
            other => Err(SslError::Config(format!("Unknown scheduler \"{}\"", other))),
        }
    }
}

/// Criterion applied to the mixed unlabeled part of MixMatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupervisedCriterion {
    #[serde(alias = "sq_l2norm")]
    SqDiff,
    #[serde(alias = "ce")]
    CrossEntropy,
}

impl FromStr for UnsupervisedCriterion {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sq_diff" | "sq_l2norm" => Ok(UnsupervisedCriterion::SqDiff),
            "cross_entropy" | "ce" => Ok(UnsupervisedCriterion::CrossEntropy),
            other => Err(SslError::Config(format!(
                "Unknown unsupervised criterion \"{}\"",
                other
            ))),
        }
    }
}

/// Self-supervised transform used by ReMixMatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfSupervisedKind {
    Rotation,
    Flips,
    None,
}

impl FromStr for SelfSupervisedKind {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rotation" => Ok(SelfSupervisedKind::Rotation),
            "flips" => Ok(SelfSupervisedKind::Flips),
            "none" => Ok(SelfSupervisedKind::None),
            other => Err(SslError::Config(format!(
                "Invalid self supervised component \"{}\"",
                other
            ))),
        }
    }
}

/// Which augmentation supervised baselines train on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AugmentStrength {
    None,
    Weak,
    Strong,
}

impl FromStr for AugmentStrength {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AugmentStrength::None),
            "weak" => Ok(AugmentStrength::Weak),
            "strong" => Ok(AugmentStrength::Strong),
            other => Err(SslError::Config(format!(
                "Invalid supervised augment choice \"{}\"",
                other
            ))),
        }
    }
}

/// Distribution MixUp draws its coefficient from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixUpDistribution {
    Beta,
    Uniform,
    Constant,
}

impl FromStr for MixUpDistribution {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "beta" => Ok(MixUpDistribution::Beta),
            "uniform" => Ok(MixUpDistribution::Uniform),
            "constant" => Ok(MixUpDistribution::Constant),
            other => Err(SslError::Config(format!(
                "Unknown MixUp distribution \"{}\"",
                other
            ))),
        }
    }
}

/// Experimental single-loss selection schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnilossMode {
    None,
    /// Supervised only, then one of the two at random, then unsupervised only
    ConstantEpochThreePhase,
    /// Supervised only, then one of the two at random
    ConstantEpochTwoPhase,
    /// Activation probabilities move linearly from supervised to unsupervised
    WeightLinear,
}

impl FromStr for UnilossMode {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(UnilossMode::None),
            "constant_epoch_three_phase" | "ceu_1" => Ok(UnilossMode::ConstantEpochThreePhase),
            "constant_epoch_two_phase" | "ceu_2" => Ok(UnilossMode::ConstantEpochTwoPhase),
            "weight_linear" | "wlu" => Ok(UnilossMode::WeightLinear),
            other => Err(SslError::Config(format!("Invalid uniloss mode \"{}\"", other))),
        }
    }
}

/// Ramp-up length: a fixed number of steps, or the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RampUpStepsRepr", into = "RampUpStepsRepr")]
pub enum RampUpSteps {
    Steps(usize),
    NbEpochs,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RampUpStepsRepr {
    Steps(usize),
    Name(String),
}

impl TryFrom<RampUpStepsRepr> for RampUpSteps {
    type Error = SslError;

    fn try_from(repr: RampUpStepsRepr) -> Result<Self> {
        match repr {
            RampUpStepsRepr::Steps(n) => Ok(RampUpSteps::Steps(n)),
            RampUpStepsRepr::Name(name) => name.parse(),
        }
    }
}

impl From<RampUpSteps> for RampUpStepsRepr {
    fn from(steps: RampUpSteps) -> Self {
        match steps {
            RampUpSteps::Steps(n) => RampUpStepsRepr::Steps(n),
            RampUpSteps::NbEpochs => RampUpStepsRepr::Name("nb_epochs".to_string()),
        }
    }
}

impl FromStr for RampUpSteps {
    type Err = SslError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "nb_epochs" {
            return Ok(RampUpSteps::NbEpochs);
        }
        s.parse::<usize>().map(RampUpSteps::Steps).map_err(|_| {
            SslError::Config(format!(
                "Invalid ramp-up steps \"{}\", expected an integer or \"nb_epochs\"",
                s
            ))
        })
    }
}

/// Parse a boolean flag value
pub fn parse_bool(s: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        other => Err(SslError::Config(format!("Invalid boolean value \"{}\"", other))),
    }
}

/// Parse an optional float where "none" means absent
pub fn parse_optional_f64(s: &str) -> Result<Option<f64>> {
    if s.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    s.parse::<f64>()
        .map(Some)
        .map_err(|_| SslError::Config(format!("Invalid float value \"{}\"", s)))
}

/// Every hyperparameter of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub run: Method,
    pub seed: u64,
    pub debug_mode: bool,
    pub suffix: String,

    pub dataset_path: PathBuf,
    pub dataset_name: DatasetName,
    pub nb_classes: usize,
    pub label_mode: LabelMode,
    /// UBS8K fold held out for validation (1..=10)
    pub fold_val: usize,
    pub dataset_ratio: f64,
    pub supervised_ratio: f64,
    /// Standardize CIFAR10 channels with the dataset mean and std
    pub standardize: bool,

    pub logdir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub write_results: bool,
    pub checkpoint_metric_name: String,
    pub log_interval: usize,

    pub model: String,
    pub dropout: f64,
    pub nb_epochs: usize,
    pub batch_size_s: usize,
    pub batch_size_u: usize,

    pub optimizer: OptimizerKind,
    pub scheduler: SchedulerKind,
    pub lr: f64,
    pub weight_decay: Option<f64>,
    pub momentum: Option<f64>,
    pub lr_decay_ratio: f64,
    pub epoch_steps: Vec<usize>,

    pub use_rampup: bool,
    pub nb_rampup_steps: RampUpSteps,
    pub rampup_each_epoch: bool,

    pub lambda_s: f64,
    pub lambda_u: f64,
    pub lambda_u1: f64,
    pub lambda_r: f64,

    pub nb_augms: usize,
    pub nb_augms_strong: usize,
    pub history_size: usize,
    /// RandAugment magnitude in [0, 10], random per call when unset
    pub ra_magnitude: Option<f64>,
    pub ra_nb_choices: usize,

    pub threshold_confidence: f64,
    pub threshold_multihot: f64,
    pub criterion_name_u: UnsupervisedCriterion,

    pub sharpen_temperature: f64,
    pub mixup_alpha: f64,
    pub mixup_distribution_name: MixUpDistribution,
    pub shuffle_s_with_u: bool,

    pub supervised_augment: AugmentStrength,
    pub label_smoothing: f64,
    pub nb_classes_self_supervised: usize,
    pub self_supervised_component: SelfSupervisedKind,

    pub mean_guesser: bool,
    pub uniloss: UnilossMode,
    pub wlu_on_epoch: bool,
    pub wlu_steps: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run: Method::FixMatch,
            seed: 123,
            debug_mode: false,
            suffix: String::new(),

            dataset_path: PathBuf::from("../dataset/CIFAR10"),
            dataset_name: DatasetName::Cifar10,
            nb_classes: 10,
            label_mode: LabelMode::Onehot,
            fold_val: 10,
            dataset_ratio: 1.0,
            supervised_ratio: 0.1,
            standardize: false,

            logdir: PathBuf::from("../../tensorboard"),
            checkpoint_path: PathBuf::from("../models"),
            write_results: true,
            checkpoint_metric_name: "acc".to_string(),
            log_interval: 50,

            model: "SslCnn".to_string(),
            dropout: 0.5,
            nb_epochs: 300,
            batch_size_s: 64,
            batch_size_u: 64,

            optimizer: OptimizerKind::Adam,
            scheduler: SchedulerKind::Cosine,
            lr: 1e-3,
            weight_decay: None,
            momentum: None,
            lr_decay_ratio: 0.2,
            epoch_steps: vec![60, 120, 160],

            use_rampup: false,
            nb_rampup_steps: RampUpSteps::NbEpochs,
            rampup_each_epoch: true,

            lambda_s: 1.0,
            lambda_u: 1.0,
            lambda_u1: 0.5,
            lambda_r: 0.5,

            nb_augms: 2,
            nb_augms_strong: 8,
            history_size: 128 * 64,
            ra_magnitude: None,
            ra_nb_choices: 1,

            threshold_confidence: 0.95,
            threshold_multihot: 0.5,
            criterion_name_u: UnsupervisedCriterion::CrossEntropy,

            sharpen_temperature: 0.5,
            mixup_alpha: 0.75,
            mixup_distribution_name: MixUpDistribution::Beta,
            shuffle_s_with_u: true,

            supervised_augment: AugmentStrength::None,
            label_smoothing: 0.0,
            nb_classes_self_supervised: 4,
            self_supervised_component: SelfSupervisedKind::Flips,

            mean_guesser: false,
            uniloss: UnilossMode::None,
            wlu_on_epoch: true,
            wlu_steps: 10,
        }
    }
}

impl RunConfig {
    /// Ramp-up length in steps, resolving `nb_epochs`. Zero means no ramp-up.
    pub fn rampup_steps(&self) -> usize {
        if !self.use_rampup {
            return 0;
        }
        match self.nb_rampup_steps {
            RampUpSteps::Steps(n) => n,
            RampUpSteps::NbEpochs => self.nb_epochs,
        }
    }

    /// Whether ReMixMatch adds the self-supervised loss
    pub fn uses_self_supervision(&self) -> bool {
        self.run == Method::ReMixMatch && self.self_supervised_component != SelfSupervisedKind::None
    }

    /// `<run>_<dataset>_<model>_<date>_<suffix>` under `logdir`
    pub fn run_log_dir(&self, date: &str) -> PathBuf {
        let mut name = format!(
            "{}_{}_{}_{}",
            self.run.train_name(),
            self.dataset_name,
            self.model,
            date
        );
        if self.dataset_name == DatasetName::Ubs8k {
            name.push_str(&format!("_fold{}", self.fold_val));
        }
        if !self.suffix.is_empty() {
            name.push('_');
            name.push_str(&self.suffix);
        }
        self.logdir.join(name)
    }

    /// Checkpoint path stem `<model>_<run>_<suffix>` under `checkpoint_path`
    pub fn checkpoint_stem(&self) -> PathBuf {
        self.checkpoint_path.join(format!(
            "{}_{}_{}",
            self.model,
            self.run.train_name(),
            self.suffix
        ))
    }

    /// Check every constraint between hyperparameters
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SslError::Config(msg));

        if self.nb_classes == 0 {
            return fail("nb_classes must be greater than 0".to_string());
        }
        if self.nb_epochs == 0 {
            return fail("nb_epochs must be greater than 0".to_string());
        }
        if self.batch_size_s == 0 || self.batch_size_u == 0 {
            return fail("Batch sizes must be greater than 0".to_string());
        }
        if self.lr <= 0.0 {
            return fail(format!("Learning rate must be positive, got {}", self.lr));
        }
        if !(self.dataset_ratio > 0.0 && self.dataset_ratio <= 1.0) {
            return fail(format!(
                "dataset_ratio must be in (0, 1], got {}",
                self.dataset_ratio
            ));
        }
        if !(self.supervised_ratio > 0.0 && self.supervised_ratio <= 1.0) {
            return fail(format!(
                "supervised_ratio must be in (0, 1], got {}",
                self.supervised_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold_confidence) {
            return fail(format!(
                "threshold_confidence must be in [0, 1], got {}",
                self.threshold_confidence
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold_multihot) {
            return fail(format!(
                "threshold_multihot must be in [0, 1], got {}",
                self.threshold_multihot
            ));
        }
        if self.sharpen_temperature <= 0.0 {
            return fail("sharpen_temperature must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return fail(format!(
                "label_smoothing must be in [0, 1), got {}",
                self.label_smoothing
            ));
        }
        if self.mixup_alpha <= 0.0 && self.mixup_distribution_name == MixUpDistribution::Beta {
            return fail("mixup_alpha must be positive for the beta distribution".to_string());
        }
        if self.nb_augms == 0 || self.nb_augms_strong == 0 {
            return fail("nb_augms and nb_augms_strong must be at least 1".to_string());
        }
        if self.ra_nb_choices == 0 {
            return fail("ra_nb_choices must be at least 1".to_string());
        }
        if let Some(m) = self.ra_magnitude {
            if !(0.0..=10.0).contains(&m) {
                return fail(format!("ra_magnitude must be in [0, 10], got {}", m));
            }
        }
        if self.history_size == 0 {
            return fail("history_size must be greater than 0".to_string());
        }
        if self.checkpoint_metric_name != "acc" {
            return fail(format!(
                "Unknown checkpoint metric \"{}\", only \"acc\" is supported",
                self.checkpoint_metric_name
            ));
        }
        if self.dataset_name == DatasetName::Ubs8k && !(1..=10).contains(&self.fold_val) {
            return fail(format!("fold_val must be in 1..=10, got {}", self.fold_val));
        }
        if self.scheduler == SchedulerKind::Step && self.epoch_steps.is_empty() {
            return fail("The step scheduler needs at least one epoch step".to_string());
        }

        if matches!(self.run, Method::MixMatch | Method::ReMixMatch)
            && self.batch_size_s != self.batch_size_u
        {
            return fail(format!(
                "Supervised and unsupervised batch size must be equal. ({} != {})",
                self.batch_size_s, self.batch_size_u
            ));
        }

        if self.label_mode == LabelMode::Multihot
            && matches!(self.run, Method::MixMatch | Method::ReMixMatch)
        {
            return fail(format!("{} only supports the onehot mode", self.run));
        }

        if self.label_mode == LabelMode::Multihot && self.mean_guesser {
            return fail("The mean guesser only supports the onehot mode".to_string());
        }

        if self.uses_self_supervision() {
            if self.nb_classes_self_supervised != 4 {
                return fail(format!(
                    "Invalid self supervised transform: it has 4 classes but nb_classes_self_supervised = {}",
                    self.nb_classes_self_supervised
                ));
            }
            if self.self_supervised_component == SelfSupervisedKind::Rotation
                && self.dataset_name == DatasetName::Ubs8k
            {
                return fail("Rotation needs square inputs, use \"flips\" on UBS8K".to_string());
            }
        }

        match self.uniloss {
            UnilossMode::None => {}
            UnilossMode::ConstantEpochThreePhase | UnilossMode::ConstantEpochTwoPhase => {
                if self.run != Method::MixMatch {
                    return fail("Constant epoch uniloss is only available for MixMatch".to_string());
                }
                if self.use_rampup {
                    return fail("Constant epoch uniloss cannot be used with RampUp".to_string());
                }
                if self.nb_epochs < 10 {
                    return fail(format!(
                        "Cannot train with constant epoch uniloss with less than 10 epochs (got {})",
                        self.nb_epochs
                    ));
                }
            }
            UnilossMode::WeightLinear => {
                if !self.run.is_semi_supervised() {
                    return fail("Weight linear uniloss needs a semi-supervised run".to_string());
                }
                if self.wlu_steps == 0 {
                    return fail("wlu_steps must be greater than 0".to_string());
                }
            }
        }

        Ok(())
    }

    /// Overlay the keys of a JSON object on top of this config
    pub fn merge_value(&self, overrides: Value) -> Result<Self> {
        let Value::Object(overrides) = overrides else {
            return Err(SslError::Config(
                "Arguments file must contain a JSON object".to_string(),
            ));
        };
        let mut base = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut base {
            for (key, value) in overrides {
                if !map.contains_key(&key) {
                    return Err(SslError::Config(format!("Unknown argument \"{}\"", key)));
                }
                map.insert(key, value);
            }
        }
        Ok(serde_json::from_value(base)?)
    }

    /// Override values with a JSON arguments file
    pub fn merge_json_file(&self, path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SslError::Config(format!("Failed to read {}: {e}", path.display())))?;
        let value: Value = serde_json::from_str(&content)?;
        self.merge_value(value)
    }

    /// Override values with a TOML config file of the same schema
    pub fn merge_toml_file(&self, path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SslError::Config(format!("Failed to read {}: {e}", path.display())))?;
        let value: toml::Value = toml::from_str(&content)?;
        self.merge_value(serde_json::to_value(value)?)
    }

    /// Save the config to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load a full config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

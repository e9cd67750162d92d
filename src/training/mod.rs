//! Training module for FixMatch, MixMatch, ReMixMatch and the supervised baselines
//!
//! Building blocks:
//! - [`criterion`], [`mask`] and [`loss`]: per-example criteria, the confidence
//!   mask and the combined losses
//! - [`guesser`] and [`distributions`]: artificial labels for unlabeled views
//! - [`mixup`] and [`self_supervised`]: MixUp mixers and the pretext transforms
//! - [`rampup`] and [`uniloss`]: the [`LossWeights`] schedule
//! - [`scheduler`]: learning rate per epoch
//!
//! Loops:
//! - [`trainer`]: one epoch of one method
//! - [`validator`]: validation accuracy and cross-entropy
//! - [`checkpoint`]: best-model persistence
//! - [`learner`]: the full run

pub mod checkpoint;
pub mod criterion;
pub mod distributions;
pub mod guesser;
pub mod learner;
pub mod loss;
pub mod mask;
pub mod mixup;
pub mod rampup;
pub mod scheduler;
pub mod self_supervised;
pub mod trainer;
pub mod uniloss;
pub mod validator;

pub use checkpoint::{load_model, Checkpoint, CheckpointMetadata};
pub use guesser::Guesser;
pub use learner::{run_training, train_on, RunSummary};
pub use loss::{LossComponent, LossParts, LossWeights};
pub use rampup::{RampUp, WeightSchedule};
pub use scheduler::LRScheduler;
pub use trainer::{TrainStep, Trainer};
pub use validator::{ValidationResult, Validator};

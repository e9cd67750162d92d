//! # match_ssl
//!
//! Semi-supervised image and audio classification with the Burn framework:
//! FixMatch, MixMatch and ReMixMatch, plus the fully and partially supervised
//! baselines they are compared against.
//!
//! ## Modules
//!
//! - `config`: every hyperparameter of a run, its validation and persistence
//! - `dataset`: CIFAR10 and UrbanSound8K readers, stratified splits, augmentations and batching
//! - `model`: the CNN classifier with its optional self-supervised head
//! - `training`: losses, guessers, schedules and the training/validation loops
//! - `utils`: errors, logging, metrics and the scalar writer
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use match_ssl::backend::{default_device, TrainingBackend};
//! use match_ssl::config::{Method, RunConfig};
//! use match_ssl::training::run_training;
//!
//! let config = RunConfig {
//!     run: Method::FixMatch,
//!     dataset_path: "data/cifar-10-batches-bin".into(),
//!     ..Default::default()
//! };
//! let summary = run_training::<TrainingBackend>(&config, default_device())?;
//! println!("best val/acc = {:.4}", summary.best_acc);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

pub use config::{LabelMode, Method, RunConfig};
pub use dataset::{DatasetPair, InMemoryDataset, SslItem};
pub use model::{SslClassifier, SslClassifierConfig};
pub use training::{run_training, LossWeights, RunSummary, WeightSchedule};
pub use utils::error::{Result, SslError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Model module for the classifier trained by every method
//!
//! One small CNN covers both datasets: 3-channel 32x32 CIFAR10 images and
//! 1-channel log-mel UBS8K spectrograms. ReMixMatch runs add a second head
//! for the self-supervised pretext task.

pub mod cnn;

use burn::tensor::{
    activation::{sigmoid, softmax},
    backend::Backend,
    Tensor,
};

use crate::config::LabelMode;

pub use cnn::{SslClassifier, SslClassifierConfig};

/// Lower bound of every probability handed to a criterion
pub const MIN_PROBABILITY: f64 = 2e-30;

/// Logits to probability rows: softmax in onehot mode, sigmoid in multihot mode
pub fn activation<B: Backend>(logits: Tensor<B, 2>, mode: LabelMode) -> Tensor<B, 2> {
    match mode {
        LabelMode::Onehot => softmax(logits, 1).clamp_min(MIN_PROBABILITY),
        LabelMode::Multihot => sigmoid(logits).clamp_min(MIN_PROBABILITY),
    }
}

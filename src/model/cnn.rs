//! CNN classifier with an optional self-supervised head

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::config::{DatasetName, RunConfig};
use crate::utils::error::{self, SslError};

/// Configuration for the [`SslClassifier`]
#[derive(Config, Debug)]
pub struct SslClassifierConfig {
    /// Number of output classes
    #[config(default = "10")]
    pub nb_classes: usize,

    /// 3 for CIFAR10 images, 1 for UBS8K spectrograms
    #[config(default = "3")]
    pub in_channels: usize,

    #[config(default = "32")]
    pub base_filters: usize,

    #[config(default = "256")]
    pub hidden_size: usize,

    #[config(default = "0.5")]
    pub dropout_rate: f64,

    /// Classes of the self-supervised head, 0 for no head
    #[config(default = "0")]
    pub nb_classes_self_supervised: usize,
}

impl SslClassifierConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        let in_channels = match config.dataset_name {
            DatasetName::Cifar10 => 3,
            DatasetName::Ubs8k => 1,
        };
        let rot_classes = if config.uses_self_supervision() {
            config.nb_classes_self_supervised
        } else {
            0
        };
        Self::new()
            .with_nb_classes(config.nb_classes)
            .with_in_channels(in_channels)
            .with_dropout_rate(config.dropout)
            .with_nb_classes_self_supervised(rot_classes)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SslClassifier<B> {
        SslClassifier::new(self, device)
    }
}

/// Conv2d, BatchNorm, ReLU and an optional 2x2 max-pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Classifier shared by the SSL methods and the supervised baselines
///
/// Architecture:
/// - 3 pooled convolutional blocks and one unpooled block
/// - Global average pooling
/// - Classification head (linear, ReLU, dropout, linear)
/// - Optional self-supervised head on the pooled features
#[derive(Module, Debug)]
pub struct SslClassifier<B: Backend> {
    pub conv1: ConvBlock<B>,
    pub conv2: ConvBlock<B>,
    pub conv3: ConvBlock<B>,
    pub conv4: ConvBlock<B>,

    pub global_pool: AdaptiveAvgPool2d,

    pub fc1: Linear<B>,
    pub dropout: Dropout,
    pub fc2: Linear<B>,

    pub rot_fc: Option<Linear<B>>,

    nb_classes: usize,
}

impl<B: Backend> SslClassifier<B> {
    pub fn new(config: &SslClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        // 32x32 -> 16 -> 8 -> 4, last block keeps the resolution
        let conv1 = ConvBlock::new(config.in_channels, base, 3, true, device);
        let conv2 = ConvBlock::new(base, base * 2, 3, true, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, 3, true, device);
        let conv4 = ConvBlock::new(base * 4, base * 8, 3, false, device);

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let fc1 = LinearConfig::new(base * 8, config.hidden_size).init(device);
        let dropout = DropoutConfig::new(config.dropout_rate).init();
        let fc2 = LinearConfig::new(config.hidden_size, config.nb_classes).init(device);

        let rot_fc = (config.nb_classes_self_supervised > 0)
            .then(|| LinearConfig::new(base * 8, config.nb_classes_self_supervised).init(device));

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            global_pool,
            fc1,
            dropout,
            fc2,
            rot_fc,
            nb_classes: config.nb_classes,
        }
    }

    /// Pooled features, `[batch, base_filters * 8]`
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    /// Classification logits, `[batch, nb_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(x);
        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Self-supervised logits, `[batch, nb_classes_self_supervised]`
    pub fn forward_rot(&self, x: Tensor<B, 4>) -> error::Result<Tensor<B, 2>> {
        let head = self.rot_fc.as_ref().ok_or_else(|| {
            SslError::Training("Model was built without a self-supervised head".to_string())
        })?;
        Ok(head.forward(self.features(x)))
    }

    pub fn nb_classes(&self) -> usize {
        self.nb_classes
    }

    pub fn has_self_supervised_head(&self) -> bool {
        self.rot_fc.is_some()
    }
}

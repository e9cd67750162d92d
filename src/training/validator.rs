//! Validation pass over the held-out set
//!
//! Runs on the inner (non-autodiff) backend: the caller hands over
//! `model.valid()`, so dropout is off and no graph is recorded.

use std::sync::Arc;

use burn::data::dataset::Dataset;
use burn::tensor::{backend::Backend, ElementConversion};

use crate::config::{LabelMode, RunConfig};
use crate::dataset::batcher::ItemBatcher;
use crate::dataset::{BatchLoader, InMemoryDataset};
use crate::model::{activation, SslClassifier};
use crate::training::criterion::{binary_cross_entropy, cross_entropy};
use crate::utils::error::{Result, SslError};
use crate::utils::metrics::{categorical_accuracy, multilabel_accuracy};

/// Mean accuracy and mean cross-entropy over the validation batches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationResult {
    pub acc: f64,
    pub ce: f64,
}

pub struct Validator<B: Backend> {
    batcher: ItemBatcher<B>,
    dataset: Arc<InMemoryDataset>,
    loader: BatchLoader,
    mode: LabelMode,
    threshold: f64,
}

impl<B: Backend> Validator<B> {
    pub fn new(
        batcher: ItemBatcher<B>,
        dataset: Arc<InMemoryDataset>,
        batch_size: usize,
        config: &RunConfig,
    ) -> Result<Self> {
        let loader = BatchLoader::sequential((0..dataset.len()).collect(), batch_size)?;
        if loader.is_empty() {
            return Err(SslError::Dataset(format!(
                "Validation set of {} examples is smaller than one batch of {}",
                dataset.len(),
                batch_size
            )));
        }
        Ok(Self {
            batcher,
            dataset,
            loader,
            mode: config.label_mode,
            threshold: config.threshold_multihot,
        })
    }

    pub fn nb_batches(&self) -> usize {
        self.loader.len()
    }

    pub fn validate(&mut self, model: &SslClassifier<B>) -> Result<ValidationResult> {
        let batches = self.loader.pass();
        let (mut acc_sum, mut ce_sum) = (0.0, 0.0);

        for indices in &batches {
            let mut data = Vec::with_capacity(indices.len() * self.dataset.shape().iter().product::<usize>());
            let mut labels = Vec::with_capacity(indices.len());
            for &index in indices {
                let item = self.dataset.item(index)?;
                data.extend_from_slice(&item.data);
                labels.push(item.label);
            }

            let inputs = self.batcher.inputs(data, indices.len());
            let targets = self.batcher.targets(&labels);
            let pred = activation(model.forward(inputs), self.mode);

            let (acc, ce) = match self.mode {
                LabelMode::Onehot => (
                    categorical_accuracy(pred.clone(), targets.clone()),
                    cross_entropy(pred, targets)?,
                ),
                LabelMode::Multihot => (
                    multilabel_accuracy(pred.clone(), targets.clone(), self.threshold),
                    binary_cross_entropy(pred, targets)?,
                ),
            };
            acc_sum += acc;
            ce_sum += ce.mean().into_scalar().elem::<f64>();
        }

        let nb_batches = batches.len().max(1) as f64;
        Ok(ValidationResult {
            acc: acc_sum / nb_batches,
            ce: ce_sum / nb_batches,
        })
    }
}

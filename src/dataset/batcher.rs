//! Batch assembly
//!
//! [`ItemBatcher`] implements Burn's `Batcher` for plain (non-augmented)
//! batches. [`SslBatcher`] builds the weak/strong views a method asks for,
//! augmenting examples in parallel with one deterministic RNG stream per
//! example.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::config::{AugmentStrength, DatasetName, RunConfig};
use crate::dataset::augmentation::AugmentSet;
use crate::dataset::cifar10::{CIFAR10_MEAN, CIFAR10_STD};
use crate::dataset::{InMemoryDataset, SslItem};
use crate::utils::error::{Result, SslError};

/// Inputs and (one-hot, possibly smoothed) targets
#[derive(Clone, Debug)]
pub struct LabeledBatch<B: Backend> {
    /// `[batch, channels, height, width]`
    pub inputs: Tensor<B, 4>,
    /// `[batch, nb_classes]`
    pub targets: Tensor<B, 2>,
}

/// Views of the same unlabeled examples
#[derive(Clone, Debug)]
pub struct UnlabeledBatch<B: Backend> {
    pub weak: Vec<Tensor<B, 4>>,
    pub strong: Vec<Tensor<B, 4>>,
    /// True labels, only used to monitor guess accuracy
    pub targets: Tensor<B, 2>,
}

/// Turns host buffers into tensors on one device
#[derive(Clone, Debug)]
pub struct ItemBatcher<B: Backend> {
    device: B::Device,
    shape: [usize; 3],
    nb_classes: usize,
    label_smoothing: f64,
    /// Per-channel mean and std
    standardize: Option<(Vec<f32>, Vec<f32>)>,
}

impl<B: Backend> ItemBatcher<B> {
    pub fn new(device: B::Device, shape: [usize; 3], nb_classes: usize) -> Self {
        Self {
            device,
            shape,
            nb_classes,
            label_smoothing: 0.0,
            standardize: None,
        }
    }

    pub fn with_label_smoothing(mut self, smoothing: f64) -> Self {
        self.label_smoothing = smoothing;
        self
    }

    pub fn with_standardization(mut self, mean: Vec<f32>, std: Vec<f32>) -> Self {
        self.standardize = Some((mean, std));
        self
    }

    pub fn from_config(device: B::Device, shape: [usize; 3], config: &RunConfig) -> Self {
        let batcher = Self::new(device, shape, config.nb_classes)
            .with_label_smoothing(config.label_smoothing);
        if config.standardize && config.dataset_name == DatasetName::Cifar10 {
            batcher.with_standardization(CIFAR10_MEAN.to_vec(), CIFAR10_STD.to_vec())
        } else {
            batcher
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn nb_classes(&self) -> usize {
        self.nb_classes
    }

    /// `data` holds `batch_size` flat examples back to back
    pub fn inputs(&self, data: Vec<f32>, batch_size: usize) -> Tensor<B, 4> {
        let [channels, height, width] = self.shape;
        let inputs = Tensor::<B, 4>::from_data(
            TensorData::new(data, [batch_size, channels, height, width]),
            &self.device,
        );

        match &self.standardize {
            Some((mean, std)) => {
                let mean = Tensor::<B, 4>::from_data(
                    TensorData::new(mean.clone(), [1, channels, 1, 1]),
                    &self.device,
                );
                let std = Tensor::<B, 4>::from_data(
                    TensorData::new(std.clone(), [1, channels, 1, 1]),
                    &self.device,
                );
                (inputs - mean) / std
            }
            None => inputs,
        }
    }

    /// One-hot rows, smoothed to `(1 - s) * onehot + s / nb_classes`
    pub fn targets(&self, labels: &[usize]) -> Tensor<B, 2> {
        let s = self.label_smoothing as f32;
        let off = s / self.nb_classes as f32;
        let on = 1.0 - s + off;

        let mut values = vec![off; labels.len() * self.nb_classes];
        for (i, &label) in labels.iter().enumerate() {
            values[i * self.nb_classes + label.min(self.nb_classes - 1)] = on;
        }
        Tensor::from_data(
            TensorData::new(values, [labels.len(), self.nb_classes]),
            &self.device,
        )
    }
}

impl<B: Backend> Batcher<SslItem, LabeledBatch<B>> for ItemBatcher<B> {
    fn batch(&self, items: Vec<SslItem>) -> LabeledBatch<B> {
        let batch_size = items.len();
        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        let data: Vec<f32> = items.into_iter().flat_map(|item| item.data).collect();

        LabeledBatch {
            inputs: self.inputs(data, batch_size),
            targets: self.targets(&labels),
        }
    }
}

/// Builds augmented views of dataset examples
#[derive(Clone, Debug)]
pub struct SslBatcher<B: Backend> {
    items: ItemBatcher<B>,
    dataset: Arc<InMemoryDataset>,
    augments: Arc<AugmentSet>,
}

impl<B: Backend> SslBatcher<B> {
    pub fn new(items: ItemBatcher<B>, dataset: Arc<InMemoryDataset>, augments: Arc<AugmentSet>) -> Self {
        Self {
            items,
            dataset,
            augments,
        }
    }

    pub fn item_batcher(&self) -> &ItemBatcher<B> {
        &self.items
    }

    /// One view of `indices`. Example `i` of the batch draws from stream `indices[i]`
    /// of a generator seeded with `seed`, so the result does not depend on threads.
    pub fn view(&self, indices: &[usize], strength: AugmentStrength, seed: u64) -> Result<Tensor<B, 4>> {
        let shape = self.dataset.shape();
        let examples = indices
            .par_iter()
            .map(|&index| {
                let item = self.dataset.item(index)?;
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(index as u64);
                self.augments.view(&item.data, shape, strength, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self.items.inputs(examples.concat(), indices.len()))
    }

    fn targets(&self, indices: &[usize]) -> Result<Tensor<B, 2>> {
        let labels = indices
            .iter()
            .map(|&index| self.dataset.item(index).map(|item| item.label))
            .collect::<Result<Vec<_>>>()?;
        if let Some(label) = labels.iter().find(|&&l| l >= self.items.nb_classes) {
            return Err(SslError::Dataset(format!(
                "Label {} is out of range for {} classes",
                label, self.items.nb_classes
            )));
        }
        Ok(self.items.targets(&labels))
    }

    pub fn labeled(&self, indices: &[usize], strength: AugmentStrength, seed: u64) -> Result<LabeledBatch<B>> {
        Ok(LabeledBatch {
            inputs: self.view(indices, strength, seed)?,
            targets: self.targets(indices)?,
        })
    }

    /// `nb_weak` weak views and `nb_strong` strong views, each with its own seed
    pub fn unlabeled(
        &self,
        indices: &[usize],
        nb_weak: usize,
        nb_strong: usize,
        seed: u64,
    ) -> Result<UnlabeledBatch<B>> {
        let view_seed = |view: usize| seed.wrapping_add((view as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let weak = (0..nb_weak)
            .map(|v| self.view(indices, AugmentStrength::Weak, view_seed(v)))
            .collect::<Result<Vec<_>>>()?;
        let strong = (0..nb_strong)
            .map(|v| self.view(indices, AugmentStrength::Strong, view_seed(nb_weak + v)))
            .collect::<Result<Vec<_>>>()?;

        Ok(UnlabeledBatch {
            weak,
            strong,
            targets: self.targets(indices)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn dataset() -> Arc<InMemoryDataset> {
        let items = (0..6)
            .map(|i| SslItem {
                data: (0..48).map(|v| ((v + i) % 10) as f32 / 10.0).collect(),
                label: i % 3,
            })
            .collect();
        Arc::new(InMemoryDataset::new(items, [3, 4, 4]).unwrap())
    }

    fn batcher() -> SslBatcher<TestBackend> {
        let items = ItemBatcher::new(Default::default(), [3, 4, 4], 3);
        SslBatcher::new(
            items,
            dataset(),
            Arc::new(AugmentSet::cifar10(&RunConfig::default())),
        )
    }

    #[test]
    fn test_item_batcher_shapes_and_targets() {
        let batcher = ItemBatcher::<TestBackend>::new(Default::default(), [3, 4, 4], 3);
        let ds = dataset();
        let items = vec![ds.item(0).unwrap().clone(), ds.item(4).unwrap().clone()];
        let batch = batcher.batch(items);
        assert_eq!(batch.inputs.dims(), [2, 3, 4, 4]);
        let targets = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(targets, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_label_smoothing_keeps_rows_normalized() {
        let batcher =
            ItemBatcher::<TestBackend>::new(Default::default(), [3, 4, 4], 4).with_label_smoothing(0.2);
        let targets = batcher.targets(&[2]).into_data().to_vec::<f32>().unwrap();
        assert!((targets[2] - 0.85).abs() < 1e-6);
        assert!((targets[0] - 0.05).abs() < 1e-6);
        assert!((targets.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_standardization() {
        let batcher = ItemBatcher::<TestBackend>::new(Default::default(), [1, 1, 2], 2)
            .with_standardization(vec![0.5], vec![0.25]);
        let out = batcher.inputs(vec![0.5, 1.0], 1).into_data().to_vec::<f32>().unwrap();
        assert_eq!(out, vec![0.0, 2.0]);
    }

    #[test]
    fn test_views_are_reproducible() {
        let batcher = batcher();
        let a = batcher.view(&[0, 1, 2], AugmentStrength::Strong, 5).unwrap();
        let b = batcher.view(&[0, 1, 2], AugmentStrength::Strong, 5).unwrap();
        assert_eq!(
            a.into_data().to_vec::<f32>().unwrap(),
            b.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_unlabeled_views() {
        let batch = batcher().unlabeled(&[1, 2, 3, 4], 2, 3, 0).unwrap();
        assert_eq!(batch.weak.len(), 2);
        assert_eq!(batch.strong.len(), 3);
        assert!(batch.strong.iter().all(|v| v.dims() == [4, 3, 4, 4]));
        assert_eq!(batch.targets.dims(), [4, 3]);
    }

    #[test]
    fn test_unknown_index_is_an_error() {
        assert!(batcher().labeled(&[42], AugmentStrength::None, 0).is_err());
    }
}

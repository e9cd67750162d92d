//! Dataset module: readers, splits, augmentations and batch assembly
//!
//! - [`cifar10`]: binary CIFAR-10 reader
//! - [`ubs8k`]: UrbanSound8K reader over precomputed spectrograms
//! - [`split`]: stratified labeled/unlabeled split by class index
//! - [`augmentation`]: weak and strong perturbation pools
//! - [`loader`]: index batches and the [`loader::ZipCycle`] pairing
//! - [`batcher`]: item batches to tensors, with or without augmentation

pub mod augmentation;
pub mod batcher;
pub mod cifar10;
pub mod loader;
pub mod split;
pub mod ubs8k;

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::config::{DatasetName, RunConfig};
use crate::utils::error::{Result, SslError};

pub use augmentation::AugmentSet;
pub use batcher::{LabeledBatch, SslBatcher, UnlabeledBatch};
pub use loader::{BatchLoader, ZipCycle};
pub use split::LabeledSplit;

/// One example: a flat CHW buffer and its class index
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SslItem {
    pub data: Vec<f32>,
    pub label: usize,
}

/// Examples held in memory, all of the same shape
#[derive(Clone, Debug)]
pub struct InMemoryDataset {
    items: Vec<SslItem>,
    shape: [usize; 3],
}

impl InMemoryDataset {
    pub fn new(items: Vec<SslItem>, shape: [usize; 3]) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if let Some((i, item)) = items
            .iter()
            .enumerate()
            .find(|(_, item)| item.data.len() != expected)
        {
            return Err(SslError::Dataset(format!(
                "Example {} has {} values, expected {} for shape {:?}",
                i,
                item.data.len(),
                expected,
                shape
            )));
        }
        Ok(Self { items, shape })
    }

    /// `[channels, height, width]` of every example
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }

    pub fn item(&self, index: usize) -> Result<&SslItem> {
        self.items.get(index).ok_or_else(|| {
            SslError::Dataset(format!(
                "Index {} out of range for {} examples",
                index,
                self.items.len()
            ))
        })
    }

    /// Keep only the first `len` examples
    pub fn truncate(mut self, len: usize) -> Self {
        self.items.truncate(len);
        self
    }
}

impl Dataset<SslItem> for InMemoryDataset {
    fn get(&self, index: usize) -> Option<SslItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Training and validation sets of one run
#[derive(Clone, Debug)]
pub struct DatasetPair {
    pub train: InMemoryDataset,
    pub val: InMemoryDataset,
}

/// Read the configured dataset. The validation set is reduced by `dataset_ratio`.
pub fn load_datasets(config: &RunConfig) -> Result<DatasetPair> {
    let (train, val) = match config.dataset_name {
        DatasetName::Cifar10 => (
            cifar10::load_cifar10(&config.dataset_path, cifar10::CifarSplit::Train)?,
            cifar10::load_cifar10(&config.dataset_path, cifar10::CifarSplit::Test)?,
        ),
        DatasetName::Ubs8k => {
            let (train_folds, val_folds) = ubs8k::folds_for_validation(config.fold_val)?;
            (
                ubs8k::load_ubs8k(&config.dataset_path, &train_folds)?,
                ubs8k::load_ubs8k(&config.dataset_path, &val_folds)?,
            )
        }
    };

    let val_len = (val.len() as f64 * config.dataset_ratio) as usize;
    Ok(DatasetPair {
        train,
        val: val.truncate(val_len),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(value: f32, label: usize) -> SslItem {
        SslItem {
            data: vec![value; 4],
            label,
        }
    }

    #[test]
    fn test_dataset_checks_shapes() {
        let ok = InMemoryDataset::new(vec![item(0.0, 0), item(1.0, 1)], [1, 2, 2]).unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok.labels(), vec![0, 1]);
        assert_eq!(ok.get(1).unwrap().data, vec![1.0; 4]);
        assert!(ok.get(2).is_none());
        assert!(ok.item(2).is_err());

        assert!(InMemoryDataset::new(vec![item(0.0, 0)], [3, 2, 2]).is_err());
    }

    #[test]
    fn test_truncate() {
        let ds = InMemoryDataset::new(vec![item(0.0, 0); 5], [1, 2, 2]).unwrap();
        assert_eq!(ds.truncate(3).len(), 3);
    }

    #[test]
    fn test_missing_dataset_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            dataset_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(matches!(load_datasets(&config), Err(SslError::PathNotFound(_))));
    }
}

//! CIFAR-10 binary reader
//!
//! Expects the binary version of the dataset: `data_batch_1.bin` to
//! `data_batch_5.bin` for training and `test_batch.bin` for validation.
//! Each record is one label byte followed by 3072 bytes of CHW RGB pixels.

use std::fs;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::dataset::{InMemoryDataset, SslItem};
use crate::utils::error::{Result, SslError};

pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

pub const CIFAR10_SHAPE: [usize; 3] = [3, 32, 32];

const IMAGE_BYTES: usize = 3 * 32 * 32;
const RECORD_BYTES: usize = 1 + IMAGE_BYTES;

/// Channel means and standard deviations on the `[0, 1]` scale
pub const CIFAR10_MEAN: [f32; 3] = [125.3 / 255.0, 123.0 / 255.0, 113.9 / 255.0];
pub const CIFAR10_STD: [f32; 3] = [63.0 / 255.0, 62.1 / 255.0, 66.7 / 255.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CifarSplit {
    Train,
    Test,
}

impl CifarSplit {
    pub fn files(&self) -> Vec<String> {
        match self {
            CifarSplit::Train => (1..=5).map(|i| format!("data_batch_{}.bin", i)).collect(),
            CifarSplit::Test => vec!["test_batch.bin".to_string()],
        }
    }
}

/// Parse one batch file, pixels scaled to `[0, 1]`
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<SslItem>> {
    if bytes.len() % RECORD_BYTES != 0 {
        return Err(SslError::Dataset(format!(
            "CIFAR-10 batch of {} bytes is not a multiple of {}",
            bytes.len(),
            RECORD_BYTES
        )));
    }

    bytes
        .chunks_exact(RECORD_BYTES)
        .map(|record| {
            let label = record[0] as usize;
            if label >= CLASS_NAMES.len() {
                return Err(SslError::Dataset(format!("Invalid CIFAR-10 label {}", label)));
            }
            let data = record[1..].iter().map(|&b| b as f32 / 255.0).collect();
            Ok(SslItem { data, label })
        })
        .collect()
}

pub fn load_cifar10(data_dir: impl AsRef<Path>, split: CifarSplit) -> Result<InMemoryDataset> {
    let data_dir = data_dir.as_ref();
    let files = split.files();

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| SslError::Dataset(e.to_string()))?
            .progress_chars("#>-"),
    );

    let mut items = Vec::new();
    for file in &files {
        let path = data_dir.join(file);
        if !path.exists() {
            return Err(SslError::PathNotFound(path));
        }
        pb.set_message(file.clone());
        items.extend(parse_batch(&fs::read(&path)?)?);
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!("Loaded {} CIFAR-10 images ({:?})", items.len(), split);
    InMemoryDataset::new(items, CIFAR10_SHAPE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::Dataset;

    fn record(label: u8, value: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(value).take(IMAGE_BYTES));
        bytes
    }

    #[test]
    fn test_parse_batch() {
        let mut bytes = record(3, 255);
        bytes.extend(record(9, 0));
        let items = parse_batch(&bytes).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, 3);
        assert_eq!(items[0].data.len(), IMAGE_BYTES);
        assert!(items[0].data.iter().all(|v| *v == 1.0));
        assert_eq!(CLASS_NAMES[items[1].label], "truck");
    }

    #[test]
    fn test_parse_rejects_truncated_and_bad_labels() {
        assert!(parse_batch(&record(0, 0)[..100]).is_err());
        assert!(parse_batch(&record(12, 0)).is_err());
    }

    #[test]
    fn test_load_test_split() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = record(1, 10);
        bytes.extend(record(2, 20));
        fs::write(dir.path().join("test_batch.bin"), bytes).unwrap();

        let dataset = load_cifar10(dir.path(), CifarSplit::Test).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.labels(), vec![1, 2]);

        assert!(load_cifar10(dir.path(), CifarSplit::Train).is_err());
    }
}

//! Index batches and the labeled/unlabeled pairing
//!
//! Loaders only deal in example indices. The batcher turns an index batch
//! into tensors afterwards.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::utils::error::{Result, SslError};

/// Splits a list of indices into batches, optionally reshuffled every pass
#[derive(Debug, Clone)]
pub struct BatchLoader {
    indices: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    rng: ChaCha8Rng,
}

impl BatchLoader {
    pub fn new(
        indices: Vec<usize>,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(SslError::Config("Batch size must be greater than 0".to_string()));
        }
        Ok(Self {
            indices,
            batch_size,
            shuffle,
            drop_last,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Shuffled batches that drop the incomplete tail (training)
    pub fn train(indices: Vec<usize>, batch_size: usize, seed: u64) -> Result<Self> {
        Self::new(indices, batch_size, true, true, seed)
    }

    /// Ordered batches that drop the incomplete tail (validation)
    pub fn sequential(indices: Vec<usize>, batch_size: usize) -> Result<Self> {
        Self::new(indices, batch_size, false, true, 0)
    }

    /// Number of batches in one pass
    pub fn len(&self) -> usize {
        if self.drop_last {
            self.indices.len() / self.batch_size
        } else {
            self.indices.len().div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches of one pass over the indices
    pub fn pass(&mut self) -> Vec<Vec<usize>> {
        let mut order = self.indices.clone();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let mut batches: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        if self.drop_last && batches.last().is_some_and(|b| b.len() < self.batch_size) {
            batches.pop();
        }
        batches
    }
}

/// Zips several loaders. The epoch lasts as long as the longest loader and
/// the shorter ones start a new (reshuffled) pass when exhausted.
#[derive(Debug, Clone)]
pub struct ZipCycle {
    loaders: Vec<BatchLoader>,
}

impl ZipCycle {
    pub fn new(loaders: Vec<BatchLoader>) -> Result<Self> {
        if loaders.is_empty() {
            return Err(SslError::Dataset("ZipCycle needs at least one loader".to_string()));
        }
        if let Some(i) = loaders.iter().position(BatchLoader::is_empty) {
            return Err(SslError::Dataset(format!(
                "Loader {} yields no batch, it has fewer examples than its batch size",
                i
            )));
        }
        Ok(Self { loaders })
    }

    /// Iterations per epoch, the length of the longest loader
    pub fn len(&self) -> usize {
        self.loaders.iter().map(BatchLoader::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One epoch: `len()` items, each holding one batch per loader
    pub fn epoch(&mut self) -> Vec<Vec<Vec<usize>>> {
        let len = self.len();
        let mut columns: Vec<Vec<Vec<usize>>> = self
            .loaders
            .iter_mut()
            .map(|loader| {
                let mut batches = Vec::with_capacity(len);
                while batches.len() < len {
                    batches.extend(loader.pass());
                }
                batches.truncate(len);
                batches
            })
            .collect();

        (0..len)
            .map(|i| {
                columns
                    .iter_mut()
                    .map(|column| std::mem::take(&mut column[i]))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_batch_loader_drop_last() {
        let mut loader = BatchLoader::sequential((0..10).collect(), 3).unwrap();
        assert_eq!(loader.len(), 3);
        let batches = loader.pass();
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]]);

        let mut keep = BatchLoader::new((0..10).collect(), 3, false, false, 0).unwrap();
        assert_eq!(keep.len(), 4);
        assert_eq!(keep.pass().last().unwrap(), &vec![9]);
    }

    #[test]
    fn test_shuffled_pass_is_a_permutation() {
        let mut loader = BatchLoader::train((0..12).collect(), 4, 1).unwrap();
        let first: Vec<usize> = loader.pass().concat();
        let second: Vec<usize> = loader.pass().concat();
        assert_ne!(first, second);
        let set: HashSet<_> = first.iter().collect();
        assert_eq!(set.len(), 12);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(BatchLoader::train(vec![0, 1], 0, 0).is_err());
    }

    #[test]
    fn test_zip_cycle_yields_max_len_pairs() {
        let labeled = BatchLoader::train((0..4).collect(), 2, 0).unwrap();
        let unlabeled = BatchLoader::train((100..110).collect(), 2, 1).unwrap();
        let mut zip = ZipCycle::new(vec![labeled, unlabeled]).unwrap();
        assert_eq!(zip.len(), 5);

        let epoch = zip.epoch();
        assert_eq!(epoch.len(), 5);
        assert!(epoch.iter().all(|pair| pair.len() == 2));

        // The unlabeled side is seen exactly once
        let unlabeled: HashSet<usize> = epoch.iter().flat_map(|p| p[1].clone()).collect();
        assert_eq!(unlabeled.len(), 10);
        // The labeled side cycles
        assert!(epoch.iter().all(|p| p[0].iter().all(|i| *i < 4)));
    }

    #[test]
    fn test_zip_cycle_rejects_empty_loaders() {
        let small = BatchLoader::train(vec![0], 2, 0).unwrap();
        assert!(ZipCycle::new(vec![small]).is_err());
        assert!(ZipCycle::new(Vec::new()).is_err());
    }
}

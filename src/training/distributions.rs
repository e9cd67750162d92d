//! Rolling prediction history used to estimate class priors
//!
//! Each named stream is a circular buffer of `history_size` rows. It starts
//! filled with the uniform prior, so the mean is defined before the first
//! batch arrives.

use std::collections::BTreeMap;

use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::config::LabelMode;
use crate::utils::error::{Result, SslError};

pub const LABELED: &str = "labeled";
pub const UNLABELED: &str = "unlabeled";

#[derive(Debug, Clone)]
struct History {
    rows: Vec<f32>,
    index: usize,
}

#[derive(Debug, Clone)]
pub struct ModelDistributions {
    history_size: usize,
    nb_classes: usize,
    prior: f32,
    streams: BTreeMap<String, History>,
}

impl ModelDistributions {
    pub fn new(
        history_size: usize,
        nb_classes: usize,
        mode: LabelMode,
        names: &[&str],
    ) -> Result<Self> {
        if history_size == 0 || nb_classes == 0 {
            return Err(SslError::Config(format!(
                "History size and number of classes must be positive (got {} and {})",
                history_size, nb_classes
            )));
        }
        let prior = match mode {
            LabelMode::Onehot => 1.0 / nb_classes as f32,
            LabelMode::Multihot => 0.5,
        };

        let mut distributions = Self {
            history_size,
            nb_classes,
            prior,
            streams: names
                .iter()
                .map(|name| {
                    (
                        name.to_string(),
                        History {
                            rows: Vec::new(),
                            index: 0,
                        },
                    )
                })
                .collect(),
        };
        distributions.reset();
        Ok(distributions)
    }

    /// Labeled and unlabeled streams, as used by distribution alignment
    pub fn labeled_unlabeled(history_size: usize, nb_classes: usize, mode: LabelMode) -> Result<Self> {
        Self::new(history_size, nb_classes, mode, &[LABELED, UNLABELED])
    }

    /// Refill every stream with the prior and rewind its write index
    pub fn reset(&mut self) {
        let len = self.history_size * self.nb_classes;
        for history in self.streams.values_mut() {
            history.rows = vec![self.prior; len];
            history.index = 0;
        }
    }

    fn stream_mut(&mut self, name: &str) -> Result<&mut History> {
        self.streams
            .get_mut(name)
            .ok_or_else(|| SslError::Training(format!("Unknown distribution stream \"{}\"", name)))
    }

    fn stream(&self, name: &str) -> Result<&History> {
        self.streams
            .get(name)
            .ok_or_else(|| SslError::Training(format!("Unknown distribution stream \"{}\"", name)))
    }

    /// Overwrite the oldest row of `name` with `pred`
    pub fn add_pred(&mut self, pred: &[f32], name: &str) -> Result<()> {
        if pred.len() != self.nb_classes {
            return Err(SslError::Shape(format!(
                "Prediction has {} classes, expected {}",
                pred.len(),
                self.nb_classes
            )));
        }
        let (nb_classes, history_size) = (self.nb_classes, self.history_size);
        let history = self.stream_mut(name)?;
        let start = history.index * nb_classes;
        history.rows[start..start + nb_classes].copy_from_slice(pred);
        history.index = (history.index + 1) % history_size;
        Ok(())
    }

    /// Add every row of a `[batch, classes]` tensor, in order
    pub fn add_batch_pred<B: Backend>(&mut self, batch: Tensor<B, 2>, name: &str) -> Result<()> {
        let [_, nb_classes] = batch.dims();
        if nb_classes != self.nb_classes {
            return Err(SslError::Shape(format!(
                "Batch has {} classes, expected {}",
                nb_classes, self.nb_classes
            )));
        }
        let values = batch
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| SslError::Training(format!("Cannot read predictions: {:?}", e)))?;
        for row in values.chunks(self.nb_classes) {
            self.add_pred(row, name)?;
        }
        Ok(())
    }

    /// Column mean over every slot of the buffer
    pub fn mean_pred(&self, name: &str) -> Result<Vec<f32>> {
        let history = self.stream(name)?;
        let mut mean = vec![0.0f32; self.nb_classes];
        for row in history.rows.chunks(self.nb_classes) {
            for (acc, value) in mean.iter_mut().zip(row) {
                *acc += value;
            }
        }
        for value in mean.iter_mut() {
            *value /= self.history_size as f32;
        }
        Ok(mean)
    }

    /// Next slot that will be overwritten in `name`
    pub fn index(&self, name: &str) -> Result<usize> {
        Ok(self.stream(name)?.index)
    }

    pub fn nb_classes(&self) -> usize {
        self.nb_classes
    }

    /// Scale `pred` by `mean(labeled) / mean(unlabeled)` and renormalize each row
    pub fn align<B: Backend>(&self, pred: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        let mean_labeled = self.mean_pred(LABELED)?;
        let mean_unlabeled = self.mean_pred(UNLABELED)?;
        let ratio: Vec<f32> = mean_labeled
            .iter()
            .zip(&mean_unlabeled)
            .map(|(l, u)| l / u.max(f32::MIN_POSITIVE))
            .collect();

        let ratio = Tensor::<B, 2>::from_data(
            TensorData::new(ratio, [1, self.nb_classes]),
            &pred.device(),
        );
        let aligned = pred * ratio;
        let norm = aligned.clone().sum_dim(1);
        Ok(aligned / norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_prior_is_uniform() {
        let onehot = ModelDistributions::labeled_unlabeled(4, 5, LabelMode::Onehot).unwrap();
        assert!(onehot
            .mean_pred(LABELED)
            .unwrap()
            .iter()
            .all(|v| (v - 0.2).abs() < 1e-6));

        let multihot = ModelDistributions::labeled_unlabeled(4, 5, LabelMode::Multihot).unwrap();
        assert!(multihot
            .mean_pred(UNLABELED)
            .unwrap()
            .iter()
            .all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_buffer_wraps_around() {
        let mut dist = ModelDistributions::labeled_unlabeled(3, 2, LabelMode::Onehot).unwrap();
        for _ in 0..3 {
            dist.add_pred(&[1.0, 0.0], LABELED).unwrap();
        }
        assert_eq!(dist.index(LABELED).unwrap(), 0);
        assert_eq!(dist.mean_pred(LABELED).unwrap(), vec![1.0, 0.0]);

        dist.add_pred(&[0.0, 1.0], LABELED).unwrap();
        assert_eq!(dist.index(LABELED).unwrap(), 1);
        let mean = dist.mean_pred(LABELED).unwrap();
        assert!((mean[0] - 2.0 / 3.0).abs() < 1e-6);
        assert!((mean[1] - 1.0 / 3.0).abs() < 1e-6);

        // The unlabeled stream is untouched
        assert_eq!(dist.index(UNLABELED).unwrap(), 0);
    }

    #[test]
    fn test_add_batch_pred_and_reset() {
        let mut dist = ModelDistributions::labeled_unlabeled(2, 2, LabelMode::Onehot).unwrap();
        let batch = Tensor::<TestBackend, 2>::from_floats([[0.9, 0.1], [0.7, 0.3], [0.8, 0.2]], &Default::default());
        dist.add_batch_pred(batch, UNLABELED).unwrap();
        assert_eq!(dist.index(UNLABELED).unwrap(), 1);
        let mean = dist.mean_pred(UNLABELED).unwrap();
        assert!((mean[0] - 0.75).abs() < 1e-6);

        dist.reset();
        assert_eq!(dist.mean_pred(UNLABELED).unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_unknown_stream_and_bad_width() {
        let mut dist = ModelDistributions::labeled_unlabeled(2, 2, LabelMode::Onehot).unwrap();
        assert!(dist.add_pred(&[0.5, 0.5], "validation").is_err());
        assert!(matches!(
            dist.add_pred(&[1.0, 0.0, 0.0], LABELED),
            Err(SslError::Shape(_))
        ));
    }

    #[test]
    fn test_alignment_moves_towards_labeled_prior() {
        let mut dist = ModelDistributions::labeled_unlabeled(1, 2, LabelMode::Onehot).unwrap();
        dist.add_pred(&[0.5, 0.5], LABELED).unwrap();
        dist.add_pred(&[0.8, 0.2], UNLABELED).unwrap();

        let pred = Tensor::<TestBackend, 2>::from_floats([[0.8, 0.2]], &Default::default());
        let aligned = dist
            .align(pred)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!((aligned[0] - 0.5).abs() < 1e-5);
        assert!((aligned[1] - 0.5).abs() < 1e-5);
    }
}

//! Artificial label guessing for unlabeled batches
//!
//! A guesser receives the model's probability rows for one or more augmented
//! views of the same unlabeled batch and returns the target the unlabeled loss
//! trains against. The result is always detached from the autodiff graph.

use burn::tensor::{backend::Backend, Int, Tensor};

use crate::training::distributions::{ModelDistributions, LABELED, UNLABELED};
use crate::utils::error::{Result, SslError};

/// Strategy turning predictions on augmented views into artificial labels
pub trait Guesser<B: Backend> {
    /// `preds` holds one `[batch, classes]` tensor per augmented view
    fn guess(&mut self, preds: &[Tensor<B, 2>]) -> Result<Tensor<B, 2>>;
}

/// `p_i^(1/T) / sum_j p_j^(1/T)` along classes
pub fn sharpen<B: Backend>(pred: Tensor<B, 2>, temperature: f64) -> Tensor<B, 2> {
    let powered = pred.powf_scalar(1.0 / temperature);
    let norm = powered.clone().sum_dim(1);
    powered / norm
}

/// One-hot rows of the argmax class
pub fn one_hot_argmax<B: Backend>(pred: Tensor<B, 2>) -> Tensor<B, 2> {
    let [batch_size, _] = pred.dims();
    let device = pred.device();
    let indices: Tensor<B, 2, Int> = pred.clone().argmax(1);
    pred.zeros_like()
        .scatter(1, indices, Tensor::ones([batch_size, 1], &device))
}

/// One-hot rows for integer labels, with optional label smoothing
pub fn one_hot_labels<B: Backend>(
    labels: Tensor<B, 1, Int>,
    nb_classes: usize,
    smoothing: f64,
) -> Tensor<B, 2> {
    let [batch_size] = labels.dims();
    let device = labels.device();
    let indices = labels.reshape([batch_size, 1]);
    let one_hot = Tensor::<B, 2>::zeros([batch_size, nb_classes], &device)
        .scatter(1, indices, Tensor::ones([batch_size, 1], &device));
    smooth(one_hot, smoothing)
}

/// `(1 - eps) * target + eps / classes`
pub fn smooth<B: Backend>(target: Tensor<B, 2>, smoothing: f64) -> Tensor<B, 2> {
    if smoothing <= 0.0 {
        return target;
    }
    let [_, nb_classes] = target.dims();
    target
        .mul_scalar(1.0 - smoothing)
        .add_scalar(smoothing / nb_classes as f64)
}

fn first<'a, B: Backend>(preds: &'a [Tensor<B, 2>]) -> Result<&'a Tensor<B, 2>> {
    preds
        .first()
        .ok_or_else(|| SslError::Training("Guesser called without predictions".to_string()))
}

fn mean_of<B: Backend>(preds: &[Tensor<B, 2>]) -> Result<Tensor<B, 2>> {
    let head = first(preds)?;
    for pred in preds.iter().skip(1) {
        if pred.dims() != head.dims() {
            return Err(SslError::Shape(format!(
                "Augmented views disagree on shape: {:?} vs {:?}",
                head.dims(),
                pred.dims()
            )));
        }
    }
    let sum = preds
        .iter()
        .skip(1)
        .fold(head.clone(), |acc, pred| acc + pred.clone());
    Ok(sum.div_scalar(preds.len() as f64))
}

/// One-hot argmax of the first view (FixMatch)
#[derive(Debug, Clone, Default)]
pub struct ArgmaxGuesser;

impl<B: Backend> Guesser<B> for ArgmaxGuesser {
    fn guess(&mut self, preds: &[Tensor<B, 2>]) -> Result<Tensor<B, 2>> {
        Ok(one_hot_argmax(first(preds)?.clone().detach()))
    }
}

/// One-hot argmax with label smoothing
#[derive(Debug, Clone)]
pub struct ArgmaxSmoothGuesser {
    pub smoothing: f64,
}

impl<B: Backend> Guesser<B> for ArgmaxSmoothGuesser {
    fn guess(&mut self, preds: &[Tensor<B, 2>]) -> Result<Tensor<B, 2>> {
        let one_hot = one_hot_argmax(first(preds)?.clone().detach());
        Ok(smooth(one_hot, self.smoothing))
    }
}

/// Binarized sigmoid outputs for multi-label targets
#[derive(Debug, Clone)]
pub struct MultihotGuesser {
    pub threshold: f64,
}

impl<B: Backend> Guesser<B> for MultihotGuesser {
    fn guess(&mut self, preds: &[Tensor<B, 2>]) -> Result<Tensor<B, 2>> {
        Ok(first(preds)?
            .clone()
            .detach()
            .greater_elem(self.threshold)
            .float())
    }
}

/// Mean over the augmented views, then one-hot argmax
#[derive(Debug, Clone, Default)]
pub struct MeanArgmaxGuesser;

impl<B: Backend> Guesser<B> for MeanArgmaxGuesser {
    fn guess(&mut self, preds: &[Tensor<B, 2>]) -> Result<Tensor<B, 2>> {
        Ok(one_hot_argmax(mean_of(preds)?.detach()))
    }
}

/// Mean over the augmented views, then sharpen (MixMatch)
#[derive(Debug, Clone)]
pub struct MeanSharpenGuesser {
    pub temperature: f64,
}

impl<B: Backend> Guesser<B> for MeanSharpenGuesser {
    fn guess(&mut self, preds: &[Tensor<B, 2>]) -> Result<Tensor<B, 2>> {
        Ok(sharpen(mean_of(preds)?.detach(), self.temperature))
    }
}

/// Distribution alignment of the weak view, then sharpen (ReMixMatch)
///
/// Labeled targets must be fed through [`AlignmentSharpenGuesser::observe_labeled`]
/// for the labeled prior to move away from uniform.
#[derive(Debug, Clone)]
pub struct AlignmentSharpenGuesser {
    pub distributions: ModelDistributions,
    pub temperature: f64,
}

impl AlignmentSharpenGuesser {
    pub fn new(distributions: ModelDistributions, temperature: f64) -> Self {
        Self {
            distributions,
            temperature,
        }
    }

    pub fn observe_labeled<B: Backend>(&mut self, targets: Tensor<B, 2>) -> Result<()> {
        self.distributions.add_batch_pred(targets.detach(), LABELED)
    }
}

impl<B: Backend> Guesser<B> for AlignmentSharpenGuesser {
    fn guess(&mut self, preds: &[Tensor<B, 2>]) -> Result<Tensor<B, 2>> {
        let weak = first(preds)?.clone().detach();
        self.distributions.add_batch_pred(weak.clone(), UNLABELED)?;
        let aligned = self.distributions.align(weak)?;
        Ok(sharpen(aligned, self.temperature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelMode;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn rows(t: Tensor<TestBackend, 2>) -> Vec<Vec<f32>> {
        let [_, c] = t.dims();
        t.into_data()
            .to_vec::<f32>()
            .unwrap()
            .chunks(c)
            .map(|r| r.to_vec())
            .collect()
    }

    fn preds() -> Tensor<TestBackend, 2> {
        Tensor::from_floats(
            [[0.1, 0.7, 0.2], [0.6, 0.3, 0.1], [0.2, 0.2, 0.6]],
            &Default::default(),
        )
    }

    #[test]
    fn test_argmax_rows_sum_to_one() {
        let guessed = ArgmaxGuesser.guess(&[preds()]).unwrap();
        let rows = rows(guessed);
        assert_eq!(rows[0], vec![0.0, 1.0, 0.0]);
        assert_eq!(rows[1], vec![1.0, 0.0, 0.0]);
        for row in rows {
            assert_eq!(row.iter().sum::<f32>(), 1.0);
        }
    }

    #[test]
    fn test_smoothed_argmax() {
        let mut guesser = ArgmaxSmoothGuesser { smoothing: 0.3 };
        let rows = rows(guesser.guess(&[preds()]).unwrap());
        assert!((rows[0][1] - 0.8).abs() < 1e-6);
        assert!((rows[0][0] - 0.1).abs() < 1e-6);
        assert!((rows[0].iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sharpen_sums_to_one_and_keeps_argmax() {
        let sharpened = rows(sharpen(preds(), 0.5));
        for (row, original) in sharpened.iter().zip(rows(preds())) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            let argmax = |r: &[f32]| {
                r.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                    .unwrap()
                    .0
            };
            assert_eq!(argmax(row), argmax(&original));
        }
        // Lower temperature makes the top class more confident
        assert!(sharpened[0][1] > 0.7);
    }

    #[test]
    fn test_mean_sharpen_averages_views() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[0.8, 0.2]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[0.4, 0.6]], &device);
        let mut guesser = MeanSharpenGuesser { temperature: 1.0 };
        let rows = rows(guesser.guess(&[a, b]).unwrap());
        assert!((rows[0][0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_mean_argmax_follows_the_mean() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[0.55, 0.45]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[0.1, 0.9]], &device);
        let rows = rows(MeanArgmaxGuesser.guess(&[a, b]).unwrap());
        assert_eq!(rows[0], vec![0.0, 1.0]);
    }

    #[test]
    fn test_multihot_guess() {
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.7, 0.2, 0.51]], &Default::default());
        let mut guesser = MultihotGuesser { threshold: 0.5 };
        assert_eq!(rows(guesser.guess(&[pred]).unwrap())[0], vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_empty_views_is_an_error() {
        let views: Vec<Tensor<TestBackend, 2>> = Vec::new();
        assert!(ArgmaxGuesser.guess(&views).is_err());
    }

    #[test]
    fn test_alignment_guesser_records_unlabeled_history() {
        let dist = ModelDistributions::labeled_unlabeled(4, 3, LabelMode::Onehot).unwrap();
        let mut guesser = AlignmentSharpenGuesser::new(dist, 0.5);
        guesser.observe_labeled(preds()).unwrap();
        let guessed = rows(guesser.guess(&[preds()]).unwrap());

        assert_eq!(guesser.distributions.index(UNLABELED).unwrap(), 3);
        assert_eq!(guesser.distributions.index(LABELED).unwrap(), 3);
        for row in guessed {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }
}

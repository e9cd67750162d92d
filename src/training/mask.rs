//! Confidence masking of unlabeled predictions

use burn::tensor::{backend::Backend, ElementConversion, Tensor};

use crate::config::LabelMode;

/// 1.0 where the prediction is confident enough to train on its guessed label, else 0.0.
///
/// In onehot mode a row counts when its max probability is strictly above
/// `threshold`. In multihot mode the row mean is compared instead.
pub fn confidence_mask<B: Backend>(pred: Tensor<B, 2>, threshold: f64, mode: LabelMode) -> Tensor<B, 1> {
    let score = match mode {
        LabelMode::Onehot => pred.max_dim(1),
        LabelMode::Multihot => pred.mean_dim(1),
    };
    score.squeeze::<1>(1).greater_elem(threshold).float()
}

/// Fraction of rows kept by a mask
pub fn mask_ratio<B: Backend>(mask: Tensor<B, 1>) -> f64 {
    mask.mean().into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn preds() -> Tensor<TestBackend, 2> {
        Tensor::from_floats(
            [[0.97, 0.02, 0.01], [0.6, 0.3, 0.1], [0.34, 0.33, 0.33], [0.05, 0.9, 0.05]],
            &Default::default(),
        )
    }

    fn to_vec(mask: Tensor<TestBackend, 1>) -> Vec<f32> {
        mask.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_onehot_mask_uses_max_probability() {
        let mask = to_vec(confidence_mask(preds(), 0.8, LabelMode::Onehot));
        assert_eq!(mask, vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5]], &Default::default());
        assert_eq!(to_vec(confidence_mask(pred, 0.5, LabelMode::Onehot)), vec![0.0]);
    }

    #[test]
    fn test_mask_is_monotonic_in_threshold() {
        let thresholds = [0.0, 0.3, 0.5, 0.7, 0.9, 0.95, 1.0];
        let mut previous = f64::INFINITY;
        for threshold in thresholds {
            let kept = mask_ratio(confidence_mask(preds(), threshold, LabelMode::Onehot));
            assert!(kept <= previous, "mask grew from {} to {} at {}", previous, kept, threshold);
            previous = kept;
        }
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn test_multihot_mask_uses_mean_probability() {
        let pred = Tensor::<TestBackend, 2>::from_floats(
            [[0.9, 0.8, 0.7], [0.9, 0.1, 0.1]],
            &Default::default(),
        );
        assert_eq!(
            to_vec(confidence_mask(pred, 0.5, LabelMode::Multihot)),
            vec![1.0, 0.0]
        );
    }
}

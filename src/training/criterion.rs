//! Per-example criteria on probability rows
//!
//! Every function takes predictions and targets of shape `[batch, classes]`
//! and returns one value per example (`[batch]`). Callers choose the reduction.

use burn::tensor::{backend::Backend, Tensor};

use crate::utils::error::{Result, SslError};

const BCE_EPS: f64 = 1e-7;

pub(crate) fn check_same_shape<B: Backend>(
    what: &str,
    pred: &Tensor<B, 2>,
    target: &Tensor<B, 2>,
) -> Result<()> {
    let (p, t) = (pred.dims(), target.dims());
    if p != t {
        return Err(SslError::Shape(format!(
            "{}: predictions {:?} and targets {:?} differ",
            what, p, t
        )));
    }
    Ok(())
}

/// `-sum_c target_c * ln(pred_c)`
pub fn cross_entropy<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
    check_same_shape("cross_entropy", &pred, &target)?;
    Ok((target * pred.log()).sum_dim(1).neg().squeeze(1))
}

/// `mean_c (pred_c - target_c)^2`
pub fn sq_diff<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
    check_same_shape("sq_diff", &pred, &target)?;
    Ok((pred - target).powf_scalar(2.0).mean_dim(1).squeeze(1))
}

/// Binary cross-entropy averaged over classes, for sigmoid outputs
pub fn binary_cross_entropy<B: Backend>(
    pred: Tensor<B, 2>,
    target: Tensor<B, 2>,
) -> Result<Tensor<B, 1>> {
    check_same_shape("binary_cross_entropy", &pred, &target)?;
    let pred = pred.clamp(BCE_EPS, 1.0 - BCE_EPS);
    let one_minus_target = target.clone().neg().add_scalar(1.0);
    let one_minus_pred = pred.clone().neg().add_scalar(1.0);

    let log_likelihood = target * pred.log() + one_minus_target * one_minus_pred.log();
    Ok(log_likelihood.mean_dim(1).neg().squeeze(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn values(t: Tensor<TestBackend, 1>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_cross_entropy_on_onehot_target() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.25, 0.25], [0.1, 0.1, 0.8]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]], &device);
        let ce = values(cross_entropy(pred, target).unwrap());
        assert!((ce[0] - 0.5f32.ln().abs()).abs() < 1e-5);
        assert!((ce[1] - 0.8f32.ln().abs()).abs() < 1e-5);
    }

    #[test]
    fn test_sq_diff() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);
        let loss = values(sq_diff(pred, target).unwrap());
        assert!((loss[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_binary_cross_entropy_is_small_for_confident_correct() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.99, 0.01], [0.5, 0.5]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [1.0, 0.0]], &device);
        let loss = values(binary_cross_entropy(pred, target).unwrap());
        assert!(loss[0] < 0.02);
        assert!((loss[1] - 2.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::ones([2, 3], &device);
        let target = Tensor::<TestBackend, 2>::ones([2, 4], &device);
        assert!(matches!(cross_entropy(pred, target), Err(SslError::Shape(_))));
    }
}

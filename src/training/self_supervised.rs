//! Self-supervised pretext transforms for ReMixMatch
//!
//! Each example of a batch gets one of four transforms, and the transform
//! index is the target of the model's auxiliary head.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::SelfSupervisedKind;
use crate::utils::error::{Result, SslError};

pub const NB_SELF_SUPERVISED_CLASSES: usize = 4;

/// Rotation by 0/90/180/270 degrees, or flips none/horizontal/vertical/both
#[derive(Debug, Clone)]
pub struct SelfSupervisedTransform {
    kind: SelfSupervisedKind,
    rng: ChaCha8Rng,
}

impl SelfSupervisedTransform {
    /// `None` when the component is disabled
    pub fn new(kind: SelfSupervisedKind, seed: u64) -> Option<Self> {
        match kind {
            SelfSupervisedKind::None => None,
            kind => Some(Self {
                kind,
                rng: ChaCha8Rng::seed_from_u64(seed),
            }),
        }
    }

    pub fn nb_classes(&self) -> usize {
        NB_SELF_SUPERVISED_CLASSES
    }

    pub fn kind(&self) -> SelfSupervisedKind {
        self.kind
    }

    fn apply_one<B: Backend>(&self, x: Tensor<B, 4>, class: usize) -> Tensor<B, 4> {
        match (self.kind, class) {
            (_, 0) => x,
            (SelfSupervisedKind::Rotation, 1) => x.swap_dims(2, 3).flip([3]),
            (SelfSupervisedKind::Rotation, 2) => x.flip([2, 3]),
            (SelfSupervisedKind::Rotation, _) => x.swap_dims(2, 3).flip([2]),
            (_, 1) => x.flip([3]),
            (_, 2) => x.flip([2]),
            (_, _) => x.flip([2, 3]),
        }
    }

    /// Transform each example with a fixed class and return the one-hot targets
    pub fn apply_with_classes<B: Backend>(
        &self,
        batch: Tensor<B, 4>,
        classes: &[usize],
    ) -> Result<(Tensor<B, 4>, Tensor<B, 2>)> {
        let [batch_size, _, height, width] = batch.dims();
        if classes.len() != batch_size {
            return Err(SslError::Shape(format!(
                "{} transform classes for a batch of {}",
                classes.len(),
                batch_size
            )));
        }
        if self.kind == SelfSupervisedKind::Rotation && height != width {
            return Err(SslError::Shape(format!(
                "Rotation needs square inputs, got {}x{}",
                height, width
            )));
        }
        let device = batch.device();

        let mut one_hot = vec![0.0f32; batch_size * NB_SELF_SUPERVISED_CLASSES];
        for (i, class) in classes.iter().enumerate() {
            one_hot[i * NB_SELF_SUPERVISED_CLASSES + class] = 1.0;
        }
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(one_hot, [batch_size, NB_SELF_SUPERVISED_CLASSES]),
            &device,
        );

        // Every transform on the whole batch, kept only where the class matches
        let mut out = Tensor::<B, 4>::zeros(batch.dims(), &device);
        for class in 0..NB_SELF_SUPERVISED_CLASSES {
            let keep = targets
                .clone()
                .narrow(1, class, 1)
                .reshape([batch_size, 1, 1, 1]);
            out = out + self.apply_one(batch.clone(), class) * keep;
        }
        Ok((out, targets))
    }

    /// Transform each example with a random class
    pub fn apply<B: Backend>(&mut self, batch: Tensor<B, 4>) -> Result<(Tensor<B, 4>, Tensor<B, 2>)> {
        let [batch_size, ..] = batch.dims();
        let classes: Vec<usize> = (0..batch_size)
            .map(|_| self.rng.gen_range(0..NB_SELF_SUPERVISED_CLASSES))
            .collect();
        self.apply_with_classes(batch, &classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    // A single 2x2 image:
    // 1 2
    // 3 4
    fn image() -> Tensor<TestBackend, 4> {
        Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 3.0, 4.0], &Default::default())
            .reshape([1, 1, 2, 2])
    }

    fn pixels(t: Tensor<TestBackend, 4>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_disabled_component() {
        assert!(SelfSupervisedTransform::new(SelfSupervisedKind::None, 0).is_none());
    }

    #[test]
    fn test_flips() {
        let t = SelfSupervisedTransform::new(SelfSupervisedKind::Flips, 0).unwrap();
        let expected = [
            vec![1.0, 2.0, 3.0, 4.0],
            vec![2.0, 1.0, 4.0, 3.0],
            vec![3.0, 4.0, 1.0, 2.0],
            vec![4.0, 3.0, 2.0, 1.0],
        ];
        for (class, expected) in expected.iter().enumerate() {
            let (out, targets) = t.apply_with_classes(image(), &[class]).unwrap();
            assert_eq!(&pixels(out), expected);
            let targets = targets.into_data().to_vec::<f32>().unwrap();
            assert_eq!(targets[class], 1.0);
            assert_eq!(targets.iter().sum::<f32>(), 1.0);
        }
    }

    #[test]
    fn test_rotation_is_a_permutation() {
        let t = SelfSupervisedTransform::new(SelfSupervisedKind::Rotation, 0).unwrap();
        let (quarter, _) = t.apply_with_classes(image(), &[1]).unwrap();
        let mut values = pixels(quarter);
        assert_ne!(values, vec![1.0, 2.0, 3.0, 4.0]);
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);

        let (half, _) = t.apply_with_classes(image(), &[2]).unwrap();
        assert_eq!(pixels(half), vec![4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_rotation_rejects_non_square_inputs() {
        let mut t = SelfSupervisedTransform::new(SelfSupervisedKind::Rotation, 0).unwrap();
        let batch = Tensor::<TestBackend, 4>::zeros([2, 1, 2, 3], &Default::default());
        assert!(t.apply(batch).is_err());
    }

    #[test]
    fn test_random_classes_cover_the_batch() {
        let mut t = SelfSupervisedTransform::new(SelfSupervisedKind::Flips, 9).unwrap();
        let batch = Tensor::<TestBackend, 4>::ones([16, 3, 4, 4], &Default::default());
        let (out, targets) = t.apply(batch).unwrap();
        assert_eq!(out.dims(), [16, 3, 4, 4]);
        let sums = targets.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|s| *s == 1.0));
    }
}

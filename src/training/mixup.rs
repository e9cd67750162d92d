//! MixUp and the batch mixers of MixMatch and ReMixMatch

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution};

use crate::config::{MixUpDistribution, RunConfig};
use crate::utils::error::{Result, SslError};

/// Convex combination of two batches with one coefficient per call
#[derive(Debug, Clone)]
pub struct MixUp {
    pub alpha: f64,
    pub distribution: MixUpDistribution,
    rng: ChaCha8Rng,
    last_lambda: f64,
}

impl MixUp {
    pub fn new(alpha: f64, distribution: MixUpDistribution, seed: u64) -> Self {
        Self {
            alpha,
            distribution,
            rng: ChaCha8Rng::seed_from_u64(seed),
            last_lambda: 1.0,
        }
    }

    /// Draw a coefficient, folded into `[0.5, 1]` so the first batch dominates
    pub fn sample_lambda(&mut self) -> Result<f64> {
        let lambda = match self.distribution {
            MixUpDistribution::Beta => Beta::new(self.alpha, self.alpha)
                .map_err(|e| SslError::Config(format!("Invalid MixUp alpha {}: {}", self.alpha, e)))?
                .sample(&mut self.rng),
            MixUpDistribution::Uniform => self.rng.gen_range(0.0..1.0),
            MixUpDistribution::Constant => self.alpha,
        };
        self.last_lambda = lambda.max(1.0 - lambda);
        Ok(self.last_lambda)
    }

    pub fn last_lambda(&self) -> f64 {
        self.last_lambda
    }

    pub fn mix<B: Backend>(
        &mut self,
        x_a: Tensor<B, 4>,
        y_a: Tensor<B, 2>,
        x_b: Tensor<B, 4>,
        y_b: Tensor<B, 2>,
    ) -> Result<(Tensor<B, 4>, Tensor<B, 2>)> {
        if x_a.dims() != x_b.dims() || y_a.dims() != y_b.dims() {
            return Err(SslError::Shape(format!(
                "MixUp batches differ: {:?}/{:?} and {:?}/{:?}",
                x_a.dims(),
                y_a.dims(),
                x_b.dims(),
                y_b.dims()
            )));
        }
        let lambda = self.sample_lambda()?;
        let x = x_a.mul_scalar(lambda) + x_b.mul_scalar(1.0 - lambda);
        let y = y_a.mul_scalar(lambda) + y_b.mul_scalar(1.0 - lambda);
        Ok((x, y))
    }

    fn permutation<B: Backend>(&mut self, len: usize, device: &B::Device) -> Tensor<B, 1, Int> {
        let mut order: Vec<i64> = (0..len as i64).collect();
        order.shuffle(&mut self.rng);
        Tensor::from_data(TensorData::new(order, [len]), device)
    }
}

/// Mixed labeled and unlabeled parts, ready for the loss
pub struct MixedBatch<B: Backend> {
    pub s_inputs: Tensor<B, 4>,
    pub s_targets: Tensor<B, 2>,
    pub u_inputs: Tensor<B, 4>,
    pub u_targets: Tensor<B, 2>,
}

/// Mixes labeled views and the concatenated unlabeled views against a shuffled pool.
///
/// With `shuffle_s_with_u` the pool mixes labeled and unlabeled examples,
/// otherwise each part is only shuffled within itself.
#[derive(Debug, Clone)]
pub struct MatchMixer {
    pub mixup: MixUp,
    pub shuffle_s_with_u: bool,
}

impl MatchMixer {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            mixup: MixUp::new(config.mixup_alpha, config.mixup_distribution_name, config.seed),
            shuffle_s_with_u: config.shuffle_s_with_u,
        }
    }

    /// `u_views` are the unlabeled views sharing the `u_targets` guess (K weak views
    /// for MixMatch, K strong views for ReMixMatch)
    pub fn mix<B: Backend>(
        &mut self,
        s_inputs: Tensor<B, 4>,
        s_targets: Tensor<B, 2>,
        u_views: &[Tensor<B, 4>],
        u_targets: Tensor<B, 2>,
    ) -> Result<MixedBatch<B>> {
        if u_views.is_empty() {
            return Err(SslError::Training("No unlabeled views to mix".to_string()));
        }
        let device = s_inputs.device();
        let [len_s, ..] = s_inputs.dims();

        let u_inputs = Tensor::cat(u_views.to_vec(), 0);
        let u_targets = Tensor::cat(vec![u_targets; u_views.len()], 0);
        let [len_u, ..] = u_inputs.dims();

        let (pool_inputs, pool_targets) = if self.shuffle_s_with_u {
            let inputs = Tensor::cat(vec![s_inputs.clone(), u_inputs.clone()], 0);
            let targets = Tensor::cat(vec![s_targets.clone(), u_targets.clone()], 0);
            let order = self.mixup.permutation::<B>(len_s + len_u, &device);
            (inputs.select(0, order.clone()), targets.select(0, order))
        } else {
            let order_s = self.mixup.permutation::<B>(len_s, &device);
            let order_u = self.mixup.permutation::<B>(len_u, &device);
            (
                Tensor::cat(
                    vec![
                        s_inputs.clone().select(0, order_s.clone()),
                        u_inputs.clone().select(0, order_u.clone()),
                    ],
                    0,
                ),
                Tensor::cat(
                    vec![
                        s_targets.clone().select(0, order_s),
                        u_targets.clone().select(0, order_u),
                    ],
                    0,
                ),
            )
        };

        let pool_s_inputs = pool_inputs.clone().narrow(0, 0, len_s);
        let pool_s_targets = pool_targets.clone().narrow(0, 0, len_s);
        let pool_u_inputs = pool_inputs.narrow(0, len_s, len_u);
        let pool_u_targets = pool_targets.narrow(0, len_s, len_u);

        let (s_inputs, s_targets) = self
            .mixup
            .mix(s_inputs, s_targets, pool_s_inputs, pool_s_targets)?;
        let (u_inputs, u_targets) = self
            .mixup
            .mix(u_inputs, u_targets, pool_u_inputs, pool_u_targets)?;

        Ok(MixedBatch {
            s_inputs,
            s_targets,
            u_inputs,
            u_targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_lambda_is_folded_above_half() {
        for distribution in [MixUpDistribution::Beta, MixUpDistribution::Uniform] {
            let mut mixup = MixUp::new(0.75, distribution, 42);
            for _ in 0..100 {
                let lambda = mixup.sample_lambda().unwrap();
                assert!((0.5..=1.0).contains(&lambda));
            }
        }
        let mut constant = MixUp::new(0.3, MixUpDistribution::Constant, 0);
        assert_eq!(constant.sample_lambda().unwrap(), 0.7);
    }

    #[test]
    fn test_mix_is_convex_combination() {
        let device = Default::default();
        let mut mixup = MixUp::new(0.8, MixUpDistribution::Constant, 0);
        let x_a = Tensor::<TestBackend, 4>::ones([2, 1, 2, 2], &device);
        let x_b = Tensor::<TestBackend, 4>::zeros([2, 1, 2, 2], &device);
        let y_a = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [1.0, 0.0]], &device);
        let y_b = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0], [0.0, 1.0]], &device);

        let (x, y) = mixup.mix(x_a, y_a, x_b, y_b).unwrap();
        let x = x.into_data().to_vec::<f32>().unwrap();
        assert!(x.iter().all(|v| (v - 0.8).abs() < 1e-6));
        let y = y.into_data().to_vec::<f32>().unwrap();
        assert!((y[0] - 0.8).abs() < 1e-6 && (y[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_mixer_output_shapes_and_target_mass() {
        let device = Default::default();
        let config = RunConfig::default();
        let mut mixer = MatchMixer::from_config(&config);

        let s_inputs = Tensor::<TestBackend, 4>::ones([4, 3, 2, 2], &device);
        let s_targets = Tensor::<TestBackend, 2>::from_floats(
            [[1.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]],
            &device,
        );
        let views = vec![Tensor::<TestBackend, 4>::zeros([4, 3, 2, 2], &device); 2];
        let u_targets = Tensor::<TestBackend, 2>::from_floats(
            [[0.7, 0.3], [0.4, 0.6], [0.5, 0.5], [0.9, 0.1]],
            &device,
        );

        let mixed = mixer.mix(s_inputs, s_targets, &views, u_targets).unwrap();
        assert_eq!(mixed.s_inputs.dims(), [4, 3, 2, 2]);
        assert_eq!(mixed.u_inputs.dims(), [8, 3, 2, 2]);
        assert_eq!(mixed.u_targets.dims(), [8, 2]);

        // Mixed targets stay probability rows
        let sums = mixed.u_targets.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_mixer_without_views_is_an_error() {
        let device = Default::default();
        let mut mixer = MatchMixer::from_config(&RunConfig::default());
        let s = Tensor::<TestBackend, 4>::ones([2, 1, 2, 2], &device);
        let y = Tensor::<TestBackend, 2>::ones([2, 2], &device);
        assert!(mixer.mix(s, y.clone(), &[], y).is_err());
    }
}

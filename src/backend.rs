//! Backend selection
//!
//! CPU (`NdArray`) by default, CUDA when built with the `cuda` feature.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn::backend::NdArray;

/// Backend the trainers run on
pub type TrainingBackend = Autodiff<DefaultBackend>;

#[cfg(feature = "cuda")]
const BACKEND_NAME: &str = "CUDA (GPU)";

#[cfg(not(feature = "cuda"))]
const BACKEND_NAME: &str = "NdArray (CPU)";

/// First GPU with `cuda`, the CPU otherwise
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    Default::default()
}

/// Shown in the CLI banner
pub fn backend_name() -> &'static str {
    BACKEND_NAME
}

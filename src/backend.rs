//! Backend abstraction - Multi-backend support
//!
//! Supports CUDA (GPU, optionally half precision) and NdArray (CPU) backends,
//! selected at compile time through cargo features.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (preferred, f16 with `fp16`) or NdArray (fallback)
// --------------------------------------------------------------------------------

#[cfg(all(feature = "cuda", feature = "fp16"))]
pub type DefaultBackend = burn_cuda::Cuda<burn::tensor::f16>;

#[cfg(all(feature = "cuda", not(feature = "fp16")))]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (cuda or ndarray) must be enabled!");

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(all(feature = "cuda", feature = "fp16"))]
    {
        "CUDA (GPU, f16)"
    }

    #[cfg(all(feature = "cuda", not(feature = "fp16")))]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
    {
        "NdArray (CPU)"
    }
}

/// Whether the float element is half precision
pub fn half_precision() -> bool {
    cfg!(all(feature = "cuda", feature = "fp16"))
}

/// Caveat to log when training runs in half precision
///
/// The `fp16` build swaps the float element of the whole backend. Weights,
/// optimizer state and gradients are all f16: there are no f32 master
/// weights and no loss scaling, so small updates can round away.
pub fn precision_warning() -> Option<&'static str> {
    half_precision().then_some(
        "fp16 build: weights, gradients and AdamW state are all f16 \
         (no f32 master weights, no loss scaling); small updates may underflow",
    )
}

//! Reproducibility control
//!
//! One seed drives every random source of a run: the Burn backend RNG and a
//! master ChaCha8 stream from which table shuffles, the validation split,
//! augmentation and data loader shuffles each draw their own seed.

use burn::tensor::backend::Backend;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

/// Default experiment seed
pub const DEFAULT_SEED: u64 = 43;

/// Seeded state handed to every consumer of randomness
#[derive(Debug, Clone)]
pub struct SeedState {
    seed: u64,
    master: ChaCha8Rng,
    deterministic: bool,
}

impl SeedState {
    /// Build the host-side state without touching a backend
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            master: ChaCha8Rng::seed_from_u64(seed),
            deterministic: true,
        }
    }

    /// The seed the run was started with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether deterministic kernels were requested
    pub fn deterministic_requested(&self) -> bool {
        self.deterministic
    }

    /// Draw a child seed for one consumer
    pub fn derive(&mut self, purpose: &str) -> u64 {
        let child = self.master.next_u64();
        debug!("Derived seed {} for {}", child, purpose);
        child
    }

    /// Draw a fresh RNG for one consumer
    pub fn rng_for(&mut self, purpose: &str) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.derive(purpose))
    }
}

/// Seed the backend and build the master host RNG. Call once, first.
pub fn seed_everything<B: Backend>(seed: u64, device: &B::Device) -> SeedState {
    B::seed(device, seed);

    info!("Seeded all random sources with {}", seed);
    info!("Deterministic kernels requested; accelerator kernels may still be non-deterministic");

    SeedState::new(seed)
}

//! Random train/validation split
//!
//! A random permutation picks `floor(valid_fraction * n)` validation items
//! (kept in permutation order); the remaining items form the training set in
//! their original order. Deterministic for a given RNG state.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{GradingError, Result};

/// A train/validation partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainValidSplit<T> {
    pub train: Vec<T>,
    pub valid: Vec<T>,
}

impl<T: Clone> TrainValidSplit<T> {
    /// Split `items`, holding out `valid_fraction` of them
    pub fn random<R: Rng + ?Sized>(items: &[T], valid_fraction: f64, rng: &mut R) -> Result<Self> {
        if !(0.0..1.0).contains(&valid_fraction) {
            return Err(GradingError::Dataset(format!(
                "valid_fraction must be in [0, 1), got {}",
                valid_fraction
            )));
        }

        let mut permutation: Vec<usize> = (0..items.len()).collect();
        permutation.shuffle(rng);

        let cut = (valid_fraction * items.len() as f64) as usize;
        let mut is_valid = vec![false; items.len()];
        for &i in &permutation[..cut] {
            is_valid[i] = true;
        }

        let valid = permutation[..cut].iter().map(|&i| items[i].clone()).collect();
        let train = items
            .iter()
            .zip(&is_valid)
            .filter(|(_, v)| !**v)
            .map(|(item, _)| item.clone())
            .collect();

        Ok(Self { train, valid })
    }
}

impl<T> TrainValidSplit<T> {
    pub fn len(&self) -> usize {
        self.train.len() + self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_split_partitions_items() {
        let items: Vec<usize> = (0..100).collect();
        let split = TrainValidSplit::random(&items, 0.2, &mut ChaCha8Rng::seed_from_u64(43)).unwrap();

        assert_eq!(split.valid.len(), 20);
        assert_eq!(split.train.len(), 80);

        let mut all: Vec<usize> = split.train.iter().chain(&split.valid).copied().collect();
        all.sort_unstable();
        assert_eq!(all, items);
    }

    #[test]
    fn test_train_keeps_original_order() {
        let items: Vec<usize> = (0..30).collect();
        let split = TrainValidSplit::random(&items, 0.2, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        assert!(split.train.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reproducibility() {
        let items: Vec<usize> = (0..50).collect();
        let a = TrainValidSplit::random(&items, 0.2, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        let b = TrainValidSplit::random(&items, 0.2, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        assert_eq!(a.valid, b.valid);
    }

    #[test]
    fn test_invalid_fraction() {
        let items = vec![1, 2, 3];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(TrainValidSplit::random(&items, 1.0, &mut rng).is_err());
        assert!(TrainValidSplit::random(&items, -0.1, &mut rng).is_err());
    }
}

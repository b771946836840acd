//! Uniform random sampler drawing per-pool samples without replacement.

use crate::core::HybridSampler;
use crate::utils::UniformRandomGenerator;

/// Uniform random sampler drawing distinct indices in every pool.
pub struct UniformRandomSampler {
    rng: UniformRandomGenerator<usize>,
}

impl Default for UniformRandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl UniformRandomSampler {
    /// Construct a new sampler with a random seed.
    pub fn new() -> Self {
        Self {
            rng: UniformRandomGenerator::new(),
        }
    }

    /// Construct a sampler from a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: UniformRandomGenerator::from_seed(seed),
        }
    }
}

impl HybridSampler for UniformRandomSampler {
    fn sample(&mut self, num_data: &[usize], sizes: &[usize], out: &mut [Vec<usize>]) -> bool {
        if sizes.len() != num_data.len() || out.len() < sizes.len() {
            return false;
        }
        if sizes.iter().zip(num_data).any(|(&m, &n)| m > n) {
            return false;
        }
        for ((pool, &m), &n) in out.iter_mut().zip(sizes).zip(num_data) {
            pool.clear();
            if m == 0 {
                continue;
            }
            pool.resize(m, 0);
            self.rng.gen_unique(pool, 0, n - 1);
        }
        true
    }
}

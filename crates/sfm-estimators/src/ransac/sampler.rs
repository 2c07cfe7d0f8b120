//! Uniform random sampling of minimal correspondence subsets.

use rand::Rng;

/// Draws fixed-size index subsets uniformly at random without replacement.
///
/// The sampler reuses its index buffer across draws; a partial Fisher-Yates
/// shuffle touches only the first `num_samples` positions per draw.
pub struct RandomSampler {
    num_samples: usize,
    indices: Vec<usize>,
}

impl RandomSampler {
    /// Create a sampler drawing `num_samples` indices out of `total`.
    ///
    /// `num_samples` must not exceed `total`.
    pub fn new(num_samples: usize, total: usize) -> Self {
        assert!(num_samples <= total);
        Self {
            num_samples,
            indices: (0..total).collect(),
        }
    }

    /// Draw the next sample. The returned slice is valid until the next call.
    pub fn sample<R: Rng>(&mut self, rng: &mut R) -> &[usize] {
        let total = self.indices.len();
        for i in 0..self.num_samples {
            let j = rng.random_range(i..total);
            self.indices.swap(i, j);
        }
        &self.indices[..self.num_samples]
    }
}

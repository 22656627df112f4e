use crate::dtype::Float;
use crate::tensor::Tensor;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of initial parameter values.
///
/// A single generator is threaded through every layer constructor of a model,
/// so one seed reproduces the whole network.
pub struct Initializer {
    rng: StdRng,
}

impl Initializer {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Initializer { rng }
    }

    /// Uniform values in `[-bound, bound)`.
    pub fn uniform<T: Float>(&mut self, shape: Vec<usize>, bound: f64) -> Tensor<T> {
        let mut t = Tensor::zeros(shape);
        for x in t.data_mut() {
            *x = T::from_f64(self.rng.gen_range(-bound..bound));
        }
        t
    }

    /// He-style uniform init for convolution kernels: bound `sqrt(2 / fan_in)`.
    pub fn kaiming_uniform<T: Float>(&mut self, shape: Vec<usize>, fan_in: usize) -> Tensor<T> {
        let bound = (2.0 / fan_in.max(1) as f64).sqrt();
        self.uniform(shape, bound)
    }

    /// Xavier-uniform init for dense layers: bound `sqrt(6 / (fan_in + fan_out))`.
    pub fn xavier_uniform<T: Float>(
        &mut self,
        shape: Vec<usize>,
        fan_in: usize,
        fan_out: usize,
    ) -> Tensor<T> {
        let bound = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
        self.uniform(shape, bound)
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Self::new(Some(42))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a: Tensor<f32> = Initializer::new(Some(7)).kaiming_uniform(vec![16, 3, 3, 3], 27);
        let b: Tensor<f32> = Initializer::new(Some(7)).kaiming_uniform(vec![16, 3, 3, 3], 27);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bounds() {
        let mut init = Initializer::default();
        let w: Tensor<f64> = init.xavier_uniform(vec![1280, 10], 1280, 10);
        let bound = (6.0f64 / 1290.0).sqrt();
        assert!(w.data().iter().all(|&x| x >= -bound && x < bound));

        let k: Tensor<f64> = init.kaiming_uniform(vec![8, 1, 3, 3], 9);
        let bound = (2.0f64 / 9.0).sqrt();
        assert!(k.data().iter().all(|&x| x.abs() <= bound));
    }

    #[test]
    fn test_stream_advances() {
        let mut init = Initializer::default();
        let a: Tensor<f64> = init.uniform(vec![4], 1.0);
        let b: Tensor<f64> = init.uniform(vec![4], 1.0);
        assert_ne!(a, b);
    }
}

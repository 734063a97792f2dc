use ndarray::{ArrayD, IxDyn};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::{Normal, Uniform};

use crate::{Result, Tensor};

/// Generates the initial value of a variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    /// Every scalar takes the same value.
    Const(f32),
    /// Uniform in `[low, high)`.
    Uniform { low: f32, high: f32 },
    /// Normal with the given moments.
    Normal { mean: f32, std_dev: f32 },
    /// Uniform in `±sqrt(6 / (fan_in + fan_out))`.
    XavierUniform,
    /// Normal with `std_dev = sqrt(2 / fan_in)`.
    Kaiming,
    /// Uniform in `±sqrt(3 / fan_in)`.
    LecunUniform,
}

impl Initializer {
    pub fn zeros() -> Self {
        Self::Const(0.)
    }

    pub fn ones() -> Self {
        Self::Const(1.)
    }

    /// Samples a tensor of the given shape.
    ///
    /// The fans are taken from the first and last dimension of `shape`, for vectors and
    /// scalars both fans are the amount of elements.
    ///
    /// # Arguments
    /// * `shape` - The shape of the variable.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// An error if the parameters of the distribution are invalid.
    pub fn sample<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> Result<Tensor> {
        let dim = IxDyn(shape);
        let (fan_in, fan_out) = fans(shape);

        let tensor = match *self {
            Self::Const(value) => ArrayD::from_elem(dim, value),
            Self::Uniform { low, high } => ArrayD::random_using(dim, Uniform::new(low, high)?, rng),
            Self::Normal { mean, std_dev } => {
                ArrayD::random_using(dim, Normal::new(mean, std_dev)?, rng)
            }
            Self::XavierUniform => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                ArrayD::random_using(dim, Uniform::new(-range, range)?, rng)
            }
            Self::Kaiming => {
                let std_dev = (2. / fan_in as f32).sqrt();
                ArrayD::random_using(dim, Normal::new(0., std_dev)?, rng)
            }
            Self::LecunUniform => {
                let range = (3. / fan_in as f32).sqrt();
                ArrayD::random_using(dim, Uniform::new(-range, range)?, rng)
            }
        };

        Ok(tensor)
    }
}

fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        &[n] => (n.max(1), n.max(1)),
        &[first, .., last] => (first.max(1), last.max(1)),
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn constant_fills_the_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let t = Initializer::ones().sample(&[2, 3], &mut rng).unwrap();

        assert_eq!(t.shape(), &[2, 3]);
        assert!(t.iter().all(|&x| x == 1.));
    }

    #[test]
    fn xavier_stays_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = Initializer::XavierUniform
            .sample(&[10, 20], &mut rng)
            .unwrap();

        let range = (6f32 / 30.).sqrt();
        assert!(t.iter().all(|x| x.abs() <= range));
    }

    #[test]
    fn invalid_range_is_an_error() {
        let mut rng = StdRng::seed_from_u64(0);
        let init = Initializer::Uniform { low: 1., high: 0. };
        assert!(init.sample(&[2], &mut rng).is_err());
    }

    #[test]
    fn same_seed_same_values() {
        let a = Initializer::Kaiming
            .sample(&[4, 4], &mut StdRng::seed_from_u64(3))
            .unwrap();
        let b = Initializer::Kaiming
            .sample(&[4, 4], &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(a, b);
    }
}

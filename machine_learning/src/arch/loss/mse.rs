use ndarray::{Array2, ArrayView2};

use super::{LossFn, one_hot};

/// Mean squared error loss function against one-hot encoded labels.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> f32 {
        let y = one_hot(labels, y_pred.ncols());

        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Array2<f32> {
        let y = one_hot(labels, y_pred.ncols());
        (&y_pred - &y) * (2.0 / y_pred.len() as f32)
    }
}

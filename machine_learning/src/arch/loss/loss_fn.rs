use ndarray::{Array2, ArrayView2};

use super::{Mse, SoftmaxCrossEntropy};

/// A loss over a batch of logits and their class labels.
///
/// Labels must already be validated to be lower than the amount of columns of `y_pred`.
pub trait LossFn: Send + Sync {
    fn loss(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> f32;
    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Array2<f32>;
}

/// The loss functions a model can be configured with.
#[derive(Debug, Clone, Copy)]
pub enum Loss {
    SoftmaxCrossEntropy(SoftmaxCrossEntropy),
    Mse(Mse),
}

impl LossFn for Loss {
    fn loss(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> f32 {
        match self {
            Loss::SoftmaxCrossEntropy(l) => l.loss(y_pred, labels),
            Loss::Mse(l) => l.loss(y_pred, labels),
        }
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Array2<f32> {
        match self {
            Loss::SoftmaxCrossEntropy(l) => l.loss_prime(y_pred, labels),
            Loss::Mse(l) => l.loss_prime(y_pred, labels),
        }
    }
}

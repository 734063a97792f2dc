mod loss_fn;
mod mse;
mod softmax_cross_entropy;

pub use loss_fn::{Loss, LossFn};
pub use mse::Mse;
pub use softmax_cross_entropy::SoftmaxCrossEntropy;

use ndarray::Array2;

/// Encodes class indices as the rows of a `(labels, classes)` matrix.
pub(crate) fn one_hot(labels: &[usize], classes: usize) -> Array2<f32> {
    let mut encoded = Array2::zeros((labels.len(), classes));

    for (row, &label) in labels.iter().enumerate() {
        encoded[[row, label]] = 1.;
    }

    encoded
}

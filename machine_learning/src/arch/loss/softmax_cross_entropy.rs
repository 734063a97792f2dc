use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;

/// Cross entropy between the softmax of the logits and the labels, averaged over the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftmaxCrossEntropy;

impl SoftmaxCrossEntropy {
    pub fn new() -> Self {
        Self
    }

    /// Row-wise softmax, shifted by the row maximum for stability.
    pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
        let mut probs = logits.to_owned();

        for mut row in probs.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            row.mapv_inplace(|x| (x - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|x| x / sum);
        }

        probs
    }
}

impl LossFn for SoftmaxCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> f32 {
        let n = labels.len().max(1) as f32;

        let total: f32 = y_pred
            .axis_iter(Axis(0))
            .zip(labels)
            .map(|(row, &label)| {
                let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
                let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
                log_sum - (row[label] - max)
            })
            .sum();

        total / n
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Array2<f32> {
        let n = labels.len().max(1) as f32;
        let mut d = Self::softmax(y_pred);

        for (mut row, &label) in d.axis_iter_mut(Axis(0)).zip(labels) {
            row[label] -= 1.;
            row.mapv_inplace(|x| x / n);
        }

        d
    }
}

use ndarray::Array2;

use super::DataErr;

/// The examples a single tower runs over.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// One example per row.
    pub inputs: Array2<f32>,
    /// The class index of every row, `0` is reserved for the background class.
    pub labels: Vec<usize>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// An endless stream of training examples.
pub trait DataSource: Send {
    /// Returns the amount of classes, excluding the background class.
    fn num_classes(&self) -> usize;

    /// Returns the amount of examples that make up an epoch.
    fn num_examples_per_epoch(&self) -> usize;

    /// Returns the amount of features of every example.
    fn input_dim(&self) -> usize;

    /// Draws the next `batch_size` examples and splits them evenly.
    ///
    /// # Arguments
    /// * `batch_size` - The total amount of examples to draw.
    /// * `num_splits` - The amount of splits, one per device.
    ///
    /// # Returns
    /// `num_splits` splits of `batch_size / num_splits` examples each, or `UnevenSplit` if
    /// `batch_size` isn't divisible by `num_splits`.
    fn next_splits(&mut self, batch_size: usize, num_splits: usize)
    -> Result<Vec<Split>, DataErr>;
}

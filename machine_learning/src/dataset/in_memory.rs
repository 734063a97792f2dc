use std::{fs, path::Path};

use log::debug;
use ndarray::{Array2, Axis};
use ndarray_rand::RandomExt;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use rand_distr::StandardNormal;

use super::{DataErr, DataSource, Split};

/// A dataset held entirely in memory that loops forever, reshuffling on every epoch.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    inputs: Array2<f32>,
    labels: Vec<usize>,
    num_classes: usize,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    rng: StdRng,
}

impl InMemoryDataset {
    /// Creates a new `InMemoryDataset`.
    ///
    /// # Arguments
    /// * `inputs` - One example per row.
    /// * `labels` - The label of every row, in `0..=num_classes`.
    /// * `num_classes` - The amount of classes, excluding the background class `0`.
    /// * `seed` - The seed of the shuffling.
    ///
    /// # Returns
    /// The dataset or an error if it's empty or the labels don't match the inputs.
    pub fn new(
        inputs: Array2<f32>,
        labels: Vec<usize>,
        num_classes: usize,
        seed: u64,
    ) -> Result<Self, DataErr> {
        if labels.is_empty() {
            return Err(DataErr::Empty);
        }

        if inputs.nrows() != labels.len() {
            return Err(DataErr::LengthMismatch {
                inputs: inputs.nrows(),
                labels: labels.len(),
            });
        }

        if let Some(&label) = labels.iter().find(|&&l| l > num_classes) {
            return Err(DataErr::InvalidLabel {
                label,
                classes: num_classes,
            });
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..labels.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            inputs,
            labels,
            num_classes,
            order,
            cursor: 0,
            epoch: 0,
            rng,
        })
    }

    /// Generates gaussian blobs, one per class, around random centers.
    ///
    /// # Arguments
    /// * `num_examples` - The amount of examples.
    /// * `input_dim` - The amount of features of every example.
    /// * `num_classes` - The amount of classes, labels go from `1` to `num_classes`.
    /// * `seed` - The seed of the generation and the shuffling.
    pub fn synthetic(
        num_examples: usize,
        input_dim: usize,
        num_classes: usize,
        seed: u64,
    ) -> Result<Self, DataErr> {
        if num_classes == 0 {
            return Err(DataErr::Empty);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let centers =
            Array2::<f32>::random_using((num_classes, input_dim), StandardNormal, &mut rng) * 3.;
        let mut inputs =
            Array2::<f32>::random_using((num_examples, input_dim), StandardNormal, &mut rng);

        let labels: Vec<usize> = (0..num_examples)
            .map(|_| rng.random_range(1..=num_classes))
            .collect();

        for (mut row, &label) in inputs.axis_iter_mut(Axis(0)).zip(&labels) {
            row += &centers.row(label - 1);
        }

        Self::new(inputs, labels, num_classes, seed)
    }

    /// Loads a csv file where every line is `label,feature_0,...,feature_n`.
    ///
    /// # Arguments
    /// * `path` - The path to the csv file.
    /// * `num_classes` - The amount of classes, excluding the background class.
    /// * `seed` - The seed of the shuffling.
    pub fn from_csv<P>(path: P, num_classes: usize, seed: u64) -> Result<Self, DataErr>
    where
        P: AsRef<Path>,
    {
        let content = fs::read_to_string(path)?;

        let mut labels = Vec::new();
        let mut data = Vec::new();
        let mut width = None;

        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split(',').map(str::trim);
            let label = fields
                .next()
                .unwrap_or_default()
                .parse::<usize>()
                .map_err(|e| DataErr::Parse {
                    line: i,
                    detail: format!("invalid label: {e}"),
                })?;

            let row = fields
                .map(|v| {
                    v.parse::<f32>().map_err(|_| DataErr::Parse {
                        line: i,
                        detail: format!("cannot parse '{v}' as f32"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let expected = *width.get_or_insert(row.len());
            if row.len() != expected {
                return Err(DataErr::Parse {
                    line: i,
                    detail: format!("expected {expected} features, got {}", row.len()),
                });
            }

            labels.push(label);
            data.extend(row);
        }

        let width = width.ok_or(DataErr::Empty)?;
        let inputs = Array2::from_shape_vec((labels.len(), width), data).map_err(|e| {
            DataErr::Parse {
                line: 0,
                detail: e.to_string(),
            }
        })?;

        Self::new(inputs, labels, num_classes, seed)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the amount of full passes over the data so far.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn next_index(&mut self) -> usize {
        if self.cursor == self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
            self.epoch += 1;
            debug!(epoch = self.epoch; "dataset reshuffled");
        }

        let idx = self.order[self.cursor];
        self.cursor += 1;
        idx
    }
}

impl DataSource for InMemoryDataset {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn num_examples_per_epoch(&self) -> usize {
        self.labels.len()
    }

    fn input_dim(&self) -> usize {
        self.inputs.ncols()
    }

    fn next_splits(
        &mut self,
        batch_size: usize,
        num_splits: usize,
    ) -> Result<Vec<Split>, DataErr> {
        if num_splits == 0 || batch_size % num_splits != 0 {
            return Err(DataErr::UnevenSplit {
                batch_size,
                num_splits,
            });
        }

        let split_size = batch_size / num_splits;

        let splits = (0..num_splits)
            .map(|_| {
                let indices: Vec<usize> = (0..split_size).map(|_| self.next_index()).collect();

                Split {
                    inputs: self.inputs.select(Axis(0), &indices),
                    labels: indices.iter().map(|&i| self.labels[i]).collect(),
                }
            })
            .collect();

        Ok(splits)
    }
}

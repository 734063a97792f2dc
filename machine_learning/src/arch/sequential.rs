use log::debug;
use ndarray::Array2;

use super::{
    Model, Replica, ReplicaOutput,
    layers::{Layer, LayerSpec},
    loss::{Loss, LossFn, SoftmaxCrossEntropy},
};
use crate::{
    GradientSet, MlErr, Result,
    dataset::Split,
    params::{ParamRef, ParameterStore, VariableScope},
};

/// The scope of the classification layer.
pub const LOGITS_SCOPE: &str = "logits";

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The hidden layers are followed by a `logits` dense layer with one output per class plus the
/// background class `0`.
#[derive(Debug, Clone)]
pub struct Sequential {
    input_dim: usize,
    hidden: Vec<LayerSpec>,
    num_classes: usize,
    logits_weight_decay: f32,
    restore_logits: bool,
    loss: Loss,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `input_dim` - The amount of features of every example.
    /// * `hidden` - The hidden layers.
    /// * `num_classes` - The amount of classes, excluding the background class.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(input_dim: usize, hidden: I, num_classes: usize) -> Self
    where
        I: IntoIterator<Item = LayerSpec>,
    {
        Self {
            input_dim,
            hidden: hidden.into_iter().collect(),
            num_classes,
            logits_weight_decay: 0.,
            restore_logits: true,
            loss: Loss::SoftmaxCrossEntropy(SoftmaxCrossEntropy),
        }
    }

    /// Excludes the logits from warm starts, so they are trained from scratch.
    pub fn fine_tune(mut self, fine_tune: bool) -> Self {
        self.restore_logits = !fine_tune;
        self
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_logits_weight_decay(mut self, weight_decay: f32) -> Self {
        self.logits_weight_decay = weight_decay;
        self
    }

    /// Returns the amount of outputs of the model, the background class included.
    pub fn num_outputs(&self) -> usize {
        self.num_classes + 1
    }
}

impl Model for Sequential {
    fn build(&self, scope: &mut VariableScope<'_>) -> Result<Box<dyn Replica>> {
        let mut layers = Vec::with_capacity(self.hidden.len() + 1);
        let mut dim = self.input_dim;

        for (i, spec) in self.hidden.iter().enumerate() {
            let name = format!("{}_{i}", spec.kind());
            let layer = spec.build(&mut scope.nested(&name), dim)?;

            dim = spec.output_dim(dim);
            layers.push((name, layer));
        }

        let logits = LayerSpec::Dense {
            units: self.num_outputs(),
            act_fn: None,
            weight_decay: self.logits_weight_decay,
        };
        let mut logits_scope = scope.nested(LOGITS_SCOPE).restorable(self.restore_logits);
        layers.push((LOGITS_SCOPE.to_string(), logits.build(&mut logits_scope, dim)?));

        let trainable = layers
            .iter()
            .flat_map(|(_, layer)| layer.params())
            .cloned()
            .collect();

        debug!(layers = layers.len(), mode:? = scope.mode(); "built sequential replica");

        Ok(Box::new(SequentialReplica {
            layers,
            trainable,
            loss: self.loss,
            num_outputs: self.num_outputs(),
            sparsity: Vec::new(),
        }))
    }
}

struct SequentialReplica {
    layers: Vec<(String, Layer)>,
    trainable: Vec<ParamRef>,
    loss: Loss,
    num_outputs: usize,
    sparsity: Vec<(String, f32)>,
}

impl SequentialReplica {
    fn validate(&self, split: &Split) -> Result<()> {
        if split.is_empty() {
            return Err(MlErr::EmptyBatch);
        }

        if split.inputs.nrows() != split.labels.len() {
            return Err(MlErr::SizeMismatch {
                a: "inputs",
                b: "labels",
                got: split.inputs.nrows(),
                expected: split.labels.len(),
            });
        }

        if let Some(&label) = split.labels.iter().find(|&&l| l >= self.num_outputs) {
            return Err(MlErr::InvalidLabel {
                label,
                classes: self.num_outputs - 1,
            });
        }

        Ok(())
    }
}

impl Replica for SequentialReplica {
    fn trainable(&self) -> &[ParamRef] {
        &self.trainable
    }

    fn forward_backward(
        &mut self,
        store: &ParameterStore,
        split: &Split,
    ) -> Result<ReplicaOutput> {
        self.validate(split)?;

        let mut statistic_updates = Vec::new();
        let mut sparsity = Vec::new();
        let mut x: Array2<f32> = split.inputs.clone();

        for (name, layer) in self.layers.iter_mut() {
            x = layer.forward(store, x, &mut statistic_updates)?;

            if layer.has_activation() {
                let zeros = x.iter().filter(|&&a| a == 0.).count();
                sparsity.push((format!("{name}/sparsity"), zeros as f32 / x.len() as f32));
            }
        }

        let mut loss = self.loss.loss(x.view(), &split.labels);
        for (_, layer) in &self.layers {
            loss += layer.regularization(store)?;
        }

        let mut d = self.loss.loss_prime(x.view(), &split.labels);
        let mut per_layer = Vec::with_capacity(self.layers.len());

        for (_, layer) in self.layers.iter_mut().rev() {
            let (dx, grads) = layer.backward(store, d)?;
            per_layer.push(grads);
            d = dx;
        }

        let grads = GradientSet::from_pairs(per_layer.into_iter().rev().flatten().collect());
        self.sparsity = sparsity;

        Ok(ReplicaOutput {
            loss,
            grads,
            statistic_updates,
        })
    }

    fn summaries(&self) -> Vec<(String, f32)> {
        self.sparsity.clone()
    }
}

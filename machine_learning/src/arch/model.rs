use crate::{
    GradientSet, Result,
    dataset::Split,
    params::{ParamRef, ParameterStore, StatisticUpdate, VariableScope},
};

/// What a single forward and backward pass of a replica yields.
#[derive(Debug, Clone)]
pub struct ReplicaOutput {
    /// The loss over the split, regularization included.
    pub loss: f32,
    /// One gradient per trainable variable, in `Replica::trainable` order.
    pub grads: GradientSet,
    /// The batch normalization updates of this pass.
    pub statistic_updates: Vec<StatisticUpdate>,
}

/// A network architecture that can be instantiated any amount of times over the same variables.
pub trait Model: Send + Sync {
    /// Instantiates a replica of the model.
    ///
    /// Whether the variables are created or bound to existing ones is decided by the mode of
    /// `scope`, the model itself is oblivious to it.
    ///
    /// # Arguments
    /// * `scope` - The scope the variables of the replica are defined in or reused from.
    ///
    /// # Returns
    /// The new replica or an error if its variables couldn't be defined or reused.
    fn build(&self, scope: &mut VariableScope<'_>) -> Result<Box<dyn Replica>>;
}

/// One instance of a model, bound to the variables of a `ParameterStore`.
pub trait Replica: Send {
    /// Returns the trainable variables of this replica in gradient order.
    fn trainable(&self) -> &[ParamRef];

    /// Runs the replica over `split` and backpropagates the loss.
    ///
    /// Only reads the store, the gradients and statistics updates are returned so the caller
    /// decides when to apply them.
    fn forward_backward(&mut self, store: &ParameterStore, split: &Split) -> Result<ReplicaOutput>;

    /// Returns the scalar summaries recorded during the last pass.
    fn summaries(&self) -> Vec<(String, f32)>;
}

use bridge::{Leaf, Structure, TensorSpec};
use log::debug;
use machine_learning::{
    GradientSet, Result, Tensor,
    arch::{Model, Replica, ReplicaOutput},
    dataset::Split,
    params::{ParameterStore, ScopeMode, StatisticUpdate, VariableScope},
};
use ndarray::arr0;
use rand::rngs::StdRng;

/// The key of the loss in a tower's output structure.
pub const LOSS_KEY: &str = "loss";
/// The key of the gradient pairs in a tower's output structure.
pub const GRADIENTS_KEY: &str = "gradients";

/// Builds one tower per device, all of them sharing the same variables.
///
/// The first build defines the variables of the model, every later one reuses them.
#[derive(Debug, Default)]
pub struct TowerBuilder {
    built: usize,
}

impl TowerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mode the next tower will be built with.
    pub fn mode(&self) -> ScopeMode {
        match self.built {
            0 => ScopeMode::Define,
            _ => ScopeMode::Reuse,
        }
    }

    /// Builds the tower of the next device.
    ///
    /// # Arguments
    /// * `model` - The model every tower is a replica of.
    /// * `store` - Where the variables are defined or looked up.
    /// * `rng` - The random number generator of the initializers.
    ///
    /// # Returns
    /// The new tower or an error if the variables can't be defined or reused.
    pub fn build(
        &mut self,
        model: &dyn Model,
        store: &mut ParameterStore,
        rng: &mut StdRng,
    ) -> Result<Tower> {
        let mode = self.mode();
        let replica = model.build(&mut VariableScope::new(store, rng, mode))?;

        let device = self.built;
        self.built += 1;

        debug!(device = device, mode:? = mode; "built tower");
        Ok(Tower { device, replica })
    }
}

/// The replica of the model running on one device.
pub struct Tower {
    device: usize,
    replica: Box<dyn Replica>,
}

impl Tower {
    pub fn device(&self) -> usize {
        self.device
    }

    /// Runs the forward and backward passes over a split.
    ///
    /// The store is only read, the batch norm updates are returned for the caller to apply once
    /// every tower is done.
    pub fn run(&mut self, store: &ParameterStore, split: &Split) -> Result<TowerOutput> {
        let ReplicaOutput {
            loss,
            grads,
            statistic_updates,
        } = self.replica.forward_backward(store, split)?;

        Ok(TowerOutput {
            loss,
            grads,
            statistic_updates,
        })
    }

    /// Returns the layout of this tower's outputs: its loss and a `[gradient, parameter]` pair
    /// per trainable variable.
    pub fn output_template(&self, store: &ParameterStore) -> Result<Structure<Leaf<TensorSpec>>> {
        let pairs = self
            .replica
            .trainable()
            .iter()
            .map(|param| {
                let value = store.get(param)?;

                Ok(Structure::Seq(vec![
                    Structure::Leaf(Leaf::Value(TensorSpec::of(value))),
                    Structure::Leaf(Leaf::Param(param.clone())),
                ]))
            })
            .collect::<Result<_>>()?;

        Ok(Structure::Map(vec![
            (
                LOSS_KEY.to_string(),
                Structure::Leaf(Leaf::Value(TensorSpec { shape: vec![] })),
            ),
            (GRADIENTS_KEY.to_string(), Structure::Seq(pairs)),
        ]))
    }

    /// Returns the summaries recorded during the last run.
    pub fn summaries(&self) -> Vec<(String, f32)> {
        self.replica.summaries()
    }
}

/// What one tower produced for one split.
#[derive(Debug, Clone)]
pub struct TowerOutput {
    pub loss: f32,
    pub grads: GradientSet,
    pub statistic_updates: Vec<StatisticUpdate>,
}

impl TowerOutput {
    /// Lays out the loss and gradients the way `Tower::output_template` describes them.
    pub fn to_values(&self) -> Structure<Leaf<Tensor>> {
        Structure::Map(vec![
            (
                LOSS_KEY.to_string(),
                Structure::Leaf(Leaf::Value(arr0(self.loss).into_dyn())),
            ),
            (
                GRADIENTS_KEY.to_string(),
                Structure::<Leaf<Tensor>>::from_gradients(&self.grads),
            ),
        ])
    }
}

use ndarray::Array2;

use super::{BatchNorm, Dense};
use crate::{
    Result, Tensor,
    arch::activations::ActFn,
    params::{ParamRef, ParameterStore, StatisticUpdate, VariableScope},
};

/// The description of a hidden layer, independent of any parameter store.
#[derive(Debug, Clone, Copy)]
pub enum LayerSpec {
    Dense {
        units: usize,
        act_fn: Option<ActFn>,
        weight_decay: f32,
    },
    BatchNorm {
        decay: f32,
        epsilon: f32,
    },
}

impl LayerSpec {
    pub fn dense(units: usize, act_fn: Option<ActFn>) -> Self {
        Self::Dense {
            units,
            act_fn,
            weight_decay: 0.,
        }
    }

    pub fn batch_norm() -> Self {
        Self::BatchNorm {
            decay: 0.9997,
            epsilon: 1e-3,
        }
    }

    /// The prefix of the scope a layer of this kind is built in.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dense { .. } => "dense",
            Self::BatchNorm { .. } => "batch_norm",
        }
    }

    /// Returns the output width of this layer given its input width.
    pub fn output_dim(&self, input_dim: usize) -> usize {
        match *self {
            Self::Dense { units, .. } => units,
            Self::BatchNorm { .. } => input_dim,
        }
    }

    /// Instantiates the layer, defining or reusing its variables through `scope`.
    pub fn build(&self, scope: &mut VariableScope<'_>, input_dim: usize) -> Result<Layer> {
        let layer = match *self {
            Self::Dense {
                units,
                act_fn,
                weight_decay,
            } => Layer::Dense(Dense::build(
                scope,
                (input_dim, units),
                act_fn,
                weight_decay,
            )?),
            Self::BatchNorm { decay, epsilon } => {
                Layer::BatchNorm(BatchNorm::build(scope, input_dim, decay, epsilon)?)
            }
        };

        Ok(layer)
    }
}

/// A layer bound to the variables of a `ParameterStore`.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    BatchNorm(BatchNorm),
}

impl Layer {
    pub fn params(&self) -> [&ParamRef; 2] {
        match self {
            Layer::Dense(l) => l.params(),
            Layer::BatchNorm(l) => l.params(),
        }
    }

    /// Whether the output of this layer went through a non linearity.
    pub fn has_activation(&self) -> bool {
        match self {
            Layer::Dense(l) => l.has_activation(),
            Layer::BatchNorm(_) => false,
        }
    }

    pub fn forward(
        &mut self,
        store: &ParameterStore,
        x: Array2<f32>,
        updates: &mut Vec<StatisticUpdate>,
    ) -> Result<Array2<f32>> {
        match self {
            Layer::Dense(l) => l.forward(store, x),
            Layer::BatchNorm(l) => l.forward(store, x, updates),
        }
    }

    pub fn backward(
        &mut self,
        store: &ParameterStore,
        d: Array2<f32>,
    ) -> Result<(Array2<f32>, Vec<(Tensor, ParamRef)>)> {
        match self {
            Layer::Dense(l) => l.backward(store, d),
            Layer::BatchNorm(l) => l.backward(store, d),
        }
    }

    pub fn regularization(&self, store: &ParameterStore) -> Result<f32> {
        match self {
            Layer::Dense(l) => l.regularization(store),
            Layer::BatchNorm(_) => Ok(0.),
        }
    }
}

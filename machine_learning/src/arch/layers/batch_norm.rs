use ndarray::{Array1, Array2, Axis};

use crate::{
    MlErr, Result, Tensor,
    params::{Initializer, ParamRef, ParameterStore, StatisticUpdate, VariableScope},
    view1,
};

/// Batch normalization over the feature axis.
///
/// `gamma` and `beta` are trained through the gradient protocol, the moving mean and variance
/// are not: every forward pass emits a `StatisticUpdate` for each of them and the owner of the
/// store applies it once the pass is over.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    gamma: ParamRef,
    beta: ParamRef,
    moving_mean: ParamRef,
    moving_variance: ParamRef,
    decay: f32,
    epsilon: f32,

    // Forward metadata
    xhat: Array2<f32>,
    inv_std: Array1<f32>,
}

impl BatchNorm {
    /// Creates a new `BatchNorm` layer over `dim` features.
    ///
    /// # Arguments
    /// * `scope` - The scope of this layer.
    /// * `dim` - The amount of features.
    /// * `decay` - The decay of the moving statistics.
    /// * `epsilon` - Added to the variance to avoid dividing by zero.
    pub fn build(
        scope: &mut VariableScope<'_>,
        dim: usize,
        decay: f32,
        epsilon: f32,
    ) -> Result<Self> {
        let gamma = scope.trainable("gamma", &[dim], Initializer::ones())?;
        let beta = scope.trainable("beta", &[dim], Initializer::zeros())?;
        let moving_mean = scope.statistic("moving_mean", &[dim], Initializer::zeros())?;
        let moving_variance = scope.statistic("moving_variance", &[dim], Initializer::ones())?;

        Ok(Self {
            gamma,
            beta,
            moving_mean,
            moving_variance,
            decay,
            epsilon,
            xhat: Array2::zeros((0, dim)),
            inv_std: Array1::zeros(dim),
        })
    }

    /// Returns the trainable variables of this layer in gradient order.
    pub fn params(&self) -> [&ParamRef; 2] {
        [&self.gamma, &self.beta]
    }

    /// Normalizes `x` with the statistics of the batch itself.
    ///
    /// # Arguments
    /// * `store` - Where the variables live.
    /// * `x` - The input batch.
    /// * `updates` - Where the moving statistics updates of this pass are appended.
    pub fn forward(
        &mut self,
        store: &ParameterStore,
        x: Array2<f32>,
        updates: &mut Vec<StatisticUpdate>,
    ) -> Result<Array2<f32>> {
        let gamma = view1(store.get(&self.gamma)?, self.gamma.name())?;
        let beta = view1(store.get(&self.beta)?, self.beta.name())?;

        if x.ncols() != gamma.len() {
            return Err(MlErr::ShapeMismatch {
                what: format!("input of {}", self.gamma),
                got: x.shape().to_vec(),
                expected: vec![x.nrows(), gamma.len()],
            });
        }

        let mean = x.mean_axis(Axis(0)).ok_or(MlErr::EmptyBatch)?;
        let centered = &x - &mean;
        let variance = centered
            .mapv(|c| c * c)
            .mean_axis(Axis(0))
            .ok_or(MlErr::EmptyBatch)?;

        self.inv_std = variance.mapv(|v| 1. / (v + self.epsilon).sqrt());
        self.xhat = centered * &self.inv_std;

        updates.push(StatisticUpdate {
            target: self.moving_mean.clone(),
            value: mean.into_dyn(),
            decay: self.decay,
        });
        updates.push(StatisticUpdate {
            target: self.moving_variance.clone(),
            value: variance.into_dyn(),
            decay: self.decay,
        });

        Ok(&self.xhat * &gamma + &beta)
    }

    pub fn backward(
        &mut self,
        store: &ParameterStore,
        d: Array2<f32>,
    ) -> Result<(Array2<f32>, Vec<(Tensor, ParamRef)>)> {
        let gamma = view1(store.get(&self.gamma)?, self.gamma.name())?;
        let n = d.nrows() as f32;

        let dgamma = (&d * &self.xhat).sum_axis(Axis(0));
        let dbeta = d.sum_axis(Axis(0));

        let dxhat = &d * &gamma;
        let sum_dxhat = dxhat.sum_axis(Axis(0));
        let sum_dxhat_xhat = (&dxhat * &self.xhat).sum_axis(Axis(0));

        let dx = (dxhat * n - &sum_dxhat - &self.xhat * &sum_dxhat_xhat) * &self.inv_std / n;

        let grads = vec![
            (dgamma.into_dyn(), self.gamma.clone()),
            (dbeta.into_dyn(), self.beta.clone()),
        ];

        Ok((dx, grads))
    }
}

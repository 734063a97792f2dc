use ndarray::{ArrayViewD, ArrayViewMutD, Zip};

use super::{Optimizer, Slots};
use crate::params::ParamRef;

#[derive(Debug, Clone)]
pub struct GradientDescentWithMomentum {
    momentum: f32,
    velocity: Slots,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    pub fn new(momentum: f32) -> Self {
        Self {
            momentum,
            velocity: Slots::new(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_param(
        &mut self,
        param: &ParamRef,
        learning_rate: f32,
        grad: ArrayViewD<f32>,
        value: ArrayViewMutD<f32>,
    ) {
        let mu = self.momentum;
        let velocity = self.velocity.get_or_fill(param, grad.shape(), 0.);

        Zip::from(value)
            .and(&grad)
            .and(velocity)
            .for_each(|w, &g, v| {
                *v = (mu * *v) + g;
                *w -= learning_rate * *v;
            });
    }
}

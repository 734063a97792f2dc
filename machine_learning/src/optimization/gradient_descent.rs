use ndarray::{ArrayViewD, ArrayViewMutD};

use super::Optimizer;
use crate::params::ParamRef;

/// Gradient descent optimization algorithm.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradientDescent;

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update_param(
        &mut self,
        _param: &ParamRef,
        learning_rate: f32,
        grad: ArrayViewD<f32>,
        mut value: ArrayViewMutD<f32>,
    ) {
        value.scaled_add(-learning_rate, &grad);
    }
}

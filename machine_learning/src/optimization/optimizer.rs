use ndarray::{ArrayViewD, ArrayViewMutD};

use super::GlobalStep;
use crate::{
    GradientSet, MlErr, Result,
    params::{ParamRef, ParameterStore},
};

/// A per variable update rule.
pub trait Optimizer: Send {
    /// Updates a single variable according to the algorithm's learning rule.
    ///
    /// # Arguments
    /// * `param` - The variable being updated, used to key the optimizer's state.
    /// * `learning_rate` - The learning rate of the current step.
    /// * `grad` - The gradient of the variable.
    /// * `value` - The variable itself, with the same shape as `grad`.
    fn update_param(
        &mut self,
        param: &ParamRef,
        learning_rate: f32,
        grad: ArrayViewD<f32>,
        value: ArrayViewMutD<f32>,
    );

    /// Called once before the variables of a step are updated.
    fn begin_step(&mut self) {}

    /// Applies a whole gradient set and advances the global step.
    ///
    /// Every pair is checked before any variable is touched, so a failed call leaves the
    /// store and the step untouched.
    ///
    /// # Arguments
    /// * `grads` - The gradients to apply.
    /// * `store` - Where the variables live.
    /// * `learning_rate` - The learning rate of the current step.
    /// * `global_step` - The step counter, advanced once on success.
    ///
    /// # Returns
    /// An error if a variable doesn't belong to the store or a gradient has the wrong shape.
    fn apply_gradients(
        &mut self,
        grads: &GradientSet,
        store: &mut ParameterStore,
        learning_rate: f32,
        global_step: &mut GlobalStep,
    ) -> Result<()> {
        for (grad, param) in grads {
            let value = store.get(param)?;

            if value.shape() != grad.shape() {
                return Err(MlErr::ShapeMismatch {
                    what: format!("gradient of {param}"),
                    got: grad.shape().to_vec(),
                    expected: value.shape().to_vec(),
                });
            }
        }

        self.begin_step();

        for (grad, param) in grads {
            let value = store.get_mut(param)?;
            self.update_param(param, learning_rate, grad.view(), value.view_mut());
        }

        global_step.advance();
        Ok(())
    }
}

use ndarray::{ArrayViewD, ArrayViewMutD, Zip};

use super::{Optimizer, Slots};
use crate::params::ParamRef;

/// RMSProp with momentum.
///
/// ```text
/// ms  = decay * ms + (1 - decay) * g²
/// mom = momentum * mom + lr * g / sqrt(ms + epsilon)
/// w  -= mom
/// ```
///
/// The mean square starts at one, the momentum at zero.
#[derive(Debug, Clone)]
pub struct RmsProp {
    decay: f32,
    momentum: f32,
    epsilon: f32,
    ms: Slots,
    mom: Slots,
}

impl RmsProp {
    /// Creates a new `RmsProp` optimizer.
    ///
    /// # Arguments
    /// * `decay` - The discounting factor of the mean square.
    /// * `momentum` - The discounting factor of the accumulated update.
    /// * `epsilon` - Added to the mean square before taking its root.
    pub fn new(decay: f32, momentum: f32, epsilon: f32) -> Self {
        Self {
            decay,
            momentum,
            epsilon,
            ms: Slots::new(),
            mom: Slots::new(),
        }
    }
}

impl Optimizer for RmsProp {
    fn update_param(
        &mut self,
        param: &ParamRef,
        learning_rate: f32,
        grad: ArrayViewD<f32>,
        value: ArrayViewMutD<f32>,
    ) {
        let Self {
            decay,
            momentum,
            epsilon,
            ..
        } = *self;

        let ms = self.ms.get_or_fill(param, grad.shape(), 1.);
        let mom = self.mom.get_or_fill(param, grad.shape(), 0.);

        Zip::from(value)
            .and(&grad)
            .and(ms)
            .and(mom)
            .for_each(|w, &g, ms, mom| {
                *ms = decay * *ms + (1. - decay) * g * g;
                *mom = momentum * *mom + learning_rate * g / (*ms + epsilon).sqrt();
                *w -= *mom;
            });
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn, arr1};

    use super::*;
    use crate::{
        GradientSet,
        optimization::GlobalStep,
        params::{ParameterStore, VariableKind},
    };

    fn store_with(value: &[f32]) -> (ParameterStore, ParamRef) {
        let mut store = ParameterStore::new();
        let w = store
            .define("w", arr1(value).into_dyn(), VariableKind::Trainable, true)
            .unwrap();
        (store, w)
    }

    #[test]
    fn first_step_matches_closed_form() {
        let (mut store, w) = store_with(&[1.]);
        let grads = GradientSet::from_pairs(vec![(arr1(&[2.]).into_dyn(), w.clone())]);
        let mut step = GlobalStep::default();

        let mut rms = RmsProp::new(0.9, 0.9, 1.);
        rms.apply_gradients(&grads, &mut store, 0.1, &mut step)
            .unwrap();

        // ms = 0.9 + 0.1 * 4 = 1.3, mom = 0.1 * 2 / sqrt(2.3)
        let expected = 1. - 0.2 / 2.3f32.sqrt();
        assert!((store.get(&w).unwrap()[[0]] - expected).abs() < 1e-6);
        assert_eq!(step.get(), 1);
    }

    #[test]
    fn momentum_keeps_moving_without_gradient() {
        let (mut store, w) = store_with(&[0.]);
        let mut step = GlobalStep::default();
        let mut rms = RmsProp::new(0.9, 0.9, 1.);

        let push = GradientSet::from_pairs(vec![(arr1(&[1.]).into_dyn(), w.clone())]);
        let zero = GradientSet::from_pairs(vec![(ArrayD::zeros(IxDyn(&[1])), w.clone())]);

        rms.apply_gradients(&push, &mut store, 0.1, &mut step)
            .unwrap();
        let after_push = store.get(&w).unwrap()[[0]];
        rms.apply_gradients(&zero, &mut store, 0.1, &mut step)
            .unwrap();

        assert!(store.get(&w).unwrap()[[0]] < after_push);
        assert_eq!(step.get(), 2);
    }
}

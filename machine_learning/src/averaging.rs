use std::collections::HashMap;

use ndarray::Zip;
use rayon::prelude::*;

use crate::{
    MlErr, Result, Tensor,
    optimization::GlobalStep,
    params::{ParamId, ParamRef, ParameterStore},
};

/// The suffix appended to the name of a variable to name its shadow.
pub const SHADOW_SUFFIX: &str = "ExponentialMovingAverage";

/// Which variables get an exponential moving average.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AveragingPolicy {
    /// Only the trainable variables.
    TrainableOnly,
    /// The trainable variables and the batch normalization moving statistics.
    ///
    /// The statistics are moving averages themselves, so they end up averaged twice.
    #[default]
    WithBatchNormStatistics,
}

impl AveragingPolicy {
    /// Returns the variables of `store` this policy averages, in definition order.
    pub fn select(&self, store: &ParameterStore) -> Vec<ParamRef> {
        match self {
            Self::TrainableOnly => store.trainable(),
            Self::WithBatchNormStatistics => {
                let mut vars = store.trainable();
                vars.extend(store.moving_statistics());
                vars
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Shadow {
    name: String,
    value: Tensor,
}

/// Shadow copies of variables that follow them with an exponential decay.
///
/// The decay warms up with the global step, `min(decay, (1 + step) / (10 + step))`, so the
/// shadows track the variables closely at the beginning of the training.
#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    decay: f32,
    shadows: HashMap<ParamId, Shadow>,
}

impl ExponentialMovingAverage {
    /// Creates a new `ExponentialMovingAverage`.
    ///
    /// # Arguments
    /// * `decay` - The upper bound of the decay.
    pub fn new(decay: f32) -> Self {
        Self {
            decay,
            shadows: HashMap::new(),
        }
    }

    /// Returns the name of the shadow of a variable.
    pub fn shadow_name(var: &str) -> String {
        format!("{var}/{SHADOW_SUFFIX}")
    }

    /// Returns the decay used at `step`.
    pub fn decay_at(&self, step: GlobalStep) -> f32 {
        let step = step.get() as f32;
        self.decay.min((1. + step) / (10. + step))
    }

    /// Moves the shadow of every variable in `vars` towards its current value.
    ///
    /// Shadows are created with the value of their variable the first time it's averaged.
    /// Variables are averaged independently, in parallel.
    ///
    /// # Arguments
    /// * `store` - Where the variables live.
    /// * `vars` - The variables to average.
    /// * `step` - The current global step.
    pub fn apply(
        &mut self,
        store: &ParameterStore,
        vars: &[ParamRef],
        step: GlobalStep,
    ) -> Result<()> {
        let rate = 1. - self.decay_at(step);
        let mut pending = Vec::with_capacity(vars.len());

        for var in vars {
            let value = store.get(var)?;

            self.shadows.entry(var.id()).or_insert_with(|| Shadow {
                name: Self::shadow_name(var.name()),
                value: value.clone(),
            });

            pending.push((var.id(), value));
        }

        let mut targets: Vec<(&mut Shadow, &Tensor)> = Vec::with_capacity(pending.len());
        let lookup: HashMap<ParamId, &Tensor> = pending.into_iter().collect();

        for (id, shadow) in self.shadows.iter_mut() {
            if let Some(&value) = lookup.get(id) {
                targets.push((shadow, value));
            }
        }

        targets.into_par_iter().for_each(|(shadow, value)| {
            Zip::from(&mut shadow.value)
                .and(value)
                .for_each(|s, &v| *s -= (*s - v) * rate);
        });

        Ok(())
    }

    /// Returns the shadow of `var`, if it has been averaged at least once.
    pub fn average(&self, var: &ParamRef) -> Option<&Tensor> {
        self.shadows.get(&var.id()).map(|s| &s.value)
    }

    /// Returns every `(shadow name, shadow value)` pair, in no particular order.
    pub fn shadows(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.shadows.values().map(|s| (s.name.as_str(), &s.value))
    }

    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }

    /// Restores the shadow named `name` from a saved value.
    ///
    /// # Returns
    /// `false` if `name` isn't the name of a shadow, an error if its variable doesn't exist or
    /// has a different shape.
    pub fn restore(&mut self, store: &ParameterStore, name: &str, value: Tensor) -> Result<bool> {
        let Some(var_name) = name.strip_suffix(&format!("/{SHADOW_SUFFIX}")) else {
            return Ok(false);
        };

        let var = store
            .lookup(var_name)
            .ok_or_else(|| MlErr::VariableNotDefined {
                name: var_name.to_string(),
            })?;

        let expected = store.get(&var)?.shape();
        if expected != value.shape() {
            return Err(MlErr::ShapeMismatch {
                what: name.to_string(),
                got: value.shape().to_vec(),
                expected: expected.to_vec(),
            });
        }

        self.shadows.insert(
            var.id(),
            Shadow {
                name: name.to_string(),
                value,
            },
        );

        Ok(true)
    }
}

/// An exponential moving average of a scalar, starting at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarAverage {
    decay: f32,
    value: f32,
}

impl ScalarAverage {
    pub fn new(decay: f32) -> Self {
        Self { decay, value: 0. }
    }

    /// Folds `x` into the average and returns the new average.
    pub fn update(&mut self, x: f32) -> f32 {
        self.value -= (self.value - x) * (1. - self.decay);
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;
    use crate::params::VariableKind;

    fn store() -> (ParameterStore, ParamRef, ParamRef) {
        let mut store = ParameterStore::new();
        let w = store
            .define("w", arr1(&[0.]).into_dyn(), VariableKind::Trainable, true)
            .unwrap();
        let mean = store
            .define("mean", arr1(&[0.]).into_dyn(), VariableKind::MovingStatistic, true)
            .unwrap();
        (store, w, mean)
    }

    #[test]
    fn decay_warms_up_with_the_step() {
        let ema = ExponentialMovingAverage::new(0.9999);

        assert!((ema.decay_at(GlobalStep::new(0)) - 0.1).abs() < 1e-6);
        assert!((ema.decay_at(GlobalStep::new(90)) - 0.91).abs() < 1e-6);
        assert_eq!(ema.decay_at(GlobalStep::new(10_000_000)), 0.9999);
    }

    #[test]
    fn shadows_start_at_the_variable_and_follow_it() {
        let (mut store, w, _) = store();
        let mut ema = ExponentialMovingAverage::new(0.5);

        ema.apply(&store, std::slice::from_ref(&w), GlobalStep::new(100))
            .unwrap();
        assert_eq!(ema.average(&w).unwrap()[[0]], 0.);

        store.assign(&w, arr1(&[4.]).into_dyn()).unwrap();
        ema.apply(&store, std::slice::from_ref(&w), GlobalStep::new(100))
            .unwrap();
        assert_eq!(ema.average(&w).unwrap()[[0]], 2.);
    }

    #[test]
    fn policies_select_their_variables() {
        let (store, w, mean) = store();

        assert_eq!(AveragingPolicy::TrainableOnly.select(&store), vec![w.clone()]);
        assert_eq!(
            AveragingPolicy::WithBatchNormStatistics.select(&store),
            vec![w, mean]
        );
    }

    #[test]
    fn shadows_are_named_after_their_variable_and_restorable() {
        let (store, w, _) = store();
        let mut ema = ExponentialMovingAverage::new(0.5);
        ema.apply(&store, &[w.clone()], GlobalStep::default())
            .unwrap();

        let names: Vec<&str> = ema.shadows().map(|(name, _)| name).collect();
        assert_eq!(names, ["w/ExponentialMovingAverage"]);

        let mut restored = ExponentialMovingAverage::new(0.5);
        assert!(
            restored
                .restore(&store, "w/ExponentialMovingAverage", arr1(&[3.]).into_dyn())
                .unwrap()
        );
        assert!(!restored.restore(&store, "w", arr1(&[3.]).into_dyn()).unwrap());
        assert_eq!(restored.average(&w).unwrap()[[0]], 3.);
    }

    #[test]
    fn scalar_average_starts_at_zero() {
        let mut avg = ScalarAverage::new(0.9);

        assert!((avg.update(10.) - 1.).abs() < 1e-6);
        assert!((avg.update(10.) - 1.9).abs() < 1e-5);
    }
}

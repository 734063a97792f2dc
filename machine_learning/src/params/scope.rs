use rand::rngs::StdRng;

use super::{Initializer, ParamRef, ParameterStore, VariableKind};
use crate::{MlErr, Result};

/// Whether a scope creates its variables or binds to existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// Variables are created, asking for an existing name is an error.
    Define,
    /// Variables are looked up, asking for a missing name is an error.
    Reuse,
}

/// The view a model gets of the `ParameterStore` while it's being built.
///
/// The first replica of a model is built with `ScopeMode::Define` and every later one with
/// `ScopeMode::Reuse`, so all of them end up sharing the very same variables.
pub struct VariableScope<'s> {
    store: &'s mut ParameterStore,
    rng: &'s mut StdRng,
    prefix: String,
    mode: ScopeMode,
    restore: bool,
}

impl<'s> VariableScope<'s> {
    /// Creates a new root `VariableScope`.
    ///
    /// # Arguments
    /// * `store` - Where the variables live.
    /// * `rng` - The random number generator used by initializers.
    /// * `mode` - Whether to define or reuse variables.
    pub fn new(store: &'s mut ParameterStore, rng: &'s mut StdRng, mode: ScopeMode) -> Self {
        Self {
            store,
            rng,
            prefix: String::new(),
            mode,
            restore: true,
        }
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    /// Opens a child scope, its variables are named `{prefix}/{name}/...`.
    pub fn nested(&mut self, name: &str) -> VariableScope<'_> {
        VariableScope {
            prefix: self.qualify(name),
            store: &mut *self.store,
            rng: &mut *self.rng,
            mode: self.mode,
            restore: self.restore,
        }
    }

    /// Sets whether the variables created from now on should be restored on warm starts.
    pub fn restorable(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// Returns a trainable variable, creating it or binding to it depending on the mode.
    ///
    /// # Arguments
    /// * `name` - The name of the variable inside this scope.
    /// * `shape` - The shape of the variable.
    /// * `init` - The initializer, only used when defining.
    ///
    /// # Returns
    /// The variable handle, or an error if the mode's precondition doesn't hold.
    pub fn trainable(
        &mut self,
        name: &str,
        shape: &[usize],
        init: Initializer,
    ) -> Result<ParamRef> {
        self.get_variable(name, shape, init, VariableKind::Trainable)
    }

    /// Returns a moving statistic, creating it or binding to it depending on the mode.
    pub fn statistic(
        &mut self,
        name: &str,
        shape: &[usize],
        init: Initializer,
    ) -> Result<ParamRef> {
        self.get_variable(name, shape, init, VariableKind::MovingStatistic)
    }

    fn get_variable(
        &mut self,
        name: &str,
        shape: &[usize],
        init: Initializer,
        kind: VariableKind,
    ) -> Result<ParamRef> {
        let name = self.qualify(name);

        match self.mode {
            ScopeMode::Define => {
                let value = init.sample(shape, &mut *self.rng)?;
                self.store.define(&name, value, kind, self.restore)
            }
            ScopeMode::Reuse => {
                let param = self
                    .store
                    .lookup(&name)
                    .ok_or_else(|| MlErr::VariableNotDefined { name: name.clone() })?;

                let existing = self.store.get(&param)?;
                if existing.shape() != shape {
                    return Err(MlErr::ShapeMismatch {
                        what: name,
                        got: shape.to_vec(),
                        expected: existing.shape().to_vec(),
                    });
                }

                Ok(param)
            }
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn reuse_binds_to_the_defined_variable() {
        let mut store = ParameterStore::new();
        let mut rng = StdRng::seed_from_u64(0);

        let defined = {
            let mut scope = VariableScope::new(&mut store, &mut rng, ScopeMode::Define);
            let mut dense = scope.nested("dense_0");
            dense.trainable("kernel", &[2, 3], Initializer::ones()).unwrap()
        };

        let reused = {
            let mut scope = VariableScope::new(&mut store, &mut rng, ScopeMode::Reuse);
            let mut dense = scope.nested("dense_0");
            dense.trainable("kernel", &[2, 3], Initializer::zeros()).unwrap()
        };

        assert_eq!(defined, reused);
        assert_eq!(defined.name(), "dense_0/kernel");
        assert_eq!(store.len(), 1);
        assert!(store.get(&reused).unwrap().iter().all(|&x| x == 1.));
    }

    #[test]
    fn reusing_a_missing_variable_fails() {
        let mut store = ParameterStore::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut scope = VariableScope::new(&mut store, &mut rng, ScopeMode::Reuse);

        let err = scope.trainable("w", &[1], Initializer::zeros()).unwrap_err();
        assert!(matches!(err, MlErr::VariableNotDefined { .. }));
    }

    #[test]
    fn reusing_with_another_shape_fails() {
        let mut store = ParameterStore::new();
        let mut rng = StdRng::seed_from_u64(0);

        VariableScope::new(&mut store, &mut rng, ScopeMode::Define)
            .trainable("w", &[2], Initializer::zeros())
            .unwrap();

        let err = VariableScope::new(&mut store, &mut rng, ScopeMode::Reuse)
            .trainable("w", &[3], Initializer::zeros())
            .unwrap_err();
        assert!(matches!(err, MlErr::ShapeMismatch { .. }));
    }

    #[test]
    fn restore_flag_is_inherited() {
        let mut store = ParameterStore::new();
        let mut rng = StdRng::seed_from_u64(0);

        let mut scope =
            VariableScope::new(&mut store, &mut rng, ScopeMode::Define).restorable(false);
        let w = scope
            .nested("logits")
            .trainable("kernel", &[1], Initializer::zeros())
            .unwrap();

        assert!(!store.variable(&w).unwrap().restore());
    }
}

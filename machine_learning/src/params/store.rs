use std::{collections::HashMap, fmt, sync::Arc};

use crate::{MlErr, Result, Tensor};

/// The position of a variable inside its `ParameterStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

impl ParamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A cheap handle to a variable living in a `ParameterStore`.
///
/// Handles are shared by every tower, they are never re-fed or copied into the gradient
/// protocol, only carried along next to the gradients that belong to them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamRef {
    id: ParamId,
    name: Arc<str>,
}

impl ParamRef {
    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What a variable is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Receives gradients and optimizer updates.
    Trainable,
    /// Running statistic maintained outside of the gradient protocol (batch norm moments).
    MovingStatistic,
}

/// A named tensor owned by the store.
#[derive(Debug, Clone)]
pub struct Variable {
    param: ParamRef,
    value: Tensor,
    kind: VariableKind,
    restore: bool,
}

impl Variable {
    pub fn param(&self) -> &ParamRef {
        &self.param
    }

    pub fn name(&self) -> &str {
        self.param.name()
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    /// Whether a warm start from a pretrained checkpoint should overwrite this variable.
    pub fn restore(&self) -> bool {
        self.restore
    }
}

/// A moving average update of a non trainable variable, `var -= (var - value) * (1 - decay)`.
///
/// Produced by a replica on every forward pass and applied by the owner of the store once
/// every tower has finished reading it.
#[derive(Debug, Clone)]
pub struct StatisticUpdate {
    pub target: ParamRef,
    pub value: Tensor,
    pub decay: f32,
}

/// The single copy of every variable of the model.
#[derive(Debug, Default, Clone)]
pub struct ParameterStore {
    variables: Vec<Variable>,
    by_name: HashMap<Arc<str>, ParamId>,
}

impl ParameterStore {
    /// Creates a new empty `ParameterStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the amount of variables in the store.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Returns the total amount of scalars held by the store.
    pub fn num_scalars(&self) -> usize {
        self.variables.iter().map(|v| v.value.len()).sum()
    }

    /// Adds a new variable.
    ///
    /// # Arguments
    /// * `name` - The fully qualified name of the variable.
    /// * `value` - Its initial value.
    /// * `kind` - What the variable is used for.
    /// * `restore` - Whether warm starts should overwrite it.
    ///
    /// # Returns
    /// The handle of the new variable or `VariableAlreadyDefined` if the name is taken.
    pub(crate) fn define(
        &mut self,
        name: &str,
        value: Tensor,
        kind: VariableKind,
        restore: bool,
    ) -> Result<ParamRef> {
        if self.by_name.contains_key(name) {
            return Err(MlErr::VariableAlreadyDefined {
                name: name.to_string(),
            });
        }

        let name: Arc<str> = Arc::from(name);
        let id = ParamId(self.variables.len());
        let param = ParamRef {
            id,
            name: Arc::clone(&name),
        };

        self.by_name.insert(name, id);
        self.variables.push(Variable {
            param: param.clone(),
            value,
            kind,
            restore,
        });

        Ok(param)
    }

    /// Looks up a variable by its fully qualified name.
    pub fn lookup(&self, name: &str) -> Option<ParamRef> {
        let id = self.by_name.get(name)?;
        Some(self.variables[id.0].param.clone())
    }

    /// Returns the variable behind `param`.
    ///
    /// # Returns
    /// `UnknownParam` if the handle was created by a different store.
    pub fn variable(&self, param: &ParamRef) -> Result<&Variable> {
        match self.variables.get(param.id.0) {
            Some(var) if var.param == *param => Ok(var),
            _ => Err(MlErr::UnknownParam {
                name: param.name().to_string(),
            }),
        }
    }

    pub fn get(&self, param: &ParamRef) -> Result<&Tensor> {
        self.variable(param).map(|v| &v.value)
    }

    pub fn get_mut(&mut self, param: &ParamRef) -> Result<&mut Tensor> {
        match self.variables.get_mut(param.id.0) {
            Some(var) if var.param == *param => Ok(&mut var.value),
            _ => Err(MlErr::UnknownParam {
                name: param.name().to_string(),
            }),
        }
    }

    /// Overwrites the value of a variable, keeping its shape.
    ///
    /// # Returns
    /// `ShapeMismatch` if `value` doesn't have the shape of the variable.
    pub fn assign(&mut self, param: &ParamRef, value: Tensor) -> Result<()> {
        let current = self.get_mut(param)?;

        if current.shape() != value.shape() {
            return Err(MlErr::ShapeMismatch {
                what: param.name().to_string(),
                got: value.shape().to_vec(),
                expected: current.shape().to_vec(),
            });
        }

        *current = value;
        Ok(())
    }

    /// Applies a moving average update to its target variable.
    pub fn apply_statistic_update(&mut self, update: &StatisticUpdate) -> Result<()> {
        let current = self.get_mut(&update.target)?;

        if current.shape() != update.value.shape() {
            return Err(MlErr::ShapeMismatch {
                what: update.target.name().to_string(),
                got: update.value.shape().to_vec(),
                expected: current.shape().to_vec(),
            });
        }

        let rate = 1. - update.decay;
        current.zip_mut_with(&update.value, |v, &x| *v -= (*v - x) * rate);
        Ok(())
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    /// Returns the handles of every trainable variable in definition order.
    pub fn trainable(&self) -> Vec<ParamRef> {
        self.of_kind(VariableKind::Trainable)
    }

    /// Returns the handles of every moving statistic in definition order.
    pub fn moving_statistics(&self) -> Vec<ParamRef> {
        self.of_kind(VariableKind::MovingStatistic)
    }

    fn of_kind(&self, kind: VariableKind) -> Vec<ParamRef> {
        self.variables
            .iter()
            .filter(|v| v.kind == kind)
            .map(|v| v.param.clone())
            .collect()
    }
}

use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn};

use crate::{
    Tensor,
    params::{ParamId, ParamRef},
};

/// Per variable optimizer state, lazily created the first time a variable is updated.
#[derive(Debug, Default, Clone)]
pub struct Slots {
    slots: HashMap<ParamId, Tensor>,
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot of `param`, filling a new one with `value` if it doesn't exist.
    pub fn get_or_fill(&mut self, param: &ParamRef, shape: &[usize], value: f32) -> &mut Tensor {
        self.slots
            .entry(param.id())
            .or_insert_with(|| ArrayD::from_elem(IxDyn(shape), value))
    }

    pub fn get(&self, param: &ParamRef) -> Option<&Tensor> {
        self.slots.get(&param.id())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

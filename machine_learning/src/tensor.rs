use std::slice;

use ndarray::{ArrayD, ArrayView1, ArrayView2, Ix1, Ix2};

use crate::{MlErr, Result, params::ParamRef};

/// The dense, dynamically shaped numeric type every parameter and gradient is stored as.
pub type Tensor = ArrayD<f32>;

/// Views a tensor as a matrix.
///
/// # Arguments
/// * `tensor` - The tensor to view.
/// * `what` - A name for the tensor, used in the error message.
///
/// # Returns
/// A two dimensional view or a `RankMismatch` error if the tensor isn't a matrix.
pub fn view2<'a>(tensor: &'a Tensor, what: &str) -> Result<ArrayView2<'a, f32>> {
    tensor
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| MlErr::RankMismatch {
            what: what.to_string(),
            got: tensor.ndim(),
            expected: 2,
        })
}

/// Views a tensor as a vector, see `view2`.
pub fn view1<'a>(tensor: &'a Tensor, what: &str) -> Result<ArrayView1<'a, f32>> {
    tensor
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|_| MlErr::RankMismatch {
            what: what.to_string(),
            got: tensor.ndim(),
            expected: 1,
        })
}

/// An ordered list of `(gradient, parameter)` pairs, one per trainable parameter.
///
/// Every replica of the same model produces its pairs in the same parameter order, which is
/// what allows sets coming from different devices to be averaged position by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradientSet {
    pairs: Vec<(Tensor, ParamRef)>,
}

impl GradientSet {
    /// Creates a new empty `GradientSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `GradientSet` from its pairs.
    ///
    /// # Arguments
    /// * `pairs` - The `(gradient, parameter)` pairs in parameter order.
    pub fn from_pairs(pairs: Vec<(Tensor, ParamRef)>) -> Self {
        Self { pairs }
    }

    pub fn push(&mut self, grad: Tensor, param: ParamRef) {
        self.pairs.push((grad, param));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, (Tensor, ParamRef)> {
        self.pairs.iter()
    }

    /// Returns the parameters in order.
    pub fn params(&self) -> impl Iterator<Item = &ParamRef> {
        self.pairs.iter().map(|(_, p)| p)
    }

    /// Returns the gradient paired with `param`, if any.
    pub fn grad_of(&self, param: &ParamRef) -> Option<&Tensor> {
        self.pairs.iter().find(|(_, p)| p == param).map(|(g, _)| g)
    }

    pub fn into_pairs(self) -> Vec<(Tensor, ParamRef)> {
        self.pairs
    }
}

impl<'a> IntoIterator for &'a GradientSet {
    type Item = &'a (Tensor, ParamRef);
    type IntoIter = slice::Iter<'a, (Tensor, ParamRef)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

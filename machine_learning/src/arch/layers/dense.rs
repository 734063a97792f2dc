use ndarray::{Array2, Axis};

use crate::{
    MlErr, Result, Tensor,
    arch::activations::ActFn,
    params::{Initializer, ParamRef, ParameterStore, VariableScope},
    view1, view2,
};

/// A fully connected layer, `a = act_fn(x · kernel + bias)`.
///
/// The kernel and bias live in the `ParameterStore`, the layer only keeps their handles and
/// the forward metadata needed to compute the deltas.
#[derive(Debug, Clone)]
pub struct Dense {
    kernel: ParamRef,
    bias: ParamRef,
    act_fn: Option<ActFn>,
    weight_decay: f32,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer, defining or reusing its variables through `scope`.
    ///
    /// # Arguments
    /// * `scope` - The scope of this layer, its variables are `{scope}/kernel` and `{scope}/bias`.
    /// * `dim` - The input and output sizes.
    /// * `act_fn` - An optional activation function.
    /// * `weight_decay` - The L2 regularization factor of the kernel, `0` disables it.
    ///
    /// # Returns
    /// The new layer or an error if the variables couldn't be defined or reused.
    pub fn build(
        scope: &mut VariableScope<'_>,
        dim: (usize, usize),
        act_fn: Option<ActFn>,
        weight_decay: f32,
    ) -> Result<Self> {
        let init = match act_fn {
            Some(ActFn::Relu(_)) => Initializer::Kaiming,
            _ => Initializer::XavierUniform,
        };

        let kernel = scope.trainable("kernel", &[dim.0, dim.1], init)?;
        let bias = scope.trainable("bias", &[dim.1], Initializer::zeros())?;

        Ok(Self {
            kernel,
            bias,
            act_fn,
            weight_decay,
            x: Array2::zeros((0, dim.0)),
            z: Array2::zeros((0, dim.1)),
        })
    }

    pub fn has_activation(&self) -> bool {
        self.act_fn.is_some()
    }

    /// Returns the trainable variables of this layer in gradient order.
    pub fn params(&self) -> [&ParamRef; 2] {
        [&self.kernel, &self.bias]
    }

    pub fn forward(&mut self, store: &ParameterStore, x: Array2<f32>) -> Result<Array2<f32>> {
        let w = view2(store.get(&self.kernel)?, self.kernel.name())?;
        let b = view1(store.get(&self.bias)?, self.bias.name())?;

        if x.ncols() != w.nrows() {
            return Err(MlErr::ShapeMismatch {
                what: format!("input of {}", self.kernel),
                got: x.shape().to_vec(),
                expected: vec![x.nrows(), w.nrows()],
            });
        }

        let mut z = x.dot(&w);
        z += &b;

        let a = match self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        self.x = x;
        self.z = z;
        Ok(a)
    }

    /// Backpropagates `d` through the layer.
    ///
    /// # Returns
    /// The delta for the previous layer and the `(gradient, param)` pairs of the kernel and
    /// bias, the kernel gradient already includes the weight decay term.
    pub fn backward(
        &mut self,
        store: &ParameterStore,
        mut d: Array2<f32>,
    ) -> Result<(Array2<f32>, Vec<(Tensor, ParamRef)>)> {
        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let w = view2(store.get(&self.kernel)?, self.kernel.name())?;

        let mut dw = self.x.t().dot(&d);
        if self.weight_decay > 0. {
            dw.scaled_add(self.weight_decay, &w);
        }
        let db = d.sum_axis(Axis(0));
        let dx = d.dot(&w.t());

        let grads = vec![
            (dw.into_dyn(), self.kernel.clone()),
            (db.into_dyn(), self.bias.clone()),
        ];

        Ok((dx, grads))
    }

    /// Returns the L2 regularization loss of the kernel, `0.5 * weight_decay * Σ w²`.
    pub fn regularization(&self, store: &ParameterStore) -> Result<f32> {
        if self.weight_decay == 0. {
            return Ok(0.);
        }

        let w = store.get(&self.kernel)?;
        Ok(0.5 * self.weight_decay * w.iter().map(|w| w * w).sum::<f32>())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::params::ScopeMode;

    fn layer(store: &mut ParameterStore, weight_decay: f32) -> Dense {
        let mut rng = StdRng::seed_from_u64(0);
        let dense = {
            let mut scope = VariableScope::new(store, &mut rng, ScopeMode::Define);
            Dense::build(&mut scope.nested("dense"), (2, 1), None, weight_decay).unwrap()
        };

        store
            .assign(dense.params()[0], array![[1.], [2.]].into_dyn())
            .unwrap();
        store
            .assign(dense.params()[1], arr1(&[0.5]).into_dyn())
            .unwrap();
        dense
    }

    #[test]
    fn forward_computes_affine_map() {
        let mut store = ParameterStore::new();
        let mut dense = layer(&mut store, 0.);

        let out = dense.forward(&store, array![[1., 1.], [0., 2.]]).unwrap();
        assert_eq!(out, array![[3.5], [4.5]]);
    }

    #[test]
    fn backward_produces_kernel_then_bias() {
        let mut store = ParameterStore::new();
        let mut dense = layer(&mut store, 0.);

        dense.forward(&store, array![[1., 1.], [0., 2.]]).unwrap();
        let (dx, grads) = dense.backward(&store, array![[1.], [1.]]).unwrap();

        assert_eq!(dx, array![[1., 2.], [1., 2.]]);
        assert_eq!(grads[0].1.name(), "dense/kernel");
        assert_eq!(grads[0].0, array![[1.], [3.]].into_dyn());
        assert_eq!(grads[1].0, arr1(&[2.]).into_dyn());
    }

    #[test]
    fn weight_decay_adds_to_loss_and_gradient() {
        let mut store = ParameterStore::new();
        let mut dense = layer(&mut store, 0.1);

        assert!((dense.regularization(&store).unwrap() - 0.25).abs() < 1e-6);

        dense.forward(&store, array![[0., 0.]]).unwrap();
        let (_, grads) = dense.backward(&store, array![[0.]]).unwrap();
        assert_eq!(grads[0].0, array![[0.1], [0.2]].into_dyn());
    }

    #[test]
    fn wrong_input_width_is_an_error() {
        let mut store = ParameterStore::new();
        let mut dense = layer(&mut store, 0.);

        let err = dense.forward(&store, array![[1., 2., 3.]]).unwrap_err();
        assert!(matches!(err, MlErr::ShapeMismatch { .. }));
    }
}

use machine_learning::{GradientSet, Tensor};

use crate::{BridgeErr, Leaf, Result, SlotCounter, Structure, TensorSpec};

impl<L> Structure<L> {
    /// Returns the items of a sequence.
    pub fn items(&self) -> Result<&[Structure<L>]> {
        match self {
            Structure::Seq(items) => Ok(items),
            _ => Err(unexpected("a sequence")),
        }
    }

    /// Returns the entry `key` of a mapping.
    pub fn field(&self, key: &str) -> Result<&Structure<L>> {
        match self {
            Structure::Map(entries) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, s)| s)
                .ok_or_else(|| unexpected(&format!("a mapping with the key {key}"))),
            _ => Err(unexpected("a mapping")),
        }
    }
}

impl Structure<Leaf<Tensor>> {
    /// Lays out a gradient set as a sequence of `[gradient, parameter]` pairs.
    pub fn from_gradients(grads: &GradientSet) -> Self {
        Structure::Seq(
            grads
                .iter()
                .map(|(grad, param)| {
                    Structure::Seq(vec![
                        Structure::Leaf(Leaf::Value(grad.clone())),
                        Structure::Leaf(Leaf::Param(param.clone())),
                    ])
                })
                .collect(),
        )
    }

    /// Reads back a gradient set laid out by `from_gradients`.
    pub fn to_gradient_set(&self) -> Result<GradientSet> {
        let mut grads = GradientSet::new();

        for pair in self.items()? {
            match pair.items()? {
                [Structure::Leaf(Leaf::Value(grad)), Structure::Leaf(Leaf::Param(param))] => {
                    grads.push(grad.clone(), param.clone());
                }
                _ => return Err(unexpected("a [gradient, parameter] pair")),
            }
        }

        Ok(grads)
    }

    /// Reads a single element tensor leaf.
    pub fn to_scalar(&self) -> Result<f32> {
        match self {
            Structure::Leaf(Leaf::Value(t)) if t.len() == 1 => {
                t.iter().next().copied().ok_or_else(|| unexpected("a scalar"))
            }
            _ => Err(unexpected("a scalar")),
        }
    }

    /// Returns the template of this structure: the same layout with the shapes of its tensors.
    pub fn spec(&self) -> Structure<Leaf<TensorSpec>> {
        self.map_slots(&mut SlotCounter::new(), |_, leaf| match leaf {
            Leaf::Value(tensor) => Leaf::Value(TensorSpec::of(tensor)),
            Leaf::Param(param) => Leaf::Param(param.clone()),
        })
    }
}

fn unexpected(expected: &str) -> BridgeErr {
    BridgeErr::UnexpectedLayout {
        detail: format!("expected {expected}"),
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::params::ParameterStore;
    use ndarray::{ArrayD, IxDyn, arr0};

    use super::*;
    use crate::tests::{param, value_template};

    #[test]
    fn gradient_sets_survive_the_layout() {
        let mut store = ParameterStore::new();
        let a = param(&mut store, "a");
        let b = param(&mut store, "b");

        let grads = GradientSet::from_pairs(vec![
            (ArrayD::from_elem(IxDyn(&[2]), 1.), a),
            (ArrayD::from_elem(IxDyn(&[2]), 2.), b),
        ]);

        let layout = Structure::<Leaf<Tensor>>::from_gradients(&grads);
        assert_eq!(layout.num_leaves(), 4);
        assert_eq!(layout.to_gradient_set().unwrap(), grads);
    }

    #[test]
    fn accessors_report_unexpected_layouts() {
        let mut store = ParameterStore::new();
        let w = param(&mut store, "w");
        let values = value_template(&w, 0.5, 1.);

        assert_eq!(values.field("loss").unwrap().to_scalar().unwrap(), 0.5);
        assert!(values.field("missing").is_err());
        assert!(values.items().is_err());
        assert!(Structure::Leaf(Leaf::Value(arr0(1.).into_dyn())).field("x").is_err());
    }

    #[test]
    fn spec_keeps_params_and_shapes() {
        let mut store = ParameterStore::new();
        let w = param(&mut store, "w");
        let spec = value_template(&w, 0., 0.).spec();

        let leaves = spec.leaves();
        assert_eq!(leaves[0], &Leaf::Value(TensorSpec { shape: vec![] }));
        assert_eq!(leaves[1], &Leaf::Value(TensorSpec { shape: vec![2] }));
        assert_eq!(leaves[2], &Leaf::Param(w));
    }
}

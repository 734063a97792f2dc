mod error;
mod feed;
mod gradients;
mod placeholder;
mod structure;

pub use error::{BridgeErr, Result};
pub use feed::{Feed, FeedBuilder, build_feed_from_values};
pub use placeholder::{
    PassThroughTable, Placeholder, PlaceholderBuilder, TensorSpec, build_placeholder_template,
};
pub use structure::{Leaf, SlotCounter, Structure};

#[cfg(test)]
pub(crate) mod tests {
    use machine_learning::{
        Tensor,
        params::{Initializer, ParamRef, ParameterStore, ScopeMode, VariableScope},
    };
    use ndarray::{ArrayD, IxDyn, arr0};
    use rand::{SeedableRng, rngs::StdRng};

    use crate::{Leaf, Structure, TensorSpec};

    pub fn param(store: &mut ParameterStore, name: &str) -> ParamRef {
        let mut rng = StdRng::seed_from_u64(0);
        VariableScope::new(store, &mut rng, ScopeMode::Define)
            .trainable(name, &[2], Initializer::zeros())
            .unwrap()
    }

    /// `{loss, gradients: [[grad, param]]}`, the layout of one tower output.
    pub fn value_template(w: &ParamRef, loss: f32, grad: f32) -> Structure<Leaf<Tensor>> {
        Structure::Map(vec![
            ("loss".into(), Structure::Leaf(Leaf::Value(arr0(loss).into_dyn()))),
            (
                "gradients".into(),
                Structure::Seq(vec![Structure::Seq(vec![
                    Structure::Leaf(Leaf::Value(ArrayD::from_elem(IxDyn(&[2]), grad))),
                    Structure::Leaf(Leaf::Param(w.clone())),
                ])]),
            ),
        ])
    }

    pub fn spec_template(w: &ParamRef) -> Structure<Leaf<TensorSpec>> {
        value_template(w, 0., 0.).spec()
    }
}

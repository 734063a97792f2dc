use bridge::{
    Feed, FeedBuilder, Leaf, PassThroughTable, Placeholder, PlaceholderBuilder, Structure,
    TensorSpec,
};
use log::debug;
use machine_learning::{
    GradientSet, Tensor,
    optimization::{GlobalStep, Optimizer},
    params::ParameterStore,
};
use rayon::prelude::*;

use crate::{
    Result,
    error::StructuralErr,
    tower::{GRADIENTS_KEY, LOSS_KEY},
};

/// The prefix of every slot fed to the update.
pub const GRADIENT_PREFIX: &str = "sub_batch_grad";

/// Averages gradient sets position by position.
///
/// Every position is averaged independently and in parallel, the parameter of each pair is
/// taken from the first set.
///
/// # Arguments
/// * `sets` - The gradient sets, all with the same parameters in the same order.
///
/// # Returns
/// The averaged set or the first precondition that doesn't hold.
pub fn average_gradients(
    sets: &[GradientSet],
) -> std::result::Result<GradientSet, StructuralErr> {
    let Some(first) = sets.first() else {
        return Err(StructuralErr::NoGradientSets);
    };

    if let Some((set, other)) = sets.iter().enumerate().find(|(_, s)| s.len() != first.len()) {
        return Err(StructuralErr::LengthMismatch {
            set,
            got: other.len(),
            expected: first.len(),
        });
    }

    let rows: Vec<Vec<_>> = sets.iter().map(|set| set.iter().collect()).collect();
    let count = sets.len() as f32;

    let pairs = (0..first.len())
        .into_par_iter()
        .map(|position| {
            let (head, param) = rows[0][position];
            let mut sum = head.clone();

            for row in &rows[1..] {
                let (grad, other) = row[position];

                if other != param {
                    return Err(StructuralErr::ParamMismatch {
                        position,
                        got: other.name().to_string(),
                        expected: param.name().to_string(),
                    });
                }

                if grad.shape() != head.shape() {
                    return Err(StructuralErr::ShapeMismatch {
                        param: param.name().to_string(),
                        got: grad.shape().to_vec(),
                        expected: head.shape().to_vec(),
                    });
                }

                sum += grad;
            }

            sum /= count;
            Ok((sum, param.clone()))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(GradientSet::from_pairs(pairs))
}

/// The averaging update of a step, built once over placeholders and run against a new feed on
/// every step.
///
/// Its layout is one entry per sub-batch slot, each a sequence with the output of every tower.
#[derive(Debug)]
pub struct AverageGradients {
    placeholders: Structure<Leaf<Placeholder>>,
    pass_through: PassThroughTable,
}

impl AverageGradients {
    /// Creates a new `AverageGradients`.
    ///
    /// # Arguments
    /// * `towers` - The output template of every tower for a single sub-batch.
    /// * `num_sub_batches` - How many times the towers run before every update.
    pub fn build(towers: &Structure<Leaf<TensorSpec>>, num_sub_batches: usize) -> Self {
        let mut builder = PlaceholderBuilder::new(GRADIENT_PREFIX);
        for _ in 0..num_sub_batches {
            builder.add(towers);
        }

        let (placeholders, pass_through) = builder.finish();

        debug!(
            slots = placeholders.num_leaves(),
            fed = placeholders.slot_names().len(),
            pass_through = pass_through.len();
            "built gradient placeholders"
        );

        Self {
            placeholders,
            pass_through,
        }
    }

    /// Returns the names every feed must provide.
    pub fn slot_names(&self) -> Vec<&str> {
        self.placeholders.slot_names()
    }

    /// Maps the outputs of every sub-batch onto the placeholders.
    ///
    /// # Arguments
    /// * `sub_batches` - The outputs of the towers, one entry per sub-batch in execution order.
    pub fn feed(&self, sub_batches: &[Structure<Leaf<Tensor>>]) -> Result<Feed> {
        let mut builder = FeedBuilder::new(GRADIENT_PREFIX, &self.pass_through);
        for values in sub_batches {
            builder.add(values)?;
        }

        Ok(builder.finish())
    }

    /// Averages the fed gradients of every tower and sub-batch and applies them.
    ///
    /// # Arguments
    /// * `feed` - The values of this step.
    /// * `optimizer` - The update rule.
    /// * `store` - Where the variables live.
    /// * `learning_rate` - The learning rate of this step.
    /// * `global_step` - Advanced once the update is applied.
    ///
    /// # Returns
    /// The loss of every tower execution, in feed order.
    pub fn run(
        &self,
        feed: Feed,
        optimizer: &mut dyn Optimizer,
        store: &mut ParameterStore,
        learning_rate: f32,
        global_step: &mut GlobalStep,
    ) -> Result<Vec<f32>> {
        let bound = self.placeholders.bind(feed)?;

        let mut losses = Vec::new();
        let mut sets = Vec::new();

        for slot in bound.items()? {
            for tower in slot.items()? {
                losses.push(tower.field(LOSS_KEY)?.to_scalar()?);
                sets.push(tower.field(GRADIENTS_KEY)?.to_gradient_set()?);
            }
        }

        let grads = average_gradients(&sets)?;
        optimizer.apply_gradients(&grads, store, learning_rate, global_step)?;

        Ok(losses)
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::{
        optimization::GradientDescent,
        params::{Initializer, ParamRef, ScopeMode, VariableScope},
    };
    use ndarray::{ArrayD, IxDyn, arr0, arr1};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::TrainErr;

    fn params(store: &mut ParameterStore, shapes: &[&[usize]]) -> Vec<ParamRef> {
        let mut rng = StdRng::seed_from_u64(0);
        let mut scope = VariableScope::new(store, &mut rng, ScopeMode::Define);

        shapes
            .iter()
            .enumerate()
            .map(|(i, shape)| {
                scope
                    .trainable(&format!("w{i}"), shape, Initializer::zeros())
                    .unwrap()
            })
            .collect()
    }

    fn set(params: &[ParamRef], value: f32) -> GradientSet {
        GradientSet::from_pairs(
            params
                .iter()
                .map(|p| (ArrayD::from_elem(IxDyn(&[2]), value), p.clone()))
                .collect(),
        )
    }

    #[test]
    fn two_devices_average_to_the_midpoint() {
        let mut store = ParameterStore::new();
        let w = params(&mut store, &[&[2]]);

        let a = GradientSet::from_pairs(vec![(arr1(&[1., 2.]).into_dyn(), w[0].clone())]);
        let b = GradientSet::from_pairs(vec![(arr1(&[3., 4.]).into_dyn(), w[0].clone())]);

        let avg = average_gradients(&[a, b]).unwrap();

        assert_eq!(avg.len(), 1);
        assert_eq!(avg.grad_of(&w[0]).unwrap(), &arr1(&[2., 3.]).into_dyn());
    }

    #[test]
    fn averages_any_amount_of_devices() {
        let mut store = ParameterStore::new();
        let w = params(&mut store, &[&[2], &[2], &[2]]);

        for devices in [1, 2, 8] {
            let sets: Vec<_> = (0..devices).map(|d| set(&w, d as f32)).collect();
            let avg = average_gradients(&sets).unwrap();

            let expected = (0..devices).sum::<usize>() as f32 / devices as f32;
            assert_eq!(avg.len(), w.len());
            assert!(avg.params().eq(w.iter()));
            for (grad, _) in &avg {
                assert!(grad.iter().all(|&g| (g - expected).abs() < 1e-6));
            }
        }
    }

    #[test]
    fn preconditions_are_checked() {
        let mut store = ParameterStore::new();
        let w = params(&mut store, &[&[2], &[2]]);

        assert_eq!(average_gradients(&[]), Err(StructuralErr::NoGradientSets));

        let short = set(&w[..1], 0.);
        assert_eq!(
            average_gradients(&[set(&w, 0.), short]),
            Err(StructuralErr::LengthMismatch {
                set: 1,
                got: 1,
                expected: 2,
            })
        );

        let swapped = set(&[w[1].clone(), w[0].clone()], 0.);
        assert!(matches!(
            average_gradients(&[set(&w, 0.), swapped]),
            Err(StructuralErr::ParamMismatch { .. })
        ));

        let misshaped = GradientSet::from_pairs(vec![
            (ArrayD::zeros(IxDyn(&[3])), w[0].clone()),
            (ArrayD::zeros(IxDyn(&[2])), w[1].clone()),
        ]);
        assert!(matches!(
            average_gradients(&[set(&w, 0.), misshaped]),
            Err(StructuralErr::ShapeMismatch { .. })
        ));
    }

    fn tower_values(w: &ParamRef, loss: f32, grad: f32) -> Structure<Leaf<Tensor>> {
        Structure::Map(vec![
            (
                LOSS_KEY.to_string(),
                Structure::Leaf(Leaf::Value(arr0(loss).into_dyn())),
            ),
            (
                GRADIENTS_KEY.to_string(),
                Structure::<Leaf<Tensor>>::from_gradients(&GradientSet::from_pairs(vec![(
                    ArrayD::from_elem(IxDyn(&[2]), grad),
                    w.clone(),
                )])),
            ),
        ])
    }

    #[test]
    fn update_averages_every_tower_of_every_sub_batch() {
        let mut store = ParameterStore::new();
        let w = params(&mut store, &[&[2]]).remove(0);

        let sub_batch = |grads: [f32; 2]| {
            Structure::Seq(grads.iter().map(|&g| tower_values(&w, g, g)).collect())
        };

        let update = AverageGradients::build(&sub_batch([0., 0.]).spec(), 2);
        assert_eq!(update.slot_names().len(), 2 * 2 * 2);

        let feed = update
            .feed(&[sub_batch([1., 2.]), sub_batch([3., 6.])])
            .unwrap();

        let mut step = GlobalStep::new(0);
        let losses = update
            .run(feed, &mut GradientDescent::new(), &mut store, 1., &mut step)
            .unwrap();

        assert_eq!(losses, [1., 2., 3., 6.]);
        assert_eq!(step.get(), 1);
        assert_eq!(store.get(&w).unwrap(), &ArrayD::from_elem(IxDyn(&[2]), -3.));
    }

    #[test]
    fn feeding_fewer_sub_batches_than_slots_fails() {
        let mut store = ParameterStore::new();
        let w = params(&mut store, &[&[2]]).remove(0);
        let sub_batch = Structure::Seq(vec![tower_values(&w, 1., 1.)]);

        let update = AverageGradients::build(&sub_batch.spec(), 3);
        let feed = update.feed(&[sub_batch.clone(), sub_batch]).unwrap();

        let mut step = GlobalStep::new(0);
        let err = update
            .run(feed, &mut GradientDescent::new(), &mut store, 1., &mut step)
            .unwrap_err();

        assert!(matches!(err, TrainErr::Structural(StructuralErr::Bridge(_))));
        assert_eq!(step.get(), 0);
    }
}

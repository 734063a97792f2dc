use std::collections::BTreeMap;

use log::debug;
use machine_learning::Tensor;

use crate::{
    BridgeErr, Leaf, PassThroughTable, Result, SlotCounter, Structure, placeholder::slot_name,
};

/// The concrete values of one execution, keyed by slot name.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Feed {
    values: BTreeMap<String, Tensor>,
}

impl Feed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the value of a slot.
    ///
    /// # Returns
    /// `DuplicateSlot` if the slot already has a value.
    pub fn insert(&mut self, name: String, value: Tensor) -> Result<()> {
        if self.values.contains_key(&name) {
            return Err(BridgeErr::DuplicateSlot { name });
        }

        self.values.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.values.get(name)
    }

    pub(crate) fn take(&mut self, name: &str) -> Option<Tensor> {
        self.values.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Adds the tensor leaves of `values` to `feed`, named as `build_placeholder_template` named
/// the leaves of the same layout.
///
/// Parameter leaves whose id is in `pass_through` are skipped. A parameter leaf anywhere else,
/// or a value leaf at a pass-through id, means the two layouts diverged.
///
/// # Arguments
/// * `values` - The concrete outputs, with the layout the placeholders were built from.
/// * `prefix` - The prefix of the slot names.
/// * `pass_through` - The ids of the parameter slots.
/// * `counter` - The id the first leaf takes.
/// * `feed` - Where the values are added.
///
/// # Returns
/// The counter after the last leaf, or a structural mismatch.
pub fn build_feed_from_values(
    values: &Structure<Leaf<Tensor>>,
    prefix: &str,
    pass_through: &PassThroughTable,
    mut counter: SlotCounter,
    feed: &mut Feed,
) -> Result<SlotCounter> {
    values.try_map_slots(&mut counter, |id, leaf| match leaf {
        Leaf::Value(_) if pass_through.contains(id) => Err(BridgeErr::LeafMismatch {
            slot: id,
            expected: "parameter",
            found: leaf.kind(),
        }),
        Leaf::Value(value) => feed.insert(slot_name(prefix, id), value.clone()),
        Leaf::Param(_) if pass_through.contains(id) => Ok(()),
        Leaf::Param(_) => Err(BridgeErr::LeafMismatch {
            slot: id,
            expected: "value",
            found: leaf.kind(),
        }),
    })?;

    Ok(counter)
}

/// Accumulates the values of several repeated layouts into one feed, mirroring
/// `PlaceholderBuilder`.
#[derive(Debug)]
pub struct FeedBuilder<'a> {
    prefix: &'a str,
    pass_through: &'a PassThroughTable,
    counter: SlotCounter,
    feed: Feed,
}

impl<'a> FeedBuilder<'a> {
    /// Creates a new `FeedBuilder`.
    ///
    /// # Arguments
    /// * `prefix` - The prefix the placeholders were built with.
    /// * `pass_through` - The pass-through table the placeholders were built with.
    pub fn new(prefix: &'a str, pass_through: &'a PassThroughTable) -> Self {
        Self {
            prefix,
            pass_through,
            counter: SlotCounter::new(),
            feed: Feed::new(),
        }
    }

    /// Feeds the values of the next copy of the layout.
    pub fn add(&mut self, values: &Structure<Leaf<Tensor>>) -> Result<&mut Self> {
        self.counter = build_feed_from_values(
            values,
            self.prefix,
            self.pass_through,
            self.counter,
            &mut self.feed,
        )?;
        Ok(self)
    }

    pub fn finish(self) -> Feed {
        debug!(slots = self.counter.get(), fed = self.feed.len(); "feed built");
        self.feed
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::params::ParameterStore;

    use super::*;
    use crate::{
        PlaceholderBuilder,
        tests::{param, spec_template, value_template},
    };

    #[test]
    fn parameter_slots_are_not_fed() {
        let mut store = ParameterStore::new();
        let w = param(&mut store, "w");

        let mut builder = PlaceholderBuilder::new("grad");
        builder.add(&spec_template(&w));
        let (_, pass_through) = builder.finish();

        let mut feed = Feed::new();
        let counter = build_feed_from_values(
            &value_template(&w, 1., 2.),
            "grad",
            &pass_through,
            SlotCounter::new(),
            &mut feed,
        )
        .unwrap();

        assert_eq!(counter.get(), 3);
        assert_eq!(feed.names().collect::<Vec<_>>(), ["grad_0", "grad_1"]);
        assert_eq!(feed.get("grad_0").unwrap().sum(), 1.);
    }

    #[test]
    fn a_parameter_outside_the_table_is_a_mismatch() {
        let mut store = ParameterStore::new();
        let w = param(&mut store, "w");

        let err = build_feed_from_values(
            &value_template(&w, 1., 2.),
            "grad",
            &PassThroughTable::new(),
            SlotCounter::new(),
            &mut Feed::new(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            BridgeErr::LeafMismatch {
                slot: 2,
                expected: "value",
                found: "parameter",
            }
        );
    }

    #[test]
    fn a_value_at_a_parameter_slot_is_a_mismatch() {
        let mut store = ParameterStore::new();
        let w = param(&mut store, "w");

        let mut pass_through = PassThroughTable::new();
        pass_through.insert(0);
        pass_through.insert(2);

        let mut feed = Feed::new();
        let err = build_feed_from_values(
            &value_template(&w, 1., 2.),
            "grad",
            &pass_through,
            SlotCounter::new(),
            &mut feed,
        )
        .unwrap_err();

        assert_eq!(
            err,
            BridgeErr::LeafMismatch {
                slot: 0,
                expected: "parameter",
                found: "value",
            }
        );
        assert!(feed.is_empty());
    }

    #[test]
    fn feeding_the_same_slot_twice_fails() {
        let mut store = ParameterStore::new();
        let w = param(&mut store, "w");
        let (_, pass_through) = {
            let mut builder = PlaceholderBuilder::new("grad");
            builder.add(&spec_template(&w));
            builder.finish()
        };

        let mut feed = Feed::new();
        let values = value_template(&w, 1., 2.);
        let start = SlotCounter::new();
        build_feed_from_values(&values, "grad", &pass_through, start, &mut feed).unwrap();

        let err = build_feed_from_values(&values, "grad", &pass_through, start, &mut feed)
            .unwrap_err();
        assert!(matches!(err, BridgeErr::DuplicateSlot { .. }));
    }
}

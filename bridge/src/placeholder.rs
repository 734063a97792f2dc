use std::collections::BTreeSet;

use machine_learning::Tensor;

use crate::{BridgeErr, Feed, Leaf, Result, SlotCounter, Structure};

/// The description of a tensor leaf: its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn of(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
        }
    }
}

/// A named input slot, bound to a concrete tensor only when a feed is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub shape: Vec<usize>,
}

/// The slot ids that hold parameter handles and therefore are never fed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassThroughTable(BTreeSet<usize>);

impl PassThroughTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: usize) {
        self.0.insert(slot);
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.0.contains(&slot)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Returns the name of the slot `id` under `prefix`.
pub(crate) fn slot_name(prefix: &str, id: usize) -> String {
    format!("{prefix}_{id}")
}

/// Replaces every tensor leaf of `template` by a placeholder named `{prefix}_{id}`.
///
/// Parameter leaves are kept as they are and their ids recorded in `pass_through`. Calling
/// this again with the returned counter continues the numbering, so several templates can be
/// combined into one layout.
///
/// # Arguments
/// * `template` - The structure to mirror.
/// * `prefix` - The prefix of the slot names.
/// * `counter` - The id the first leaf takes.
/// * `pass_through` - Where the ids of parameter leaves are recorded.
///
/// # Returns
/// The placeholder structure and the counter after its last leaf.
pub fn build_placeholder_template(
    template: &Structure<Leaf<TensorSpec>>,
    prefix: &str,
    mut counter: SlotCounter,
    pass_through: &mut PassThroughTable,
) -> (Structure<Leaf<Placeholder>>, SlotCounter) {
    let placeholders = template.map_slots(&mut counter, |id, leaf| match leaf {
        Leaf::Value(spec) => Leaf::Value(Placeholder {
            name: slot_name(prefix, id),
            shape: spec.shape.clone(),
        }),
        Leaf::Param(param) => {
            pass_through.insert(id);
            Leaf::Param(param.clone())
        }
    });

    (placeholders, counter)
}

/// Combines the placeholders of several repeated templates, one per sub-batch slot, into a
/// single layout sharing one counter and one pass-through table.
#[derive(Debug)]
pub struct PlaceholderBuilder {
    prefix: String,
    counter: SlotCounter,
    pass_through: PassThroughTable,
    slots: Vec<Structure<Leaf<Placeholder>>>,
}

impl PlaceholderBuilder {
    /// Creates a new `PlaceholderBuilder`.
    ///
    /// # Arguments
    /// * `prefix` - The prefix of every slot name.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: SlotCounter::new(),
            pass_through: PassThroughTable::new(),
            slots: Vec::new(),
        }
    }

    /// Appends the placeholders of one more copy of `template`.
    pub fn add(&mut self, template: &Structure<Leaf<TensorSpec>>) -> &mut Self {
        let (placeholders, counter) = build_placeholder_template(
            template,
            &self.prefix,
            self.counter,
            &mut self.pass_through,
        );

        self.counter = counter;
        self.slots.push(placeholders);
        self
    }

    /// Returns the combined layout, a sequence with one entry per added template.
    pub fn finish(self) -> (Structure<Leaf<Placeholder>>, PassThroughTable) {
        (Structure::Seq(self.slots), self.pass_through)
    }
}

impl Structure<Leaf<Placeholder>> {
    /// Returns the names of every placeholder, in slot order.
    pub fn slot_names(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                Leaf::Value(placeholder) => Some(placeholder.name.as_str()),
                Leaf::Param(_) => None,
            })
            .collect()
    }

    /// Binds every placeholder to its value in `feed`.
    ///
    /// # Arguments
    /// * `feed` - The values of this execution, every one of them must be consumed.
    ///
    /// # Returns
    /// The structure with concrete tensors in place of the placeholders, or a structural
    /// mismatch if a slot is missing, a value has the wrong shape or the feed has leftovers.
    pub fn bind(&self, mut feed: Feed) -> Result<Structure<Leaf<Tensor>>> {
        let mut counter = SlotCounter::new();

        let bound = self.try_map_slots(&mut counter, |_, leaf| match leaf {
            Leaf::Param(param) => Ok(Leaf::Param(param.clone())),
            Leaf::Value(placeholder) => {
                let value = feed.take(&placeholder.name).ok_or_else(|| BridgeErr::MissingSlot {
                    name: placeholder.name.clone(),
                })?;

                if value.shape() != placeholder.shape.as_slice() {
                    return Err(BridgeErr::ShapeMismatch {
                        name: placeholder.name.clone(),
                        got: value.shape().to_vec(),
                        expected: placeholder.shape.clone(),
                    });
                }

                Ok(Leaf::Value(value))
            }
        })?;

        if !feed.is_empty() {
            return Err(BridgeErr::ExtraSlots {
                names: feed.names().map(String::from).collect(),
            });
        }

        Ok(bound)
    }
}

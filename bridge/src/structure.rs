use std::convert::Infallible;

use machine_learning::params::ParamRef;

/// A leaf of a structure: either data or a handle to a shared variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf<V> {
    Value(V),
    Param(ParamRef),
}

impl<V> Leaf<V> {
    pub fn kind(&self) -> &'static str {
        match self {
            Leaf::Value(_) => "value",
            Leaf::Param(_) => "parameter",
        }
    }
}

/// A nested structure of sequences and mappings.
///
/// Mappings keep their insertion order, which is the order every walk visits them in.
#[derive(Debug, Clone, PartialEq)]
pub enum Structure<L> {
    Seq(Vec<Structure<L>>),
    Map(Vec<(String, Structure<L>)>),
    Leaf(L),
}

/// The running slot id shared by every walk over a combined structure.
///
/// Starts at `0` and only moves forward, one unit per leaf.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotCounter(usize);

impl SlotCounter {
    pub fn new() -> Self {
        Self(0)
    }

    /// Returns the id the next leaf will take.
    pub fn get(self) -> usize {
        self.0
    }

    fn next(&mut self) -> usize {
        let id = self.0;
        self.0 += 1;
        id
    }
}

impl<L> Structure<L> {
    /// Returns the amount of leaves in the structure.
    pub fn num_leaves(&self) -> usize {
        match self {
            Structure::Seq(items) => items.iter().map(Structure::num_leaves).sum(),
            Structure::Map(entries) => entries.iter().map(|(_, s)| s.num_leaves()).sum(),
            Structure::Leaf(_) => 1,
        }
    }

    /// Returns the leaves in slot order.
    pub fn leaves(&self) -> Vec<&L> {
        let mut leaves = Vec::with_capacity(self.num_leaves());
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a L>) {
        match self {
            Structure::Seq(items) => items.iter().for_each(|s| s.collect_leaves(leaves)),
            Structure::Map(entries) => entries.iter().for_each(|(_, s)| s.collect_leaves(leaves)),
            Structure::Leaf(leaf) => leaves.push(leaf),
        }
    }

    /// Rebuilds the structure leaf by leaf, handing every leaf its slot id.
    ///
    /// This is the one walk that defines slot ids: depth first, sequences in order and mappings
    /// in insertion order, every leaf taking the next id of `counter` whatever its kind.
    ///
    /// # Arguments
    /// * `counter` - The running slot id, left pointing after the last leaf.
    /// * `f` - Maps a `(slot id, leaf)` pair to the leaf of the new structure.
    ///
    /// # Returns
    /// The new structure or the first error returned by `f`.
    pub fn try_map_slots<M, E, F>(
        &self,
        counter: &mut SlotCounter,
        mut f: F,
    ) -> Result<Structure<M>, E>
    where
        F: FnMut(usize, &L) -> Result<M, E>,
    {
        self.walk(counter, &mut f)
    }

    /// Infallible version of `try_map_slots`.
    pub fn map_slots<M, F>(&self, counter: &mut SlotCounter, mut f: F) -> Structure<M>
    where
        F: FnMut(usize, &L) -> M,
    {
        match self.walk(counter, &mut |id, leaf| Ok::<_, Infallible>(f(id, leaf))) {
            Ok(mapped) => mapped,
            Err(never) => match never {},
        }
    }

    fn walk<M, E, F>(&self, counter: &mut SlotCounter, f: &mut F) -> Result<Structure<M>, E>
    where
        F: FnMut(usize, &L) -> Result<M, E>,
    {
        let mapped = match self {
            Structure::Seq(items) => Structure::Seq(
                items
                    .iter()
                    .map(|s| s.walk(counter, f))
                    .collect::<Result<_, _>>()?,
            ),
            Structure::Map(entries) => Structure::Map(
                entries
                    .iter()
                    .map(|(k, s)| s.walk(counter, f).map(|mapped| (k.clone(), mapped)))
                    .collect::<Result<_, _>>()?,
            ),
            Structure::Leaf(leaf) => Structure::Leaf(f(counter.next(), leaf)?),
        };

        Ok(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Structure<char> {
        Structure::Seq(vec![
            Structure::Leaf('a'),
            Structure::Map(vec![
                ("z".into(), Structure::Leaf('b')),
                ("y".into(), Structure::Seq(vec![Structure::Leaf('c')])),
            ]),
            Structure::Leaf('d'),
        ])
    }

    #[test]
    fn ids_follow_depth_first_insertion_order() {
        let mut counter = SlotCounter::new();
        let ids = nested().map_slots(&mut counter, |id, &c| (id, c));

        let leaves: Vec<_> = ids.leaves().into_iter().copied().collect();
        assert_eq!(leaves, [(0, 'a'), (1, 'b'), (2, 'c'), (3, 'd')]);
        assert_eq!(counter.get(), 4);
    }

    #[test]
    fn counter_keeps_running_across_walks() {
        let mut counter = SlotCounter::new();
        nested().map_slots(&mut counter, |_, _| ());
        let second = nested().map_slots(&mut counter, |id, _| id);

        assert_eq!(second.leaves(), [&4, &5, &6, &7]);
    }

    #[test]
    fn errors_stop_the_walk() {
        let mut counter = SlotCounter::new();
        let mut visited = Vec::new();

        let result = nested().try_map_slots(&mut counter, |id, &c| {
            visited.push(id);
            if c == 'b' { Err(id) } else { Ok(c) }
        });

        assert_eq!(result, Err(1));
        assert_eq!(visited, [0, 1]);
    }

    #[test]
    fn structure_is_preserved() {
        let mut counter = SlotCounter::new();
        let same = nested().map_slots(&mut counter, |_, &c| c);
        assert_eq!(same, nested());
    }
}

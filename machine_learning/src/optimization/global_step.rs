/// The amount of updates applied to the model so far.
///
/// It only moves forward, one unit per applied gradient set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GlobalStep(u64);

impl GlobalStep {
    pub fn new(step: u64) -> Self {
        Self(step)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn advance(&mut self) {
        self.0 += 1;
    }
}

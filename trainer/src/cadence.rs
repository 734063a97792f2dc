use std::num::NonZeroU64;

/// Defines on which steps the driver logs, summarizes and checkpoints.
#[derive(Debug, Clone)]
pub struct Cadence {
    pub log_every: NonZeroU64,
    pub summary_every: NonZeroU64,
    pub checkpoint_every: NonZeroU64,
    pub max_steps: u64,
}

impl Cadence {
    pub fn new(
        log_every: NonZeroU64,
        summary_every: NonZeroU64,
        checkpoint_every: NonZeroU64,
        max_steps: u64,
    ) -> Self {
        Self {
            log_every,
            summary_every,
            checkpoint_every,
            max_steps,
        }
    }

    #[inline]
    pub fn should_log(&self, step: u64) -> bool {
        step % self.log_every.get() == 0
    }

    #[inline]
    pub fn should_summarize(&self, step: u64) -> bool {
        step % self.summary_every.get() == 0
    }

    /// Returns true on every checkpoint period and on the last step.
    #[inline]
    pub fn should_checkpoint(&self, step: u64) -> bool {
        step % self.checkpoint_every.get() == 0 || self.is_last(step)
    }

    #[inline]
    pub fn is_last(&self, step: u64) -> bool {
        step + 1 == self.max_steps
    }
}

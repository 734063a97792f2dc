use crate::optimization::GlobalStep;

/// How the learning rate evolves with the global step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LearningRate {
    Constant(f32),
    /// `initial * factor^(step / decay_steps)`, with an integer division when `staircase`.
    ExponentialDecay {
        initial: f32,
        decay_steps: u64,
        factor: f32,
        staircase: bool,
    },
}

impl LearningRate {
    /// Creates the staircase schedule that decays the learning rate every few epochs.
    ///
    /// # Arguments
    /// * `initial` - The learning rate at step zero.
    /// * `examples_per_epoch` - The amount of examples in an epoch.
    /// * `batch_size` - The amount of examples consumed per step.
    /// * `epochs_per_decay` - The amount of epochs between decays.
    /// * `factor` - What the learning rate is multiplied by on every decay.
    pub fn epoch_staircase(
        initial: f32,
        examples_per_epoch: usize,
        batch_size: usize,
        epochs_per_decay: f32,
        factor: f32,
    ) -> Self {
        let batches_per_epoch = examples_per_epoch as f32 / batch_size.max(1) as f32;
        let decay_steps = (batches_per_epoch * epochs_per_decay) as u64;

        Self::ExponentialDecay {
            initial,
            decay_steps: decay_steps.max(1),
            factor,
            staircase: true,
        }
    }

    /// Returns the learning rate to use at `step`.
    pub fn at(&self, step: GlobalStep) -> f32 {
        match *self {
            Self::Constant(lr) => lr,
            Self::ExponentialDecay {
                initial,
                decay_steps,
                factor,
                staircase,
            } => {
                let decay_steps = decay_steps.max(1);
                let exponent = if staircase {
                    (step.get() / decay_steps) as f32
                } else {
                    step.get() as f32 / decay_steps as f32
                };

                initial * factor.powf(exponent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staircase_decays_in_steps() {
        let lr = LearningRate::epoch_staircase(0.1, 320, 32, 3., 0.5);

        assert_eq!(
            lr,
            LearningRate::ExponentialDecay {
                initial: 0.1,
                decay_steps: 30,
                factor: 0.5,
                staircase: true,
            }
        );
        assert_eq!(lr.at(GlobalStep::new(0)), 0.1);
        assert_eq!(lr.at(GlobalStep::new(29)), 0.1);
        assert_eq!(lr.at(GlobalStep::new(30)), 0.05);
        assert_eq!(lr.at(GlobalStep::new(65)), 0.025);
    }

    #[test]
    fn continuous_decay_is_smooth() {
        let lr = LearningRate::ExponentialDecay {
            initial: 1.,
            decay_steps: 10,
            factor: 0.5,
            staircase: false,
        };

        assert!((lr.at(GlobalStep::new(5)) - 0.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn tiny_datasets_still_decay() {
        let lr = LearningRate::epoch_staircase(1., 4, 32, 1., 0.5);
        assert_eq!(lr.at(GlobalStep::new(1)), 0.5);
    }
}

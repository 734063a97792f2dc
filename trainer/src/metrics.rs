use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct TrainMetrics {
    pub accumulate_time: Duration,
    pub update_time: Duration,

    pub steps: u64,
    pub sub_batches: u64,
    pub examples: u64,
}

impl TrainMetrics {
    #[inline]
    pub fn bump_step(&mut self) {
        self.steps += 1;
    }

    #[inline]
    pub fn add_sub_batches(&mut self, n: usize) {
        self.sub_batches += n as u64;
    }

    #[inline]
    pub fn add_examples(&mut self, n: usize) {
        self.examples += n as u64;
    }
}

/// How fast a single step went.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub examples_per_sec: f32,
    pub sec_per_batch: f32,
}

impl Throughput {
    pub fn new(batch_size: usize, duration: Duration) -> Self {
        let secs = duration.as_secs_f32().max(f32::EPSILON);

        Self {
            examples_per_sec: batch_size as f32 / secs,
            sec_per_batch: duration.as_secs_f32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_of_a_half_second_step() {
        let t = Throughput::new(32, Duration::from_millis(500));
        assert_eq!(t.examples_per_sec, 64.);
        assert_eq!(t.sec_per_batch, 0.5);
    }

    #[test]
    fn instant_steps_dont_divide_by_zero() {
        let t = Throughput::new(32, Duration::ZERO);
        assert!(t.examples_per_sec.is_finite());
    }
}

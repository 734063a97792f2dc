use ndarray::{ArrayViewD, ArrayViewMutD, Zip};

use super::{Optimizer, Slots};
use crate::params::ParamRef;

#[derive(Debug, Clone)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    v: Slots,
    s: Slots,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            v: Slots::new(),
            s: Slots::new(),
        }
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.beta1_t *= self.beta1;
        self.beta2_t *= self.beta2;
    }

    fn update_param(
        &mut self,
        param: &ParamRef,
        learning_rate: f32,
        grad: ArrayViewD<f32>,
        value: ArrayViewMutD<f32>,
    ) {
        let Self {
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = learning_rate * (bc2.sqrt() / bc1);

        let v = self.v.get_or_fill(param, grad.shape(), 0.);
        let s = self.s.get_or_fill(param, grad.shape(), 0.);

        Zip::from(value)
            .and(&grad)
            .and(v)
            .and(s)
            .for_each(|w, &g, v, s| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *w -= step_size * *v / (s.sqrt() + eps);
            });
    }
}

use super::{Relu, Sigmoid};

/// The element-wise non linearity applied at the output of a layer.
#[derive(Debug, Clone, Copy)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Relu(Relu),
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        ActFn::Sigmoid(Sigmoid::new(amp))
    }

    pub fn relu() -> Self {
        ActFn::Relu(Relu)
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.f(x),
            ActFn::Relu(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.df(x),
            ActFn::Relu(a) => a.df(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_dispatches_through_the_enum() {
        let act_fn = ActFn::relu();

        assert!(matches!(act_fn, ActFn::Relu(_)));
        assert_eq!(act_fn.f(-1.5), 0.);
        assert_eq!(act_fn.f(2.), 2.);
        assert_eq!(act_fn.df(-1.5), 0.);
        assert_eq!(act_fn.df(2.), 1.);
    }

    #[test]
    fn sigmoid_dispatches_through_the_enum() {
        let act_fn = ActFn::sigmoid(2.);

        assert!(matches!(act_fn, ActFn::Sigmoid(_)));
        assert_eq!(act_fn.f(0.), 1.);
        assert_eq!(act_fn.df(0.), 0.5);
    }
}

mod adam;
mod global_step;
mod gradient_descent;
mod gradient_descent_with_momentum;
mod optimizer;
mod rms_prop;
mod slots;

pub use adam::Adam;
pub use global_step::GlobalStep;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::Optimizer;
pub use rms_prop::RmsProp;
pub use slots::Slots;

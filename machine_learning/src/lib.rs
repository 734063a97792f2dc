pub mod arch;
pub mod averaging;
pub mod dataset;
pub mod error;
pub mod optimization;
pub mod params;
pub mod schedule;
mod tensor;

pub use error::{MlErr, Result};
pub use tensor::{GradientSet, Tensor, view1, view2};

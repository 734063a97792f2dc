pub mod activations;
pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use model::{Model, Replica, ReplicaOutput};
pub use sequential::{LOGITS_SCOPE, Sequential};

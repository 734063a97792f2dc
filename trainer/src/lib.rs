pub mod averager;
pub mod builder;
pub mod cadence;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod summary;
pub mod tower;

pub use builder::TrainerBuilder;
pub use config::TrainConfig;
pub use driver::Trainer;
pub use error::{Result, TrainErr};

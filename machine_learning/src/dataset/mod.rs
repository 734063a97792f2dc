mod error;
mod in_memory;
mod source;

pub use error::DataErr;
pub use in_memory::InMemoryDataset;
pub use source::{DataSource, Split};

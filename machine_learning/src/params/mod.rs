mod init;
mod scope;
mod store;

pub use init::Initializer;
pub use scope::{ScopeMode, VariableScope};
pub use store::{ParamId, ParamRef, ParameterStore, StatisticUpdate, Variable, VariableKind};

use std::{error::Error, fmt, io, path::PathBuf};

use bridge::BridgeErr;
use machine_learning::{MlErr, dataset::DataErr};
use safetensors::SafeTensorError;

use crate::config::ConfigErr;

/// The trainer's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training failures, every one of them stops the loop.
#[derive(Debug)]
pub enum TrainErr {
    Config(ConfigErr),
    Structural(StructuralErr),
    Divergence { step: u64, loss: f32 },
    Ml(MlErr),
    Data(DataErr),
    Checkpoint(CheckpointErr),
    Io(io::Error),
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Config(e) => write!(f, "invalid configuration: {e}"),
            TrainErr::Structural(e) => write!(f, "structural mismatch: {e}"),
            TrainErr::Divergence { step, loss } => {
                write!(f, "model diverged at step {step} with loss = {loss}")
            }
            TrainErr::Ml(e) => write!(f, "model error: {e}"),
            TrainErr::Data(e) => write!(f, "data error: {e}"),
            TrainErr::Checkpoint(e) => write!(f, "checkpoint error: {e}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Config(e) => Some(e),
            TrainErr::Structural(e) => Some(e),
            TrainErr::Ml(e) => Some(e),
            TrainErr::Data(e) => Some(e),
            TrainErr::Checkpoint(e) => Some(e),
            TrainErr::Io(e) => Some(e),
            TrainErr::Divergence { .. } => None,
        }
    }
}

impl From<ConfigErr> for TrainErr {
    fn from(value: ConfigErr) -> Self {
        Self::Config(value)
    }
}

impl From<StructuralErr> for TrainErr {
    fn from(value: StructuralErr) -> Self {
        Self::Structural(value)
    }
}

impl From<BridgeErr> for TrainErr {
    fn from(value: BridgeErr) -> Self {
        Self::Structural(StructuralErr::Bridge(value))
    }
}

impl From<MlErr> for TrainErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<DataErr> for TrainErr {
    fn from(value: DataErr) -> Self {
        Self::Data(value)
    }
}

impl From<CheckpointErr> for TrainErr {
    fn from(value: CheckpointErr) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for the binary.
impl From<TrainErr> for io::Error {
    fn from(value: TrainErr) -> Self {
        match value {
            TrainErr::Io(e) => e,
            TrainErr::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, value),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// The gradient protocol saw values laid out differently than its placeholders, or gradient
/// sets that can't be averaged together.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralErr {
    Bridge(BridgeErr),
    NoGradientSets,
    LengthMismatch {
        set: usize,
        got: usize,
        expected: usize,
    },
    ParamMismatch {
        position: usize,
        got: String,
        expected: String,
    },
    ShapeMismatch {
        param: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
}

impl fmt::Display for StructuralErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralErr::Bridge(e) => write!(f, "{e}"),
            StructuralErr::NoGradientSets => write!(f, "there are no gradient sets to average"),
            StructuralErr::LengthMismatch { set, got, expected } => write!(
                f,
                "gradient set {set} has {got} gradients, expected {expected}"
            ),
            StructuralErr::ParamMismatch {
                position,
                got,
                expected,
            } => write!(
                f,
                "gradient {position} belongs to {got}, expected {expected}"
            ),
            StructuralErr::ShapeMismatch {
                param,
                got,
                expected,
            } => write!(
                f,
                "gradient of {param} has shape {got:?}, expected {expected:?}"
            ),
        }
    }
}

impl Error for StructuralErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StructuralErr::Bridge(e) => Some(e),
            _ => None,
        }
    }
}

/// Failures while writing or reading checkpoints.
#[derive(Debug)]
pub enum CheckpointErr {
    Io(io::Error),
    Format(SafeTensorError),
    Index(serde_json::Error),
    UnsupportedDtype { name: String },
    Corrupt { name: String },
    MissingStep { path: PathBuf },
    Ml(MlErr),
}

impl fmt::Display for CheckpointErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointErr::Io(e) => write!(f, "io error: {e}"),
            CheckpointErr::Format(e) => write!(f, "malformed checkpoint: {e:?}"),
            CheckpointErr::Index(e) => write!(f, "malformed checkpoint index: {e}"),
            CheckpointErr::UnsupportedDtype { name } => {
                write!(f, "tensor {name} isn't stored as f32")
            }
            CheckpointErr::Corrupt { name } => {
                write!(f, "the data of tensor {name} doesn't match its shape")
            }
            CheckpointErr::MissingStep { path } => {
                write!(f, "checkpoint {} doesn't record its step", path.display())
            }
            CheckpointErr::Ml(e) => write!(f, "{e}"),
        }
    }
}

impl Error for CheckpointErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointErr::Io(e) => Some(e),
            CheckpointErr::Index(e) => Some(e),
            CheckpointErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckpointErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for CheckpointErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Format(value)
    }
}

impl From<serde_json::Error> for CheckpointErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Index(value)
    }
}

impl From<MlErr> for CheckpointErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

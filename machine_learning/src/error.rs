use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::{NormalError, uniform::Error as UniformError};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    RankMismatch {
        what: String,
        got: usize,
        expected: usize,
    },
    VariableAlreadyDefined {
        name: String,
    },
    VariableNotDefined {
        name: String,
    },
    UnknownParam {
        name: String,
    },
    InvalidLabel {
        label: usize,
        classes: usize,
    },
    EmptyBatch,
    InvalidInitializer(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "Shape mismatch for {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::RankMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "Rank mismatch for {what}, got {got} dimensions and expected {expected}"
            ),
            MlErr::VariableAlreadyDefined { name } => write!(
                f,
                "Variable {name} already exists, did you mean to build with reuse enabled?"
            ),
            MlErr::VariableNotDefined { name } => write!(
                f,
                "Variable {name} does not exist, it must be defined before it can be reused"
            ),
            MlErr::UnknownParam { name } => {
                write!(f, "The parameter {name} does not belong to this store")
            }
            MlErr::InvalidLabel { label, classes } => write!(
                f,
                "Label {label} is out of range for a model with {classes} classes"
            ),
            MlErr::EmptyBatch => write!(f, "Tried to run a model over an empty batch"),
            MlErr::InvalidInitializer(detail) => write!(f, "Invalid initializer: {detail}"),
        }
    }
}

impl Error for MlErr {}

impl From<NormalError> for MlErr {
    fn from(value: NormalError) -> Self {
        Self::InvalidInitializer(value.to_string())
    }
}

impl From<UniformError> for MlErr {
    fn from(value: UniformError) -> Self {
        Self::InvalidInitializer(value.to_string())
    }
}

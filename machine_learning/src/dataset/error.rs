use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The error type of data sources.
#[derive(Debug)]
pub enum DataErr {
    UnevenSplit {
        batch_size: usize,
        num_splits: usize,
    },
    LengthMismatch {
        inputs: usize,
        labels: usize,
    },
    InvalidLabel {
        label: usize,
        classes: usize,
    },
    Parse {
        line: usize,
        detail: String,
    },
    Empty,
    Io(io::Error),
}

impl Display for DataErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataErr::UnevenSplit {
                batch_size,
                num_splits,
            } => write!(
                f,
                "A batch of {batch_size} examples can't be split evenly into {num_splits} splits"
            ),
            DataErr::LengthMismatch { inputs, labels } => write!(
                f,
                "The dataset has {inputs} inputs but {labels} labels"
            ),
            DataErr::InvalidLabel { label, classes } => write!(
                f,
                "Label {label} is out of range for a dataset with {classes} classes"
            ),
            DataErr::Parse { line, detail } => write!(f, "dataset line {line}: {detail}"),
            DataErr::Empty => write!(f, "The dataset is empty"),
            DataErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for DataErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DataErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

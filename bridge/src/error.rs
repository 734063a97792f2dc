use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type of the bridge.
pub type Result<T> = std::result::Result<T, BridgeErr>;

/// A structural mismatch between placeholders, feeds and values.
///
/// Any of these means the two sides of the bridge stopped agreeing on the slot layout, so
/// nothing built from them can be trusted.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeErr {
    /// A leaf of one kind was found where the pass-through table expects the other kind.
    LeafMismatch {
        slot: usize,
        expected: &'static str,
        found: &'static str,
    },
    DuplicateSlot {
        name: String,
    },
    MissingSlot {
        name: String,
    },
    ExtraSlots {
        names: Vec<String>,
    },
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// A bound structure doesn't have the layout its reader expects.
    UnexpectedLayout {
        detail: String,
    },
}

impl Display for BridgeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeErr::LeafMismatch {
                slot,
                expected,
                found,
            } => write!(f, "Slot {slot} should hold a {expected} but holds a {found}"),
            BridgeErr::DuplicateSlot { name } => {
                write!(f, "The slot {name} was fed more than once")
            }
            BridgeErr::MissingSlot { name } => write!(f, "The slot {name} was never fed"),
            BridgeErr::ExtraSlots { names } => {
                write!(f, "The feed has values for unknown slots: {names:?}")
            }
            BridgeErr::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "The slot {name} was fed a value of shape {got:?} but expects {expected:?}"
            ),
            BridgeErr::UnexpectedLayout { detail } => write!(f, "Unexpected layout: {detail}"),
        }
    }
}

impl Error for BridgeErr {}

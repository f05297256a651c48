//! Error taxonomy for the marshaling core
//!
//! Every fallible operation returns [`Result`]. [`Error::class`] sorts an
//! error into configuration, usage or native-side failures so callers can
//! decide whether to abort startup, abort the call path, or handle it.

use crate::variant::{Operator, VariantType};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration
    #[error("unknown engine type `{0}`")]
    UnknownType(String),

    #[error("unknown engine operator `{0}`")]
    UnknownOperator(String),

    #[error("invalid engine metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{name} is {found} bytes in the engine, binding expects {expected}")]
    LayoutMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    // Usage
    #[error("frame slot {index} out of range (capacity {capacity})")]
    SlotOutOfRange { index: usize, capacity: usize },

    #[error("{got} arguments exceed the frame capacity of {capacity}")]
    TooManyArgs { got: usize, capacity: usize },

    #[error("handle was already released")]
    Released,

    #[error("lifetime {0} has already ended")]
    LifetimeEnded(u64),

    #[error("handle belongs to a different API instance")]
    ForeignApi,

    #[error("iterator read before `next` positioned it")]
    IteratorNotPositioned,

    #[error("expected a {expected} variant, found {found}")]
    TypeMismatch {
        expected: VariantType,
        found: VariantType,
    },

    #[error("{kind} storage is {expected} words, got {got}")]
    StorageShape {
        kind: VariantType,
        expected: usize,
        got: usize,
    },

    // Native
    #[error("operator {op} is not defined for {left} and {right}")]
    InvalidOperation {
        op: Operator,
        left: VariantType,
        right: VariantType,
    },

    #[error("iterator was invalidated by the engine")]
    IteratorInvalidated,

    #[error("variant carries unknown discriminant {0}")]
    InvalidTag(u32),

    #[error("allocator returned {addr:#x}, not aligned to {align}")]
    Misaligned { addr: usize, align: usize },

    #[error("engine cannot construct a {0}")]
    ConstructionFailed(VariantType),

    #[error("allocation of {size} bytes failed")]
    OutOfMemory { size: usize },
}

/// Broad class of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Binding and engine disagree; startup must not proceed.
    Configuration,
    /// Programming error in the surrounding binding code.
    Usage,
    /// The engine could not complete the operation.
    Native,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownType(_)
            | Self::UnknownOperator(_)
            | Self::Metadata(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::LayoutMismatch { .. } => ErrorClass::Configuration,

            Self::SlotOutOfRange { .. }
            | Self::TooManyArgs { .. }
            | Self::Released
            | Self::LifetimeEnded(_)
            | Self::ForeignApi
            | Self::IteratorNotPositioned
            | Self::TypeMismatch { .. }
            | Self::StorageShape { .. } => ErrorClass::Usage,

            Self::InvalidOperation { .. }
            | Self::IteratorInvalidated
            | Self::InvalidTag(_)
            | Self::Misaligned { .. }
            | Self::ConstructionFailed(_)
            | Self::OutOfMemory { .. } => ErrorClass::Native,
        }
    }

    #[inline]
    pub fn is_usage(&self) -> bool {
        self.class() == ErrorClass::Usage
    }
}

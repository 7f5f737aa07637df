//! CommPatternError: unified error type for comm-pattern public APIs
//!
//! Every fallible operation in the crate (buffer unpacking, field access,
//! pattern mutation and resolution, synchronization) reports through this enum.
//! None of these are downgraded to warnings and none are retried.

use std::fmt::Debug;
use thiserror::Error;

use crate::data::field::DataType;

/// Unified error type for comm-pattern operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommPatternError {
    /// A field was accessed (or designated as the gid field) with the wrong scalar type.
    #[error("Type mismatch on field `{field}`: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        field: String,
        expected: DataType,
        found: DataType,
    },
    /// Field storage or row length is not compatible with the field stride.
    #[error("Stride mismatch on field `{field}`: expected {expected}, found {found}")]
    StrideMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
    /// Operation is not permitted in the current pattern state.
    #[error("Illegal operation `{op}`: {reason}")]
    IllegalOperation { op: &'static str, reason: String },
    /// A requested global id has no local index on this rank.
    #[error("Global id {gid} not found on rank {rank}")]
    NotFound { gid: u64, rank: usize },
    /// A rank was asked to serve an entity it holds but does not own.
    #[error("Global id {gid} requested from rank {rank}, which does not own it (owner {owner})")]
    NotOwner { gid: u64, rank: usize, owner: usize },
    /// The same global id would appear twice in one rank's local storage.
    #[error("Global id {0} is already present on this rank")]
    DuplicateGlobalId(u64),
    /// A field with this name is already registered.
    #[error("Field `{0}` is already registered")]
    DuplicateField(String),
    /// No field with this name is registered.
    #[error("Unknown field `{0}`")]
    UnknownField(String),
    /// Field row count diverges from the gid field.
    #[error("Field `{field}` has {found} rows, expected {expected}")]
    FieldSizeMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
    /// `remove` named a different owner than the one recorded locally.
    #[error("Global id {gid}: remove expected owner {expected}, recorded owner is {found}")]
    OwnerMismatch { gid: u64, expected: usize, found: usize },
    /// A rank index outside `0..size` was supplied.
    #[error("Rank {rank} out of range for communicator of size {size}")]
    InvalidRank { rank: usize, size: usize },
    /// Attempted to read past the packed content of a buffer.
    #[error("Buffer underrun: requested {requested} bytes, {remaining} remaining")]
    BufferUnderrun { requested: usize, remaining: usize },
    /// Packed content could not be decoded.
    #[error("Corrupt buffer: {0}")]
    CorruptBuffer(String),
    /// `seek_record` named an ordinal that was never created by `new_index`.
    #[error("Unknown buffer record {ordinal} (have {count})")]
    UnknownRecord { ordinal: usize, count: usize },
    /// Local index out of range for a field or pattern.
    #[error("Local index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    /// Transport failure while talking to `neighbor`.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: CommFailure,
    },
    /// A structural invariant does not hold.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Boxed-free transport failure description so the error stays `Clone + Eq`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommFailure(pub String);

impl From<String> for CommFailure {
    fn from(s: String) -> Self {
        CommFailure(s)
    }
}

impl From<&str> for CommFailure {
    fn from(s: &str) -> Self {
        CommFailure(s.to_owned())
    }
}

impl CommPatternError {
    /// Shorthand used by the pattern's mutation guards.
    pub(crate) fn illegal(op: &'static str, reason: impl Into<String>) -> Self {
        CommPatternError::IllegalOperation {
            op,
            reason: reason.into(),
        }
    }

    /// True for failures that indicate the caller's entity bookkeeping diverged
    /// from its local storage.
    pub fn is_bookkeeping_error(&self) -> bool {
        matches!(
            self,
            CommPatternError::NotFound { .. }
                | CommPatternError::NotOwner { .. }
                | CommPatternError::DuplicateGlobalId(_)
                | CommPatternError::OwnerMismatch { .. }
        )
    }
}

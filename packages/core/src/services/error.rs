//! Service Layer Error Types
//!
//! This module defines the error type shared by the tree index engine, the
//! query layer and the related-count aggregator.

use crate::db::StaleRow;
use crate::models::ValidationError;
use thiserror::Error;

/// Tree operation errors
///
/// Validation failures (`InvalidMove`, `InvalidArgument`) are raised before
/// any write is issued. Storage failures are propagated unchanged; the store
/// guarantees that a failed batch left no partial write behind.
#[derive(Error, Debug)]
pub enum TreeError {
    /// Relocation is structurally impossible (self or descendant target)
    #[error("Invalid move of node '{node_id}': {reason}")]
    InvalidMove { node_id: String, reason: String },

    /// Unrecognized position token or otherwise malformed request
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Node or target id does not resolve to a stored row
    #[error("Node not found: {id}")]
    NotFound { id: String },

    /// Read or write failure surfaced by the node store
    #[error("Storage failure: {0:#}")]
    StorageFailure(#[from] anyhow::Error),

    /// The involved rows kept changing under concurrent writers while locks
    /// were taken or batches applied
    #[error("Gave up locking trees for node '{node_id}' after {attempts} attempts")]
    LockContention { node_id: String, attempts: usize },

    /// Stored boundaries violate the nested-set invariants
    #[error("Tree integrity violated: {}", .0.join("; "))]
    IntegrityViolation(Vec<String>),
}

impl TreeError {
    /// Create an invalid move error
    pub fn invalid_move(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMove {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a node not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn is_invalid_move(&self) -> bool {
        matches!(self, Self::InvalidMove { .. })
    }

    /// True when a batch was refused because another writer changed one of
    /// its rows first; replanning from fresh rows may succeed
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StorageFailure(err) if err.downcast_ref::<StaleRow>().is_some())
    }
}

impl From<ValidationError> for TreeError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

pub type TreeResult<T> = Result<T, TreeError>;

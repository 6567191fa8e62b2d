//! Database Error Types
//!
//! Failures of opening and preparing the libsql database. Statement failures
//! inside `TursoStore` are reported through `anyhow` with context instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening a database file and preparing its schema
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The parent directory of the database file could not be created
    #[error("Failed to create directory for database {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The database file could not be opened, or a connection to it failed
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// A connection pragma was rejected
    #[error("Failed to execute '{pragma}': {source}")]
    PragmaFailed {
        pragma: String,
        source: libsql::Error,
    },

    /// A table or index of the node schema could not be created
    #[error("Failed to create schema object '{object}': {source}")]
    SchemaFailed {
        object: &'static str,
        source: libsql::Error,
    },
}

impl DatabaseError {
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    pub fn pragma_failed(pragma: impl Into<String>, source: libsql::Error) -> Self {
        Self::PragmaFailed {
            pragma: pragma.into(),
            source,
        }
    }

    pub fn schema_failed(object: &'static str, source: libsql::Error) -> Self {
        Self::SchemaFailed { object, source }
    }

    /// True when the directory could not be created for lack of permission
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::DirectoryCreationFailed { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied
        )
    }
}

//! Database Connection Management
//!
//! This module provides the connection and schema setup for the libsql
//! backend of the nested-set table.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any writable file path
//! - **Fixed schema**: `tree_nodes` rows plus a `tree_counters` table for
//!   monotonic tree id allocation
//! - **WAL mode**: Readers are not blocked by an open write transaction and
//!   never observe its partial state
//! - **Busy timeout**: Competing writers wait instead of failing with
//!   `SQLITE_BUSY`
//!
//! # Database Connection Patterns
//!
//! Use `connect_with_timeout()` in async code so every connection carries the
//! configured busy timeout. Each store call opens its own connection.
//!
//! ```no_run
//! # use mptt_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/tree.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::DatabaseError;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Default SQLite busy timeout in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Database service for managing the libsql connection and schema
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,
}

impl DatabaseService {
    /// Open (or create) the database at `db_path` with the default busy timeout
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    /// 4. Enable WAL mode and foreign keys
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Open the database with an explicit busy timeout
    pub async fn with_busy_timeout(
        db_path: PathBuf,
        busy_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    DatabaseError::DirectoryCreationFailed {
                        path: db_path.clone(),
                        source,
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
        };

        service.initialize_schema().await?;
        tracing::debug!("Opened tree database at {:?}", service.db_path);

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so they go through query() instead of
    /// execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn
            .prepare(pragma)
            .await
            .map_err(|e| DatabaseError::pragma_failed(pragma, e))?;
        let _ = stmt
            .query(())
            .await
            .map_err(|e| DatabaseError::pragma_failed(pragma, e))?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Idempotent: safe to call on an existing database.
    ///
    /// # Schema
    ///
    /// - `tree_nodes`: one row per node; `lft`/`rgt` hold the left/right
    ///   boundaries (both names are SQL keywords)
    /// - `tree_counters`: named monotonic counters
    ///
    /// Boundary columns carry plain indexes, not UNIQUE ones: range shifts
    /// pass through transient duplicates inside a transaction.
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tree_nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                lft INTEGER NOT NULL,
                rgt INTEGER NOT NULL,
                tree_id INTEGER NOT NULL,
                level INTEGER NOT NULL,
                properties JSON NOT NULL DEFAULT '{}',
                FOREIGN KEY (parent_id) REFERENCES tree_nodes(id)
            )",
            (),
        )
        .await
        .map_err(|e| DatabaseError::schema_failed("tree_nodes", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tree_counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| DatabaseError::schema_failed("tree_counters", e))?;

        self.create_core_indexes(&conn).await?;

        Ok(())
    }

    /// Create the indexes backing range predicates
    async fn create_core_indexes(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        let indexes = [
            (
                "idx_tree_nodes_tree_lft",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_tree_lft ON tree_nodes(tree_id, lft)",
            ),
            (
                "idx_tree_nodes_tree_rgt",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_tree_rgt ON tree_nodes(tree_id, rgt)",
            ),
            (
                "idx_tree_nodes_level",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_level ON tree_nodes(level)",
            ),
            (
                "idx_tree_nodes_parent",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_parent ON tree_nodes(parent_id)",
            ),
        ];

        for (name, sql) in indexes {
            conn.execute(sql, ())
                .await
                .map_err(|e| DatabaseError::schema_failed(name, e))?;
        }

        Ok(())
    }

    /// Get a raw connection without the busy timeout applied
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db
            .connect()
            .map_err(|e| DatabaseError::connection_failed(self.db_path.clone(), e))
    }

    /// Get a connection with the configured busy timeout
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms))
            .await?;

        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_schema_initialization_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("tree.db");

        let first = DatabaseService::new(db_path.clone()).await.unwrap();
        drop(first);
        let second = DatabaseService::new(db_path).await.unwrap();

        let conn = second.connect_with_timeout().await.unwrap();
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'tree_nodes'",
                (),
            )
            .await
            .unwrap();
        assert!(rows.next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unwritable_parent_reports_directory_failure() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = DatabaseService::new(blocker.join("sub").join("tree.db"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::DirectoryCreationFailed { .. }));
        assert!(!err.is_permission_denied());
    }
}

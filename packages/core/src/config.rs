//! Runtime configuration
//!
//! `TreeConfig` selects the storage backend and tunes the engine. It can be
//! built in code, deserialized, or read from the environment:
//!
//! - `MPTT_DATABASE_PATH` - libsql database file (unset: in-memory store)
//! - `MPTT_BUSY_TIMEOUT_MS` - SQLite busy timeout
//! - `MPTT_MAX_LOCK_RETRIES` - re-lock attempts when tree ids move under a caller
//! - `MPTT_VERIFY_AFTER_MUTATION` - check every batch on a scratch copy before writing it

use crate::db::{MemoryStore, NodeStore};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// libsql database file; `None` keeps the forest in memory
    pub database_path: Option<PathBuf>,

    /// How long a writer waits on a locked SQLite database
    pub busy_timeout_ms: u64,

    /// How many times a mutation re-locks or replans a stale batch before
    /// giving up
    pub max_lock_retries: usize,

    /// Check the nested-set invariants of affected trees against a scratch
    /// copy before each mutation is written
    pub verify_after_mutation: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: 5000,
            max_lock_retries: 8,
            verify_after_mutation: false,
        }
    }
}

impl TreeConfig {
    /// Defaults overridden by `MPTT_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var("MPTT_DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }
        if let Some(value) = parse_env("MPTT_BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms = value;
        }
        if let Some(value) = parse_env("MPTT_MAX_LOCK_RETRIES") {
            config.max_lock_retries = value;
        }
        if let Some(value) = parse_env("MPTT_VERIFY_AFTER_MUTATION") {
            config.verify_after_mutation = value;
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

/// Build the store selected by `config`
pub async fn open_store(config: &TreeConfig) -> anyhow::Result<Arc<dyn NodeStore>> {
    match &config.database_path {
        None => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "turso")]
        Some(path) => {
            let db = crate::db::DatabaseService::with_busy_timeout(
                path.clone(),
                config.busy_timeout_ms,
            )
            .await?;
            Ok(Arc::new(crate::db::TursoStore::new(Arc::new(db))))
        }
        #[cfg(not(feature = "turso"))]
        Some(path) => anyhow::bail!(
            "Database path {:?} configured but the `turso` feature is disabled",
            path
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TreeConfig::default();
        assert_eq!(config.database_path, None);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.max_lock_retries, 8);
        assert!(!config.verify_after_mutation);
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let config: TreeConfig =
            serde_json::from_str(r#"{ "verify_after_mutation": true }"#).unwrap();
        assert!(config.verify_after_mutation);
        assert_eq!(config.max_lock_retries, 8);
    }

    #[tokio::test]
    async fn test_open_store_defaults_to_memory() {
        let store = open_store(&TreeConfig::default()).await.unwrap();
        assert!(store.get_node("missing").await.unwrap().is_none());
    }
}

//! Per-tree write serialization
//!
//! Every structural mutation of an engine holds the mutex of each `tree_id`
//! it touches for the duration of its read-plan-write cycle, so two shift
//! passes on one tree never interleave. Mutations on disjoint trees proceed
//! in parallel. The registry lives in one engine; writers elsewhere are
//! detected by the `Expect` preconditions of each batch.
//!
//! Tree mutexes are always acquired in ascending `tree_id` order, and the
//! tree id allocation mutex after all tree mutexes, which rules out lock
//! cycles between concurrent callers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry entries are pruned once the registry grows past this size
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of per-tree mutexes plus the tree id allocation mutex
#[derive(Debug, Default)]
pub struct TreeLockManager {
    trees: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    allocation: Arc<Mutex<()>>,
}

/// Held locks; released on drop
#[derive(Debug)]
pub struct TreeGuard {
    tree_ids: Vec<i64>,
    _trees: Vec<OwnedMutexGuard<()>>,
    allocation: Option<OwnedMutexGuard<()>>,
}

impl TreeGuard {
    /// Tree ids covered by this guard, ascending
    pub fn tree_ids(&self) -> &[i64] {
        &self.tree_ids
    }

    pub fn holds_allocation(&self) -> bool {
        self.allocation.is_some()
    }
}

impl TreeLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every tree in `tree_ids`, and the allocation mutex when
    /// `allocate` is set
    pub async fn lock(&self, tree_ids: &[i64], allocate: bool) -> TreeGuard {
        let mut ids = tree_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mutexes = {
            let mut trees = self.trees.lock().await;
            if trees.len() > PRUNE_THRESHOLD {
                trees.retain(|_, m| Arc::strong_count(m) > 1);
            }
            ids.iter()
                .map(|id| trees.entry(*id).or_default().clone())
                .collect::<Vec<_>>()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        let allocation = if allocate {
            Some(self.allocation.clone().lock_owned().await)
        } else {
            None
        };

        TreeGuard {
            tree_ids: ids,
            _trees: guards,
            allocation,
        }
    }
}

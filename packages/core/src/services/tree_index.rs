//! Tree Index Engine
//!
//! Allocates, shifts and reassigns `left`/`right`/`level`/`tree_id` values so
//! the nested-set invariants hold after every insertion and move.
//!
//! # Mutation Protocol
//!
//! Every mutation runs the same cycle:
//!
//! 1. **Validate** arguments that need no state (position tokens, self moves)
//! 2. **Lock** the trees of every row involved (and the tree id allocator when
//!    a new tree is created), then **re-read** those rows from the store;
//!    caller-supplied boundaries are never trusted
//! 3. **Plan** a `WriteBatch` of ranged boundary operations, opened by
//!    `Expect` preconditions on the rows it was planned from
//! 4. **Apply** the batch atomically through `NodeStore::apply_batch`
//!
//! The tree locks only serialize callers of one engine. Writers outside them
//! (a second engine on the same store, another process on the same database)
//! are caught by the preconditions: the store refuses the batch with
//! `StaleRow` and the mutation is planned again from fresh rows, up to
//! `max_lock_retries` times.
//!
//! With `verify_after_mutation`, the batch is first applied to a scratch copy
//! of the affected trees and checked there; a batch that would break an
//! invariant fails with `IntegrityViolation` before anything is written.
//!
//! # Move Algorithm
//!
//! A move is a single batch: capture the subtree, close the gap it leaves in
//! the source tree, open a gap of the same width at the destination (computed
//! from the target's post-close boundaries), then relocate the captured rows
//! with one `(delta_pos, delta_level, new_tree_id)` tuple. Sibling reordering
//! inside one parent needs no separate code path.
//!
//! # Examples
//!
//! ```rust
//! use mptt_core::db::MemoryStore;
//! use mptt_core::models::{Position, TreeNode};
//! use mptt_core::services::TreeIndexEngine;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TreeIndexEngine::new(Arc::new(MemoryStore::new()));
//! let root = engine.insert_root(TreeNode::new(json!({}))).await?;
//! let a = engine
//!     .insert_child(TreeNode::new(json!({})), &root.id, Position::LastChild)
//!     .await?;
//! let b = engine
//!     .insert_child(TreeNode::new(json!({})), &root.id, Position::LastChild)
//!     .await?;
//!
//! let moved = engine.move_node(&a.id, Some(b.id.as_str()), "right").await?;
//! assert_eq!((moved.left, moved.right), (4, 5));
//! # Ok(())
//! # }
//! ```

use crate::config::TreeConfig;
use crate::db::{BoundaryOp, MemoryStore, NodeOrder, NodeQuery, NodeStore, Predicate, WriteBatch};
use crate::models::{MoveTarget, Position, TreeBounds, TreeNode, TreeRecord, ValidationError};
use crate::services::error::{TreeError, TreeResult};
use crate::services::integrity::check_integrity;
use crate::services::query_service::QueryService;
use crate::services::tree_locks::{TreeGuard, TreeLockManager};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

/// Where a subtree ends up
#[derive(Debug, Clone)]
enum Destination<'a> {
    /// Standalone tree with a freshly allocated id
    NewRoot { tree_id: i64 },
    /// Relative to an existing node
    Within {
        target: &'a TreeNode,
        position: Position,
    },
}

/// Insertion boundary, resulting level/tree and parent reference for a
/// placement relative to a target whose current bounds are `target`
fn anchor(
    target: TreeBounds,
    target_node: &TreeNode,
    position: Position,
) -> (i64, i64, Option<String>) {
    match position {
        Position::FirstChild => (target.left + 1, target.level + 1, Some(target_node.id.clone())),
        Position::LastChild => (target.right, target.level + 1, Some(target_node.id.clone())),
        Position::Left => (target.left, target.level, target_node.parent_id.clone()),
        Position::Right => (target.right + 1, target.level, target_node.parent_id.clone()),
    }
}

/// Open a gap of `width` at boundary `q` of `tree_id`
fn open_gap(batch: &mut WriteBatch, tree_id: i64, q: i64, width: i64) {
    batch.push(BoundaryOp::ShiftLeft {
        tree_id,
        from: q,
        delta: width,
    });
    batch.push(BoundaryOp::ShiftRight {
        tree_id,
        from: q,
        delta: width,
    });
}

/// Plan the insertion of a leaf relative to `target`.
///
/// Returns the batch and the node as it will be stored.
fn plan_insert(node: TreeNode, target: &TreeNode, position: Position) -> (WriteBatch, TreeNode) {
    let (q, level, parent_id) = anchor(target.bounds(), target, position);
    let placed = node.placed(
        parent_id,
        TreeBounds {
            left: q,
            right: q + 1,
            tree_id: target.tree_id,
            level,
        },
    );

    let mut batch = WriteBatch::new();
    batch.push(BoundaryOp::expect(target));
    open_gap(&mut batch, target.tree_id, q, 2);
    batch.push(BoundaryOp::Insert(placed.clone()));
    (batch, placed)
}

/// Plan the relocation of `node` and its subtree.
///
/// `node` and the target must be the freshly read rows, and the target must
/// not lie inside `node`'s subtree.
fn plan_move(node: &TreeNode, destination: &Destination<'_>) -> WriteBatch {
    let width = node.bounds().width();
    let source = node.tree_id;
    let mut batch = WriteBatch::new();
    batch.push(BoundaryOp::expect(node));
    if let Destination::Within { target, .. } = destination {
        batch.push(BoundaryOp::expect(target));
    }

    // The captured set is fixed here, before any shift runs
    batch.push(BoundaryOp::Capture {
        tree_id: source,
        left: node.left,
        right: node.right,
    });

    // Close the gap left behind in the source tree
    batch.push(BoundaryOp::ShiftLeft {
        tree_id: source,
        from: node.right + 1,
        delta: -width,
    });
    batch.push(BoundaryOp::ShiftRight {
        tree_id: source,
        from: node.right + 1,
        delta: -width,
    });

    let (new_tree_id, q, new_level, parent_id) = match destination {
        Destination::NewRoot { tree_id } => (*tree_id, 1, 0, None),
        Destination::Within { target, position } => {
            let mut bounds = target.bounds();
            if bounds.tree_id == source {
                if bounds.left > node.right {
                    bounds.left -= width;
                }
                if bounds.right > node.right {
                    bounds.right -= width;
                }
            }
            let (q, level, parent_id) = anchor(bounds, target, *position);
            open_gap(&mut batch, bounds.tree_id, q, width);
            (bounds.tree_id, q, level, parent_id)
        }
    };

    batch.push(BoundaryOp::Relocate {
        tree_id: source,
        delta_pos: q - node.left,
        delta_level: new_level - node.level,
        new_tree_id,
    });
    batch.push(BoundaryOp::SetParent {
        id: node.id.clone(),
        parent_id,
    });
    batch
}

/// Structural mutations of the nested-set table
pub struct TreeIndexEngine {
    store: Arc<dyn NodeStore>,
    locks: Arc<TreeLockManager>,
    config: TreeConfig,
}

impl TreeIndexEngine {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self::with_config(store, TreeConfig::default())
    }

    pub fn with_config(store: Arc<dyn NodeStore>, config: TreeConfig) -> Self {
        Self {
            store,
            locks: Arc::new(TreeLockManager::new()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Query layer over the same store
    pub fn queries(&self) -> QueryService {
        QueryService::new(self.store.clone())
    }

    async fn fetch(&self, id: &str) -> TreeResult<TreeNode> {
        self.store
            .get_node(id)
            .await?
            .ok_or_else(|| TreeError::not_found(id))
    }

    /// Read `ids`, lock their trees, and re-read them under the lock.
    ///
    /// Retries when a concurrent mutation moved one of the rows to another
    /// tree between the two reads. `needs_allocation` decides from the fresh
    /// rows whether the tree id allocator must be held as well.
    async fn lock_rows(
        &self,
        ids: &[&str],
        needs_allocation: impl Fn(&[TreeNode]) -> bool,
    ) -> TreeResult<(TreeGuard, Vec<TreeNode>)> {
        let mut attempts = 0;
        loop {
            attempts += 1;

            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                rows.push(self.fetch(id).await?);
            }
            let tree_ids: Vec<i64> = rows.iter().map(|n| n.tree_id).collect();
            let allocate = needs_allocation(&rows);
            let guard = self.locks.lock(&tree_ids, allocate).await;

            let mut fresh = Vec::with_capacity(ids.len());
            for id in ids {
                fresh.push(self.fetch(id).await?);
            }
            let stable = fresh
                .iter()
                .all(|n| guard.tree_ids().binary_search(&n.tree_id).is_ok())
                && (guard.holds_allocation() || !needs_allocation(&fresh));
            if stable {
                return Ok((guard, fresh));
            }

            drop(guard);
            if attempts > self.config.max_lock_retries {
                tracing::warn!(
                    "Giving up locking trees for '{}' after {} attempts",
                    ids[0],
                    attempts
                );
                return Err(TreeError::LockContention {
                    node_id: ids[0].to_string(),
                    attempts,
                });
            }
            tracing::debug!("Tree ids changed while locking '{}', retrying", ids[0]);
        }
    }

    /// Run `attempt` again while its batch is refused as stale
    async fn retry_stale<T, F, Fut>(&self, node_id: &str, mut attempt: F) -> TreeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TreeResult<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Err(err) if err.is_stale() => {
                    if attempts > self.config.max_lock_retries {
                        tracing::warn!(
                            "Giving up on '{}' after {} stale batches",
                            node_id,
                            attempts
                        );
                        return Err(TreeError::LockContention {
                            node_id: node_id.to_string(),
                            attempts,
                        });
                    }
                    tracing::debug!("{}; replanning '{}'", err, node_id);
                }
                result => return result,
            }
        }
    }

    async fn commit(&self, batch: WriteBatch, tree_ids: &[i64]) -> TreeResult<()> {
        if self.config.verify_after_mutation {
            self.verify_batch(&batch, tree_ids).await?;
        }

        tracing::debug!("Applying {} boundary operations", batch.len());
        self.store.apply_batch(batch).await?;
        Ok(())
    }

    /// Apply `batch` to a scratch copy of every tree it touches and check
    /// the invariants of the result
    async fn verify_batch(&self, batch: &WriteBatch, tree_ids: &[i64]) -> TreeResult<()> {
        let mut ids = tree_ids.to_vec();
        ids.extend(batch.ops.iter().filter_map(|op| match op {
            BoundaryOp::Expect { bounds, .. } => Some(bounds.tree_id),
            _ => None,
        }));
        ids.sort_unstable();
        ids.dedup();

        let mut rows = Vec::new();
        for tree_id in &ids {
            let query = NodeQuery::new(NodeOrder::Preorder).with(Predicate::TreeId(*tree_id));
            rows.extend(self.store.query_nodes(&query).await?);
        }

        let scratch = MemoryStore::with_nodes(rows);
        scratch.apply_batch(batch.clone()).await?;
        let report = check_integrity(&scratch, Some(ids.as_slice())).await?;
        if !report.is_valid() {
            tracing::warn!(
                "Refusing batch that would break {} invariant(s)",
                report.violations.len()
            );
        }
        report.into_result()?;
        Ok(())
    }

    /// Insert `node` as the root of a new tree.
    ///
    /// The new tree id is `1 +` the largest id ever allocated (1 for an empty
    /// forest). No other row is touched.
    pub async fn insert_root(&self, node: TreeNode) -> TreeResult<TreeNode> {
        if node.parent_id.is_some() {
            return Err(ValidationError::RootHasParent(node.id).into());
        }

        let _guard = self.locks.lock(&[], true).await;
        let tree_id = self.store.allocate_tree_id().await?;
        let placed = node.placed(None, TreeBounds::root(tree_id));

        let mut batch = WriteBatch::new();
        batch.push(BoundaryOp::Insert(placed.clone()));
        self.commit(batch, &[tree_id]).await?;

        tracing::info!("Inserted root '{}' as tree {}", placed.id, tree_id);
        Ok(placed)
    }

    /// Insert `node` as the first or last child of `parent_id`
    pub async fn insert_child(
        &self,
        node: TreeNode,
        parent_id: &str,
        position: Position,
    ) -> TreeResult<TreeNode> {
        if !position.is_child() {
            return Err(ValidationError::NotAChildPosition(position.to_string()).into());
        }
        self.insert_node(node, parent_id, position).await
    }

    /// Insert `node` relative to `target_id` at any position.
    ///
    /// A `left`/`right` insertion next to a root creates a new tree, since a
    /// tree has exactly one root.
    pub async fn insert_node(
        &self,
        node: TreeNode,
        target_id: &str,
        position: Position,
    ) -> TreeResult<TreeNode> {
        self.retry_stale(target_id, move || {
            self.try_insert_node(node.clone(), target_id, position)
        })
        .await
    }

    async fn try_insert_node(
        &self,
        node: TreeNode,
        target_id: &str,
        position: Position,
    ) -> TreeResult<TreeNode> {
        let beside_root = |rows: &[TreeNode]| rows[0].is_root() && !position.is_child();
        let (_guard, rows) = self.lock_rows(&[target_id], beside_root).await?;
        let target = &rows[0];

        if beside_root(&rows) {
            let mut node = node;
            node.parent_id = None;
            let tree_id = self.store.allocate_tree_id().await?;
            let placed = node.placed(None, TreeBounds::root(tree_id));
            let mut batch = WriteBatch::new();
            batch.push(BoundaryOp::expect(target));
            batch.push(BoundaryOp::Insert(placed.clone()));
            self.commit(batch, &[tree_id]).await?;
            tracing::info!(
                "Inserted '{}' {} of root '{}' as tree {}",
                placed.id,
                position,
                target.id,
                tree_id
            );
            return Ok(placed);
        }

        let (batch, placed) = plan_insert(node, target, position);
        self.commit(batch, &[target.tree_id]).await?;

        tracing::info!(
            "Inserted '{}' as {} of '{}' at [{}, {}]",
            placed.id,
            position,
            target.id,
            placed.left,
            placed.right
        );
        Ok(placed)
    }

    /// Move a node (with its subtree) using the string position surface.
    ///
    /// `target_id = None` detaches the node into a new tree; the position
    /// token is still validated. Tokens: `first-child`, `last-child`, `left`,
    /// `right`.
    pub async fn move_node(
        &self,
        node_id: &str,
        target_id: Option<&str>,
        position: &str,
    ) -> TreeResult<TreeNode> {
        let position: Position = position.parse()?;
        let target = match target_id {
            Some(id) => MoveTarget::node(id, position),
            None => MoveTarget::Root,
        };
        self.move_to(node_id, target).await
    }

    /// Move a node (with its subtree) to `target`
    pub async fn move_to(&self, node_id: &str, target: MoveTarget) -> TreeResult<TreeNode> {
        match target {
            MoveTarget::Root => {
                self.retry_stale(node_id, move || self.move_to_root(node_id))
                    .await
            }
            MoveTarget::Node { id, position } => {
                if id == node_id {
                    tracing::warn!("Rejected move of '{}' onto itself", node_id);
                    return Err(TreeError::invalid_move(
                        node_id,
                        "a node cannot be moved onto itself",
                    ));
                }
                let target_id = id.as_str();
                self.retry_stale(node_id, move || {
                    self.move_relative(node_id, target_id, position)
                })
                .await
            }
        }
    }

    async fn move_to_root(&self, node_id: &str) -> TreeResult<TreeNode> {
        let (_guard, rows) = self
            .lock_rows(&[node_id], |rows| !rows[0].is_root())
            .await?;
        let node = &rows[0];

        if node.is_root() {
            tracing::debug!("'{}' is already a root, nothing to move", node_id);
            return Ok(node.clone());
        }

        self.detach_to_new_tree(node).await
    }

    async fn detach_to_new_tree(&self, node: &TreeNode) -> TreeResult<TreeNode> {
        let tree_id = self.store.allocate_tree_id().await?;
        let batch = plan_move(node, &Destination::NewRoot { tree_id });
        self.commit(batch, &[node.tree_id, tree_id]).await?;

        tracing::info!(
            "Moved '{}' out of tree {} into new tree {}",
            node.id,
            node.tree_id,
            tree_id
        );
        self.fetch(&node.id).await
    }

    async fn move_relative(
        &self,
        node_id: &str,
        target_id: &str,
        position: Position,
    ) -> TreeResult<TreeNode> {
        let beside_root =
            |rows: &[TreeNode]| rows[1].is_root() && !position.is_child() && !rows[0].is_root();
        let (_guard, rows) = self.lock_rows(&[node_id, target_id], beside_root).await?;
        let (node, target) = (&rows[0], &rows[1]);

        if node.bounds().contains(&target.bounds()) {
            tracing::warn!(
                "Rejected move of '{}' into its own descendant '{}'",
                node_id,
                target_id
            );
            return Err(TreeError::invalid_move(
                node_id,
                format!("target '{}' is a descendant of the node", target_id),
            ));
        }

        if target.is_root() && !position.is_child() {
            if node.is_root() {
                tracing::debug!("'{}' is already a root, nothing to move", node_id);
                return Ok(node.clone());
            }
            return self.detach_to_new_tree(node).await;
        }

        let batch = plan_move(node, &Destination::Within { target, position });
        self.commit(batch, &[node.tree_id, target.tree_id]).await?;

        tracing::info!(
            "Moved '{}' to {} of '{}' (tree {} -> {})",
            node_id,
            position,
            target_id,
            node.tree_id,
            target.tree_id
        );
        self.fetch(node_id).await
    }

    /// Recompute every boundary from parent references.
    ///
    /// Roots keep their current tree id (fresh ids are allocated for roots
    /// without one, or sharing one); children are numbered in their current
    /// `left` order, ties broken by id. Returns how many rows changed.
    ///
    /// Every row is pinned with an `Expect`, so a rebuild racing a writer
    /// outside this engine fails with a stale `StorageFailure` instead of
    /// overwriting that writer's rows.
    pub async fn rebuild(&self) -> TreeResult<usize> {
        let snapshot = self
            .store
            .query_nodes(&NodeQuery::new(NodeOrder::Preorder))
            .await?;
        let tree_ids: Vec<i64> = snapshot.iter().map(|n| n.tree_id).collect();
        let _guard = self.locks.lock(&tree_ids, true).await;

        let mut nodes = self
            .store
            .query_nodes(&NodeQuery::new(NodeOrder::Preorder))
            .await?;
        nodes.sort_by(|a, b| (a.tree_id, a.left, &a.id).cmp(&(b.tree_id, b.left, &b.id)));

        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut children: HashMap<&str, Vec<&TreeNode>> = HashMap::new();
        let mut roots = Vec::new();
        for node in &nodes {
            match node.parent_id.as_deref() {
                Some(parent) if ids.contains(parent) => {
                    children.entry(parent).or_default().push(node)
                }
                _ => roots.push(node),
            }
        }

        let mut assigned: HashMap<&str, TreeBounds> = HashMap::with_capacity(nodes.len());
        let mut used_tree_ids = HashSet::new();
        let mut batch = WriteBatch::new();

        for root in roots {
            let tree_id = if root.tree_id > 0 && used_tree_ids.insert(root.tree_id) {
                root.tree_id
            } else {
                let fresh = self.store.allocate_tree_id().await?;
                used_tree_ids.insert(fresh);
                fresh
            };
            if root.parent_id.is_some() {
                batch.push(BoundaryOp::SetParent {
                    id: root.id.clone(),
                    parent_id: None,
                });
            }

            // Iterative preorder walk; `right` is filled in on exit
            let mut counter = 1;
            let mut stack: Vec<(&TreeNode, i64, bool)> = vec![(root, 0, false)];
            while let Some((node, level, visited)) = stack.pop() {
                if visited {
                    if let Some(bounds) = assigned.get_mut(node.id.as_str()) {
                        bounds.right = counter;
                    }
                    counter += 1;
                    continue;
                }
                assigned.insert(
                    node.id.as_str(),
                    TreeBounds {
                        left: counter,
                        right: 0,
                        tree_id,
                        level,
                    },
                );
                counter += 1;
                stack.push((node, level, true));
                if let Some(kids) = children.get(node.id.as_str()) {
                    for child in kids.iter().rev() {
                        if !assigned.contains_key(child.id.as_str()) {
                            stack.push((child, level + 1, false));
                        }
                    }
                }
            }
        }

        let unreachable: Vec<String> = nodes
            .iter()
            .filter(|n| !assigned.contains_key(n.id.as_str()))
            .map(|n| format!("Node '{}' is not reachable from any root", n.id))
            .collect();
        if !unreachable.is_empty() {
            return Err(TreeError::IntegrityViolation(unreachable));
        }

        let mut changed = 0;
        for node in &nodes {
            let Some(bounds) = assigned.get(node.id.as_str()).copied() else {
                continue;
            };
            if bounds != node.bounds() {
                changed += 1;
                batch.push(BoundaryOp::Assign {
                    id: node.id.clone(),
                    bounds,
                });
            }
        }

        if !batch.is_empty() {
            let mut pinned = WriteBatch::new();
            for node in &nodes {
                pinned.push(BoundaryOp::expect(node));
            }
            pinned.ops.append(&mut batch.ops);
            let touched: Vec<i64> = used_tree_ids.into_iter().collect();
            self.commit(pinned, &touched).await?;
        }
        tracing::info!("Rebuilt {} nodes, {} rows renumbered", nodes.len(), changed);
        Ok(changed)
    }
}

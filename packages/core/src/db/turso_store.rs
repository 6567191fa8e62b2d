//! TursoStore - NodeStore Implementation for Turso/libsql Backend
//!
//! This module implements the `NodeStore` trait on top of `DatabaseService`,
//! translating `NodeQuery` predicates into `WHERE` clauses and each
//! `BoundaryOp` of a `WriteBatch` into one ranged `UPDATE`/`INSERT`.
//!
//! # Design Principles
//!
//! 1. **One transaction per batch**: `BEGIN IMMEDIATE` takes the write lock up
//!    front; any failing statement rolls the whole batch back
//! 2. **Sign-marked capture**: a captured subtree is stored with negated
//!    boundaries until `Relocate` restores it, so ranged shifts (which only
//!    touch positive boundaries) never double-shift it
//! 3. **Checked preconditions**: `Expect` rows are compared inside the same
//!    transaction, so a batch planned from rows another process has since
//!    changed is rolled back with `StaleRow`
//! 4. **Row Conversion**: `row_to_node` is the single conversion point
//!
//! # Examples
//!
//! ```rust,no_run
//! use mptt_core::db::{DatabaseService, NodeStore, TursoStore};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Arc::new(DatabaseService::new(PathBuf::from("./data/tree.db")).await?);
//!     let store: Arc<dyn NodeStore> = Arc::new(TursoStore::new(db));
//!     let node = store.get_node("node-123").await?;
//!     Ok(())
//! }
//! ```

use crate::db::node_store::{
    BoundaryOp, NodeOrder, NodeQuery, NodeStore, Predicate, RelationDescriptor, StaleRow,
    WriteBatch,
};
use crate::db::DatabaseService;
use crate::models::TreeNode;
use anyhow::{Context, Result};
use async_trait::async_trait;
use libsql::{Connection, Row, Value};
use std::sync::Arc;

const NODE_COLUMNS: &str = "id, parent_id, lft, rgt, tree_id, level, properties";

/// TursoStore implements NodeStore for the libsql backend
pub struct TursoStore {
    db: Arc<DatabaseService>,
}

impl TursoStore {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    /// Underlying database service, for hosts that keep related tables in the
    /// same database file
    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    /// Convert libsql::Row to TreeNode
    ///
    /// Expected columns (in order): id, parent_id, lft, rgt, tree_id, level,
    /// properties (TEXT, JSON)
    fn row_to_node(row: &Row) -> Result<TreeNode> {
        let id: String = row.get(0).context("Failed to get id")?;
        let parent_id: Option<String> = row.get(1).context("Failed to get parent_id")?;
        let left: i64 = row.get(2).context("Failed to get lft")?;
        let right: i64 = row.get(3).context("Failed to get rgt")?;
        let tree_id: i64 = row.get(4).context("Failed to get tree_id")?;
        let level: i64 = row.get(5).context("Failed to get level")?;
        let properties_json: String = row.get(6).context("Failed to get properties")?;
        let properties = serde_json::from_str(&properties_json)
            .with_context(|| format!("Invalid properties JSON for node '{}'", id))?;

        Ok(TreeNode {
            id,
            parent_id,
            left,
            right,
            tree_id,
            level,
            properties,
        })
    }

    /// Render a `NodeQuery` as SQL plus positional parameters
    fn build_select(query: &NodeQuery) -> (String, Vec<Value>) {
        let mut clauses = Vec::with_capacity(query.predicates.len());
        let mut params = Vec::with_capacity(query.predicates.len());

        for predicate in &query.predicates {
            match predicate {
                Predicate::TreeId(tree_id) => {
                    clauses.push("tree_id = ?".to_string());
                    params.push(Value::Integer(*tree_id));
                }
                Predicate::Level(level) => {
                    clauses.push("level = ?".to_string());
                    params.push(Value::Integer(*level));
                }
                Predicate::Left(cmp, value) => {
                    clauses.push(format!("lft {} ?", cmp.sql()));
                    params.push(Value::Integer(*value));
                }
                Predicate::Right(cmp, value) => {
                    clauses.push(format!("rgt {} ?", cmp.sql()));
                    params.push(Value::Integer(*value));
                }
                Predicate::Leaf => clauses.push("rgt = lft + 1".to_string()),
                Predicate::ExcludeId(id) => {
                    clauses.push("id <> ?".to_string());
                    params.push(Value::Text(id.clone()));
                }
            }
        }

        let mut sql = format!("SELECT {} FROM tree_nodes", NODE_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(match query.order {
            NodeOrder::Preorder => " ORDER BY tree_id ASC, lft ASC",
            NodeOrder::ReversePreorder => " ORDER BY tree_id DESC, lft DESC",
        });
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        (sql, params)
    }

    async fn execute_op(conn: &Connection, op: &BoundaryOp) -> Result<u64> {
        let affected = match op {
            BoundaryOp::Expect {
                id,
                bounds,
                parent_id,
            } => {
                let mut rows = conn
                    .query(
                        "SELECT lft, rgt, tree_id, level, parent_id FROM tree_nodes WHERE id = ?",
                        [id.as_str()],
                    )
                    .await
                    .with_context(|| format!("Failed to read expected row '{}'", id))?;
                let current = match rows.next().await? {
                    Some(row) => Some((
                        row.get::<i64>(0)?,
                        row.get::<i64>(1)?,
                        row.get::<i64>(2)?,
                        row.get::<i64>(3)?,
                        row.get::<Option<String>>(4)?,
                    )),
                    None => None,
                };
                let expected = (
                    bounds.left,
                    bounds.right,
                    bounds.tree_id,
                    bounds.level,
                    parent_id.clone(),
                );
                if current != Some(expected) {
                    return Err(StaleRow { id: id.clone() }.into());
                }
                0
            }
            BoundaryOp::Insert(node) => {
                let properties = serde_json::to_string(&node.properties)
                    .context("Failed to serialize properties")?;
                conn.execute(
                    "INSERT INTO tree_nodes (id, parent_id, lft, rgt, tree_id, level, properties)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    (
                        node.id.as_str(),
                        node.parent_id.as_deref(),
                        node.left,
                        node.right,
                        node.tree_id,
                        node.level,
                        properties.as_str(),
                    ),
                )
                .await
                .with_context(|| format!("Failed to insert node '{}'", node.id))?
            }
            BoundaryOp::Capture {
                tree_id,
                left,
                right,
            } => conn
                .execute(
                    "UPDATE tree_nodes SET lft = -lft, rgt = -rgt
                     WHERE tree_id = ? AND lft >= ? AND rgt <= ? AND lft > 0",
                    (*tree_id, *left, *right),
                )
                .await
                .context("Failed to capture subtree")?,
            BoundaryOp::ShiftLeft {
                tree_id,
                from,
                delta,
            } => conn
                .execute(
                    "UPDATE tree_nodes SET lft = lft + ?
                     WHERE tree_id = ? AND lft > 0 AND lft >= ?",
                    (*delta, *tree_id, *from),
                )
                .await
                .context("Failed to shift left boundaries")?,
            BoundaryOp::ShiftRight {
                tree_id,
                from,
                delta,
            } => conn
                .execute(
                    "UPDATE tree_nodes SET rgt = rgt + ?
                     WHERE tree_id = ? AND rgt > 0 AND rgt >= ?",
                    (*delta, *tree_id, *from),
                )
                .await
                .context("Failed to shift right boundaries")?,
            BoundaryOp::Relocate {
                tree_id,
                delta_pos,
                delta_level,
                new_tree_id,
            } => conn
                .execute(
                    "UPDATE tree_nodes
                     SET lft = ? - lft, rgt = ? - rgt, level = level + ?, tree_id = ?
                     WHERE tree_id = ? AND lft < 0",
                    (*delta_pos, *delta_pos, *delta_level, *new_tree_id, *tree_id),
                )
                .await
                .context("Failed to relocate captured subtree")?,
            BoundaryOp::SetParent { id, parent_id } => {
                let affected = conn
                    .execute(
                        "UPDATE tree_nodes SET parent_id = ? WHERE id = ?",
                        (parent_id.as_deref(), id.as_str()),
                    )
                    .await
                    .with_context(|| format!("Failed to set parent of '{}'", id))?;
                anyhow::ensure!(affected == 1, "Cannot set parent of missing node '{}'", id);
                affected
            }
            BoundaryOp::Assign { id, bounds } => {
                let affected = conn
                    .execute(
                        "UPDATE tree_nodes SET lft = ?, rgt = ?, tree_id = ?, level = ?
                         WHERE id = ?",
                        (
                            bounds.left,
                            bounds.right,
                            bounds.tree_id,
                            bounds.level,
                            id.as_str(),
                        ),
                    )
                    .await
                    .with_context(|| format!("Failed to assign bounds of '{}'", id))?;
                anyhow::ensure!(affected == 1, "Cannot assign bounds of missing node '{}'", id);
                affected
            }
        };
        Ok(affected)
    }

    async fn query_count(conn: &Connection, sql: &str, params: Vec<Value>) -> Result<i64> {
        let mut rows = conn
            .query(sql, libsql::params_from_iter(params))
            .await
            .context("Failed to execute count query")?;
        let row = rows
            .next()
            .await?
            .context("Count query returned no rows")?;
        let count: i64 = row.get(0).context("Failed to get count")?;
        Ok(count)
    }
}

#[async_trait]
impl NodeStore for TursoStore {
    async fn get_node(&self, id: &str) -> Result<Option<TreeNode>> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM tree_nodes WHERE id = ?", NODE_COLUMNS),
                [id],
            )
            .await
            .context("Failed to execute get_node query")?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    async fn query_nodes(&self, query: &NodeQuery) -> Result<Vec<TreeNode>> {
        let (sql, params) = Self::build_select(query);
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(&sql, libsql::params_from_iter(params))
            .await
            .with_context(|| format!("Failed to execute node query: {}", sql))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn apply_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let conn = self.db.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .context("Failed to begin transaction")?;

        for op in &batch.ops {
            if let Err(e) = Self::execute_op(&conn, op).await {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                return Err(e);
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(e).context("Failed to commit transaction");
        }

        tracing::debug!("Committed write batch of {} operations", batch.len());
        Ok(())
    }

    async fn allocate_tree_id(&self) -> Result<i64> {
        let conn = self.db.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .context("Failed to begin transaction")?;

        let result: Result<i64> = async {
            conn.execute(
                "INSERT OR IGNORE INTO tree_counters (name, value) VALUES ('tree_id', 0)",
                (),
            )
            .await?;
            conn.execute(
                "UPDATE tree_counters
                 SET value = MAX(value, (SELECT COALESCE(MAX(tree_id), 0) FROM tree_nodes)) + 1
                 WHERE name = 'tree_id'",
                (),
            )
            .await?;
            Self::query_count(
                &conn,
                "SELECT value FROM tree_counters WHERE name = 'tree_id'",
                Vec::new(),
            )
            .await
        }
        .await;

        match result {
            Ok(tree_id) => {
                conn.execute("COMMIT", ())
                    .await
                    .context("Failed to commit tree id allocation")?;
                Ok(tree_id)
            }
            Err(e) => {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                Err(e).context("Failed to allocate tree id")
            }
        }
    }

    async fn count_related(
        &self,
        relation: &RelationDescriptor,
        node: &TreeNode,
        cumulative: bool,
    ) -> Result<i64> {
        let conn = self.db.connect_with_timeout().await?;
        if cumulative {
            let sql = format!(
                "SELECT COUNT(*) FROM {table} r
                 JOIN tree_nodes n ON n.id = r.{fk}
                 WHERE n.tree_id = ? AND n.lft >= ? AND n.rgt <= ?",
                table = relation.table(),
                fk = relation.foreign_key(),
            );
            Self::query_count(
                &conn,
                &sql,
                vec![
                    Value::Integer(node.tree_id),
                    Value::Integer(node.left),
                    Value::Integer(node.right),
                ],
            )
            .await
        } else {
            let sql = format!(
                "SELECT COUNT(*) FROM {table} WHERE {fk} = ?",
                table = relation.table(),
                fk = relation.foreign_key(),
            );
            Self::query_count(&conn, &sql, vec![Value::Text(node.id.clone())]).await
        }
    }
}

//! Related-Count Aggregator
//!
//! Annotates nodes with the number of rows of an external relation that
//! reference them. Cumulative counts include rows referencing any descendant
//! and are computed with a containment join on the node's boundaries, so a
//! deep subtree costs one count query, not one per descendant.

use crate::db::{NodeStore, RelationDescriptor};
use crate::models::TreeNode;
use crate::services::error::{TreeError, TreeResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A node annotated with its related-row count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedCount {
    pub node: TreeNode,
    pub count: i64,
}

pub struct RelatedCountAggregator {
    store: Arc<dyn NodeStore>,
}

impl RelatedCountAggregator {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Count rows of `relation` referencing each node (or, when `cumulative`
    /// is set, the node or any of its descendants).
    ///
    /// The output has one entry per input node, in input order. Boundaries
    /// are re-read from the store before counting; a node that no longer
    /// exists fails the whole call with `NotFound`.
    pub async fn add_related_count(
        &self,
        nodes: &[TreeNode],
        relation: &RelationDescriptor,
        cumulative: bool,
    ) -> TreeResult<Vec<RelatedCount>> {
        let mut annotated = Vec::with_capacity(nodes.len());
        for node in nodes {
            let current = self
                .store
                .get_node(&node.id)
                .await?
                .ok_or_else(|| TreeError::not_found(&node.id))?;
            let count = self
                .store
                .count_related(relation, &current, cumulative)
                .await?;
            annotated.push(RelatedCount {
                node: current,
                count,
            });
        }

        tracing::debug!(
            "Counted {}.{} for {} nodes (cumulative: {})",
            relation.table(),
            relation.foreign_key(),
            annotated.len(),
            cumulative
        );
        Ok(annotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::Position;
    use crate::services::tree_index::TreeIndexEngine;
    use serde_json::json;

    #[tokio::test]
    async fn test_cumulative_and_direct_counts() {
        let store = Arc::new(MemoryStore::new());
        let engine = TreeIndexEngine::new(store.clone());
        let named = |id: &str| TreeNode::new_with_id(id, json!({}));

        let a = engine.insert_root(named("a")).await.unwrap();
        engine.insert_child(named("b"), "a", Position::LastChild).await.unwrap();
        engine.insert_child(named("c"), "a", Position::LastChild).await.unwrap();

        let relation = RelationDescriptor::new("comments", "node_id").unwrap();
        store.add_related(&relation, "a").await;
        store.add_related(&relation, "b").await;
        store.add_related(&relation, "b").await;

        let aggregator = RelatedCountAggregator::new(store.clone());

        // `a` is stale (inserted before its children); counts use stored bounds
        let direct = aggregator
            .add_related_count(&[a.clone()], &relation, false)
            .await
            .unwrap();
        assert_eq!(direct[0].count, 1);

        let cumulative = aggregator
            .add_related_count(&[a], &relation, true)
            .await
            .unwrap();
        assert_eq!(cumulative[0].count, 3);
        assert_eq!(cumulative[0].node.right, 6);
    }

    #[tokio::test]
    async fn test_preserves_order_and_length() {
        let store = Arc::new(MemoryStore::new());
        let engine = TreeIndexEngine::new(store.clone());
        let r = engine
            .insert_root(TreeNode::new_with_id("r", json!({})))
            .await
            .unwrap();
        let x = engine
            .insert_child(TreeNode::new_with_id("x", json!({})), "r", Position::FirstChild)
            .await
            .unwrap();

        let relation = RelationDescriptor::new("tags", "node_id").unwrap();
        let aggregator = RelatedCountAggregator::new(store);
        let counts = aggregator
            .add_related_count(&[x.clone(), r, x], &relation, true)
            .await
            .unwrap();

        let ids: Vec<&str> = counts.iter().map(|c| c.node.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "r", "x"]);
        assert!(counts.iter().all(|c| c.count == 0));
    }
}

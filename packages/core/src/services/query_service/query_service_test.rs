//! Tests for QueryService
//!
//! Builds a small forest through the engine and checks every query against
//! the expected preorder result.

#[cfg(test)]
mod tests {
    use crate::db::{MemoryStore, NodeStore};
    use crate::models::{Position, TreeNode};
    use crate::services::query_service::{QueryService, TreeQuery};
    use crate::services::tree_index::TreeIndexEngine;
    use serde_json::json;
    use std::sync::Arc;

    /// r
    /// ├── a
    /// │   ├── a1
    /// │   └── a2
    /// └── b
    /// s
    async fn create_test_forest() -> (TreeIndexEngine, QueryService) {
        let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
        let engine = TreeIndexEngine::new(store);
        let named = |id: &str| TreeNode::new_with_id(id, json!({ "title": id }));

        engine.insert_root(named("r")).await.unwrap();
        engine.insert_child(named("a"), "r", Position::LastChild).await.unwrap();
        engine.insert_child(named("b"), "r", Position::LastChild).await.unwrap();
        engine.insert_child(named("a1"), "a", Position::LastChild).await.unwrap();
        engine.insert_child(named("a2"), "a", Position::LastChild).await.unwrap();
        engine.insert_root(named("s")).await.unwrap();

        let queries = engine.queries();
        (engine, queries)
    }

    async fn node(queries: &QueryService, id: &str) -> TreeNode {
        queries.get_node(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_ancestors_in_both_orders() {
        let (_engine, queries) = create_test_forest().await;
        let a2 = node(&queries, "a2").await;

        assert_eq!(queries.ancestors(&a2, false).ids().await.unwrap(), vec!["r", "a"]);
        assert_eq!(queries.ancestors(&a2, true).ids().await.unwrap(), vec!["a", "r"]);

        let r = node(&queries, "r").await;
        assert!(queries.ancestors(&r, false).fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_children_and_descendants() {
        let (_engine, queries) = create_test_forest().await;
        let r = node(&queries, "r").await;

        assert_eq!(queries.children(&r).ids().await.unwrap(), vec!["a", "b"]);
        assert_eq!(
            queries.descendants(&r, false).ids().await.unwrap(),
            vec!["a", "a1", "a2", "b"]
        );
        assert_eq!(
            queries.descendants(&r, true).ids().await.unwrap(),
            vec!["r", "a", "a1", "a2", "b"]
        );
        assert_eq!(queries.descendant_count(&r), 4);
    }

    #[tokio::test]
    async fn test_leaf_children_short_circuit() {
        let (_engine, queries) = create_test_forest().await;
        let b = node(&queries, "b").await;

        let children = queries.children(&b);
        assert!(children.parts().is_empty());
        assert!(children.fetch().await.unwrap().is_empty());
        assert_eq!(queries.descendant_count(&b), 0);
        assert!(queries.is_leaf(&b));
    }

    #[tokio::test]
    async fn test_siblings_of_child_and_root() {
        let (_engine, queries) = create_test_forest().await;
        let a1 = node(&queries, "a1").await;

        let siblings = queries.siblings(&a1, false).await.unwrap();
        assert_eq!(siblings.ids().await.unwrap(), vec!["a2"]);
        let with_self = queries.siblings(&a1, true).await.unwrap();
        assert_eq!(with_self.ids().await.unwrap(), vec!["a1", "a2"]);

        let r = node(&queries, "r").await;
        let roots = queries.siblings(&r, false).await.unwrap();
        assert_eq!(roots.ids().await.unwrap(), vec!["s"]);
    }

    #[tokio::test]
    async fn test_next_and_previous_sibling() {
        let (_engine, queries) = create_test_forest().await;
        let a = node(&queries, "a").await;
        let b = node(&queries, "b").await;

        assert_eq!(queries.next_sibling(&a).await.unwrap().map(|n| n.id), Some("b".into()));
        assert_eq!(queries.previous_sibling(&b).await.unwrap().map(|n| n.id), Some("a".into()));
        assert!(queries.next_sibling(&b).await.unwrap().is_none());
        assert!(queries.previous_sibling(&a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_root_queries() {
        let (_engine, queries) = create_test_forest().await;
        assert_eq!(queries.root_nodes().ids().await.unwrap(), vec!["r", "s"]);

        let a2 = node(&queries, "a2").await;
        assert_eq!(queries.get_root(&a2).await.unwrap().id, "r");
        assert!(queries.is_child(&a2));
        assert!(!queries.is_root(&a2));
        assert!(queries.is_root(&node(&queries, "s").await));
    }

    #[tokio::test]
    async fn test_leaf_nodes_and_family() {
        let (_engine, queries) = create_test_forest().await;
        let r = node(&queries, "r").await;
        let a = node(&queries, "a").await;

        assert_eq!(
            queries.leaf_nodes(&r, false).ids().await.unwrap(),
            vec!["a1", "a2", "b"]
        );
        assert_eq!(
            queries.family(&a).ids().await.unwrap(),
            vec!["r", "a", "a1", "a2"]
        );
    }

    #[tokio::test]
    async fn test_all_nodes_is_global_preorder() {
        let (_engine, queries) = create_test_forest().await;
        assert_eq!(
            queries.all_nodes().ids().await.unwrap(),
            vec!["r", "a", "a1", "a2", "b", "s"]
        );
    }

    #[tokio::test]
    async fn test_queries_are_restartable() {
        let (engine, queries) = create_test_forest().await;
        let roots = queries.root_nodes();
        assert_eq!(roots.count().await.unwrap(), 2);

        engine
            .insert_root(TreeNode::new_with_id("t", json!({})))
            .await
            .unwrap();

        // Same query value, re-executed against the new state
        assert_eq!(roots.ids().await.unwrap(), vec!["r", "s", "t"]);
        assert!(TreeQuery::empty().first().await.unwrap().is_none());
    }
}

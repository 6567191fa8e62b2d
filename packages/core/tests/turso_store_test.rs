//! Integration tests for the libsql backend
//!
//! Runs the engine against a real database file to cover:
//! - SQL translation of boundary predicates and ranged shifts
//! - Transaction rollback of failing write batches
//! - Batch preconditions checked against rows another engine changed
//! - Cumulative related counts via the containment join
//! - Persistence of the tree id counter across reopen

#![cfg(feature = "turso")]

use anyhow::Result;
use mptt_core::{
    check_integrity,
    db::{
        BoundaryOp, DatabaseService, NodeStore, RelationDescriptor, StaleRow, TursoStore,
        WriteBatch,
    },
    open_store, Position, RelatedCountAggregator, TreeBounds, TreeConfig, TreeIndexEngine,
    TreeNode,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

/// Test helper: Create an engine over a fresh database file
async fn create_test_env() -> Result<(TreeIndexEngine, Arc<TursoStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let db = Arc::new(DatabaseService::new(db_path).await?);
    let store = Arc::new(TursoStore::new(db));
    let config = TreeConfig {
        verify_after_mutation: true,
        ..Default::default()
    };
    let engine = TreeIndexEngine::with_config(store.clone(), config);
    Ok((engine, store, temp_dir))
}

fn named(id: &str) -> TreeNode {
    TreeNode::new_with_id(id, json!({ "title": id }))
}

async fn bounds(store: &TursoStore, id: &str) -> Result<(i64, i64, i64, i64)> {
    let node = store
        .get_node(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing node {}", id))?;
    Ok((node.left, node.right, node.tree_id, node.level))
}

#[tokio::test]
async fn test_insert_and_move_scenario() -> Result<()> {
    let (engine, store, _temp_dir) = create_test_env().await?;

    let r1 = engine.insert_root(named("r1")).await?;
    assert_eq!((r1.left, r1.right, r1.tree_id, r1.level), (1, 2, 1, 0));

    engine.insert_child(named("a"), "r1", Position::LastChild).await?;
    engine.insert_child(named("b"), "r1", Position::LastChild).await?;
    assert_eq!(bounds(&store, "r1").await?, (1, 6, 1, 0));

    engine.move_node("a", Some("b"), "right").await?;
    assert_eq!(bounds(&store, "b").await?, (2, 3, 1, 1));
    assert_eq!(bounds(&store, "a").await?, (4, 5, 1, 1));

    let stored = store.get_node("a").await?.unwrap();
    assert_eq!(stored.parent_id.as_deref(), Some("r1"));
    assert_eq!(stored.properties, json!({ "title": "a" }));
    Ok(())
}

#[tokio::test]
async fn test_cross_tree_move_and_queries() -> Result<()> {
    let (engine, store, _temp_dir) = create_test_env().await?;
    engine.insert_root(named("r1")).await?;
    engine.insert_child(named("a"), "r1", Position::LastChild).await?;
    engine.insert_child(named("a1"), "a", Position::LastChild).await?;
    engine.insert_root(named("r2")).await?;

    engine.move_node("a", Some("r2"), "first-child").await?;
    assert_eq!(bounds(&store, "a").await?, (2, 5, 2, 1));
    assert_eq!(bounds(&store, "a1").await?, (3, 4, 2, 2));

    let queries = engine.queries();
    let a1 = store.get_node("a1").await?.unwrap();
    assert_eq!(queries.ancestors(&a1, false).ids().await?, vec!["r2", "a"]);
    assert_eq!(queries.root_nodes().ids().await?, vec!["r1", "r2"]);
    let r1 = store.get_node("r1").await?.unwrap();
    assert!(queries.children(&r1).fetch().await?.is_empty());

    let report = check_integrity(&*store, None).await?;
    assert!(report.is_valid(), "violations: {:?}", report.violations);
    Ok(())
}

#[tokio::test]
async fn test_failing_batch_rolls_back() -> Result<()> {
    let (engine, store, _temp_dir) = create_test_env().await?;
    engine.insert_root(named("r")).await?;
    engine.insert_child(named("a"), "r", Position::LastChild).await?;
    let before = store.query_nodes(&Default::default()).await?;

    let mut batch = WriteBatch::new();
    batch.push(BoundaryOp::ShiftRight {
        tree_id: 1,
        from: 1,
        delta: 10,
    });
    batch.push(BoundaryOp::Assign {
        id: "ghost".to_string(),
        bounds: TreeBounds::root(1),
    });
    assert!(store.apply_batch(batch).await.is_err());

    assert_eq!(before, store.query_nodes(&Default::default()).await?);
    Ok(())
}

#[tokio::test]
async fn test_stale_precondition_rolls_back() -> Result<()> {
    let (engine, store, _temp_dir) = create_test_env().await?;
    engine.insert_root(named("r")).await?;
    engine.insert_child(named("a"), "r", Position::LastChild).await?;
    engine.insert_child(named("b"), "r", Position::LastChild).await?;
    let a = store.get_node("a").await?.unwrap();

    // A second engine on the same database reorders the children
    let other = TreeIndexEngine::new(store.clone());
    other.move_node("a", Some("b"), "right").await?;
    let before = store.query_nodes(&Default::default()).await?;

    let mut batch = WriteBatch::new();
    batch.push(BoundaryOp::expect(&a));
    batch.push(BoundaryOp::ShiftRight {
        tree_id: 1,
        from: 1,
        delta: 10,
    });
    let err = store.apply_batch(batch).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<StaleRow>(),
        Some(&StaleRow { id: "a".to_string() })
    );
    assert_eq!(before, store.query_nodes(&Default::default()).await?);

    // The first engine plans from fresh rows and still succeeds
    engine.move_node("a", Some("r"), "first-child").await?;
    assert_eq!(bounds(&store, "a").await?, (2, 3, 1, 1));
    assert_eq!(bounds(&store, "b").await?, (4, 5, 1, 1));
    Ok(())
}

#[tokio::test]
async fn test_cumulative_related_counts() -> Result<()> {
    let (engine, store, _temp_dir) = create_test_env().await?;
    let a = engine.insert_root(named("a")).await?;
    engine.insert_child(named("b"), "a", Position::LastChild).await?;
    engine.insert_child(named("c"), "a", Position::LastChild).await?;

    let conn = store.database().connect_with_timeout().await?;
    conn.execute(
        "CREATE TABLE comments (id INTEGER PRIMARY KEY, node_id TEXT NOT NULL)",
        (),
    )
    .await?;
    for node_id in ["a", "b", "b"] {
        conn.execute(
            "INSERT INTO comments (node_id) VALUES (?)",
            libsql::params![node_id],
        )
        .await?;
    }

    let relation = RelationDescriptor::new("comments", "node_id")?;
    let aggregator = RelatedCountAggregator::new(store.clone());

    let direct = aggregator.add_related_count(&[a.clone()], &relation, false).await?;
    assert_eq!(direct[0].count, 1);

    let cumulative = aggregator.add_related_count(&[a], &relation, true).await?;
    assert_eq!(cumulative[0].count, 3);

    let c = store.get_node("c").await?.unwrap();
    let leaf = aggregator.add_related_count(&[c], &relation, true).await?;
    assert_eq!(leaf[0].count, 0);
    Ok(())
}

#[tokio::test]
async fn test_tree_ids_survive_reopen() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = TreeConfig {
        database_path: Some(temp_dir.path().join("forest.db")),
        ..Default::default()
    };

    {
        let engine = TreeIndexEngine::with_config(open_store(&config).await?, config.clone());
        engine.insert_root(named("first")).await?;
        engine.insert_root(named("second")).await?;
    }

    let engine = TreeIndexEngine::with_config(open_store(&config).await?, config.clone());
    let third = engine.insert_root(named("third")).await?;
    assert_eq!(third.tree_id, 3);

    let changed = engine.rebuild().await?;
    assert_eq!(changed, 0);
    Ok(())
}

//! Nested-set integrity checking
//!
//! Verifies stored boundaries against an independent walk over parent
//! references. Used by tests, by `TreeConfig::verify_after_mutation`, and by
//! hosts that want to audit a table before trusting it.

use crate::db::{NodeOrder, NodeQuery, NodeStore, Predicate};
use crate::models::TreeNode;
use crate::services::error::{TreeError, TreeResult};
use std::collections::{BTreeMap, HashMap};

/// Outcome of an integrity check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub trees_checked: usize,
    pub nodes_checked: usize,
    pub violations: Vec<String>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_result(self) -> TreeResult<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(TreeError::IntegrityViolation(self.violations))
        }
    }
}

/// Check the given trees, or the whole forest when `tree_ids` is `None`.
///
/// Repeated ids are checked once.
pub async fn check_integrity(
    store: &dyn NodeStore,
    tree_ids: Option<&[i64]>,
) -> TreeResult<IntegrityReport> {
    let nodes = match tree_ids {
        None => store.query_nodes(&NodeQuery::new(NodeOrder::Preorder)).await?,
        Some(ids) => {
            let mut ids = ids.to_vec();
            ids.sort_unstable();
            ids.dedup();

            let mut nodes = Vec::new();
            for tree_id in &ids {
                let query = NodeQuery::new(NodeOrder::Preorder).with(Predicate::TreeId(*tree_id));
                nodes.extend(store.query_nodes(&query).await?);
            }
            nodes
        }
    };
    Ok(check_nodes(&nodes))
}

/// Check an in-memory snapshot of complete trees
pub fn check_nodes(nodes: &[TreeNode]) -> IntegrityReport {
    let mut report = IntegrityReport {
        nodes_checked: nodes.len(),
        ..Default::default()
    };
    let by_id: HashMap<&str, &TreeNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut trees: BTreeMap<i64, Vec<&TreeNode>> = BTreeMap::new();
    for node in nodes {
        trees.entry(node.tree_id).or_default().push(node);
    }
    report.trees_checked = trees.len();

    // Descendant counts from parent references only
    let mut descendants: HashMap<&str, i64> = HashMap::new();
    for node in nodes {
        let mut current = node.parent_id.as_deref();
        let mut steps = 0;
        while let Some(parent_id) = current {
            steps += 1;
            if steps > nodes.len() {
                report
                    .violations
                    .push(format!("Parent chain of '{}' contains a cycle", node.id));
                break;
            }
            *descendants.entry(parent_id).or_default() += 1;
            current = by_id.get(parent_id).and_then(|p| p.parent_id.as_deref());
        }
    }

    for (tree_id, members) in &trees {
        let roots: Vec<&&TreeNode> = members.iter().filter(|n| n.parent_id.is_none()).collect();
        if roots.len() != 1 {
            report.violations.push(format!(
                "Tree {} has {} parentless nodes, expected exactly one",
                tree_id,
                roots.len()
            ));
        }
        for root in roots {
            if root.level != 0 {
                report
                    .violations
                    .push(format!("Root '{}' has level {}", root.id, root.level));
            }
        }

        let mut boundaries: Vec<i64> = members.iter().flat_map(|n| [n.left, n.right]).collect();
        boundaries.sort_unstable();
        let expected: Vec<i64> = (1..=2 * members.len() as i64).collect();
        if boundaries != expected {
            report.violations.push(format!(
                "Tree {} boundaries are not a contiguous 1..={} sequence",
                tree_id,
                2 * members.len()
            ));
        }
    }

    let mut children: HashMap<&str, Vec<&TreeNode>> = HashMap::new();
    for node in nodes {
        if node.left >= node.right {
            report.violations.push(format!(
                "Node '{}' has left {} not below right {}",
                node.id, node.left, node.right
            ));
        }

        let below = descendants.get(node.id.as_str()).copied().unwrap_or(0);
        let expected_right = node.left + 1 + 2 * below;
        if node.right != expected_right {
            report.violations.push(format!(
                "Node '{}' has right {} but its descendants require {}",
                node.id, node.right, expected_right
            ));
        }

        let Some(parent_id) = node.parent_id.as_deref() else {
            continue;
        };
        let Some(parent) = by_id.get(parent_id) else {
            report.violations.push(format!(
                "Node '{}' references missing parent '{}'",
                node.id, parent_id
            ));
            continue;
        };
        children.entry(parent_id).or_default().push(node);

        if parent.tree_id != node.tree_id {
            report.violations.push(format!(
                "Node '{}' is in tree {} but its parent is in tree {}",
                node.id, node.tree_id, parent.tree_id
            ));
        }
        if node.level != parent.level + 1 {
            report.violations.push(format!(
                "Node '{}' has level {} under parent level {}",
                node.id, node.level, parent.level
            ));
        }
        if !(parent.left < node.left && node.right < parent.right) {
            report.violations.push(format!(
                "Node '{}' [{}, {}] is not nested in parent '{}' [{}, {}]",
                node.id, node.left, node.right, parent.id, parent.left, parent.right
            ));
        }
    }

    for (parent_id, mut siblings) in children {
        siblings.sort_by_key(|n| n.left);
        for pair in siblings.windows(2) {
            if pair[0].right >= pair[1].left {
                report.violations.push(format!(
                    "Siblings '{}' and '{}' under '{}' overlap",
                    pair[0].id, pair[1].id, parent_id
                ));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TreeBounds;
    use serde_json::json;

    fn node(id: &str, parent: Option<&str>, left: i64, right: i64, level: i64) -> TreeNode {
        TreeNode::new_with_id(id, json!({})).placed(
            parent.map(str::to_string),
            TreeBounds {
                left,
                right,
                tree_id: 1,
                level,
            },
        )
    }

    #[test]
    fn test_valid_tree_passes() {
        let nodes = vec![
            node("r", None, 1, 8, 0),
            node("a", Some("r"), 2, 5, 1),
            node("a1", Some("a"), 3, 4, 2),
            node("b", Some("r"), 6, 7, 1),
        ];
        let report = check_nodes(&nodes);
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.trees_checked, 1);
        assert_eq!(report.nodes_checked, 4);
    }

    #[test]
    fn test_detects_stale_right_boundary() {
        let nodes = vec![
            node("r", None, 1, 4, 0),
            node("a", Some("r"), 2, 3, 1),
            node("b", Some("r"), 4, 5, 1),
        ];
        let report = check_nodes(&nodes);
        assert!(!report.is_valid());
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_detects_two_roots_in_one_tree() {
        let nodes = vec![node("r", None, 1, 2, 0), node("s", None, 3, 4, 0)];
        let report = check_nodes(&nodes);
        assert!(report
            .violations
            .iter()
            .any(|v| v.contains("2 parentless nodes")));
    }

    #[tokio::test]
    async fn test_repeated_tree_ids_are_checked_once() {
        let store = crate::db::MemoryStore::with_nodes(vec![
            node("r", None, 1, 4, 0),
            node("a", Some("r"), 2, 3, 1),
        ]);
        let report = check_integrity(&store, Some(&[1, 1][..])).await.unwrap();
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.nodes_checked, 2);
    }
}

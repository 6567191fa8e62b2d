//! Data Models
//!
//! This module contains the data structures shared by the store, the tree
//! index engine and the query layer:
//!
//! - `TreeNode` - Fixed nested-set row (identity, parent, bounds, payload)
//! - `TreeBounds` - `left`/`right`/`tree_id`/`level` value type
//! - `TreeRecord` - Capability trait for records laid out with the row schema
//! - `Position` / `MoveTarget` - Placement tokens for insert and move requests

mod position;
mod tree_node;

pub use position::{MoveTarget, Position};
pub use tree_node::{TreeBounds, TreeNode, TreeRecord, ValidationError};

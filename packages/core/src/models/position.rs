//! Placement tokens for insertion and move requests

use crate::models::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a node lands relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    /// Becomes the target's first child
    FirstChild,
    /// Becomes the target's last child
    LastChild,
    /// Becomes the target's immediately preceding sibling
    Left,
    /// Becomes the target's immediately following sibling
    Right,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::FirstChild => "first-child",
            Position::LastChild => "last-child",
            Position::Left => "left",
            Position::Right => "right",
        }
    }

    /// Child positions place the node one level below the target
    pub fn is_child(&self) -> bool {
        matches!(self, Position::FirstChild | Position::LastChild)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-child" => Ok(Position::FirstChild),
            "last-child" => Ok(Position::LastChild),
            "left" => Ok(Position::Left),
            "right" => Ok(Position::Right),
            other => Err(ValidationError::InvalidPosition(other.to_string())),
        }
    }
}

/// Destination of a move request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    /// Detach the node and make it the root of a new tree
    Root,
    /// Place the node relative to another node
    Node { id: String, position: Position },
}

impl MoveTarget {
    pub fn node(id: impl Into<String>, position: Position) -> Self {
        MoveTarget::Node {
            id: id.into(),
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_all_tokens() {
        for position in [
            Position::FirstChild,
            Position::LastChild,
            Position::Left,
            Position::Right,
        ] {
            assert_eq!(position.as_str().parse::<Position>().unwrap(), position);
        }
    }

    #[test]
    fn test_rejects_unknown_token() {
        let err = "middle".parse::<Position>().unwrap_err();
        assert_eq!(err, ValidationError::InvalidPosition("middle".to_string()));
        assert!("First-Child".parse::<Position>().is_err());
    }

    #[test]
    fn test_serde_uses_tokens() {
        let json = serde_json::to_string(&Position::LastChild).unwrap();
        assert_eq!(json, "\"last-child\"");
    }
}

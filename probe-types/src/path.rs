//! Path-addressed store keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Separator used when a path is rendered as a soul string.
const SEPARATOR: char = '/';

/// The address of a node in the graph store.
///
/// A path is a non-empty chain of keys: `get("test").next("data")` addresses
/// `test/data`. On the wire it is carried as a JSON array of segments;
/// decoding rejects empty paths, empty keys and keys containing `/`, so a
/// path and its soul identify the same node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// Create a single-segment path.
    pub fn root(key: &str) -> Self {
        Self(vec![key.to_string()])
    }

    /// Create the path of a child node.
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        Self(segments)
    }

    /// Parse a `/`-separated path such as `test/data`.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        let segments: Vec<String> = s.split(SEPARATOR).map(str::to_string).collect();
        Self::from_segments(segments).ok_or_else(|| WireError::InvalidPath(s.to_string()))
    }

    /// Build a path from raw segments, rejecting empty paths, empty keys
    /// and keys containing the separator.
    pub fn from_segments(segments: Vec<String>) -> Option<Self> {
        let valid = |key: &String| !key.is_empty() && !key.contains(SEPARATOR);
        if segments.is_empty() || !segments.iter().all(valid) {
            return None;
        }
        Some(Self(segments))
    }

    /// The individual keys of this path.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The soul of the node at this path (its segments joined by `/`).
    pub fn soul(&self) -> String {
        self.0.join("/")
    }
}

impl TryFrom<Vec<String>> for NodePath {
    type Error = WireError;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        let rendered = format!("{:?}", segments);
        Self::from_segments(segments).ok_or(WireError::InvalidPath(rendered))
    }
}

impl From<NodePath> for Vec<String> {
    fn from(path: NodePath) -> Self {
        path.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.soul())
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({})", self.soul())
    }
}

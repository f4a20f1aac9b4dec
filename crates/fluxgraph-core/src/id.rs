use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, globally unique identifier of a graph element.
///
/// Ids are caller-assigned (or auto-generated from the per-kind
/// counters) and survive JSON round-trips unchanged, so they are plain
/// strings rather than arena keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ElementId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Kind of a node element (everything except edges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Pool,
    Gate,
    Converter,
    Swap,
}

/// Kind of any graph element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Pool,
    Gate,
    Converter,
    Swap,
    Edge,
}

impl From<NodeKind> for ElementKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Pool => ElementKind::Pool,
            NodeKind::Gate => ElementKind::Gate,
            NodeKind::Converter => ElementKind::Converter,
            NodeKind::Swap => ElementKind::Swap,
        }
    }
}

impl ElementKind {
    /// The serialized tag and default-label prefix for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Pool => "pool",
            ElementKind::Gate => "gate",
            ElementKind::Converter => "converter",
            ElementKind::Swap => "swap",
            ElementKind::Edge => "edge",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn ids_compare_by_content() {
        assert_eq!(ElementId::from("a"), ElementId::new("a"));
        assert_ne!(ElementId::from("a"), ElementId::from("b"));
    }

    #[test]
    fn ids_are_map_keys_borrowable_as_str() {
        let mut map = HashMap::new();
        map.insert(ElementId::from("p0"), 1);
        assert_eq!(map.get("p0"), Some(&1));
    }

    #[test]
    fn kind_tags() {
        assert_eq!(ElementKind::Pool.as_str(), "pool");
        assert_eq!(ElementKind::from(NodeKind::Swap), ElementKind::Swap);
        assert_eq!(format!("{}", ElementKind::Edge), "edge");
    }
}

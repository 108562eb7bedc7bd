use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form property bag. Keys are kept sorted so serialisation and
/// hashing are deterministic.
pub type PropertyMap = BTreeMap<String, Value>;

// =============================================================================
// Enums
// =============================================================================

/// Traversability of an edge.
///
/// Directed edges are only followed from `from_id` to `to_id`; undirected and
/// bidirectional edges are followed both ways.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    #[default]
    Directed,
    Undirected,
    Bidirectional,
}

impl EdgeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Directed => "directed",
            Self::Undirected => "undirected",
            Self::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "directed" => Some(Self::Directed),
            "undirected" => Some(Self::Undirected),
            "bidirectional" => Some(Self::Bidirectional),
            _ => None,
        }
    }

    /// Whether the edge may be walked from `to_id` back to `from_id`.
    pub fn is_reversible(&self) -> bool {
        !matches!(self, Self::Directed)
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Versioned property set of a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeProperties {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Starts at 1 and increases by exactly one on every property update.
    pub version: u64,
    #[serde(flatten)]
    pub fields: PropertyMap,
}

impl NodeProperties {
    pub fn new(fields: PropertyMap) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            version: 1,
            fields,
        }
    }

    /// Merge `fields` into this property set and bump the version.
    pub fn merge(&mut self, fields: PropertyMap) {
        self.fields.extend(fields);
        self.version += 1;
        self.updated_at = Utc::now().max(self.created_at);
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }
}

/// Ranking and provenance metadata of a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// In [0, 1].
    pub importance: f64,
    /// In [0, 1].
    pub confidence: f64,
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub source: String,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            importance: 0.5,
            confidence: 1.0,
            access_count: 0,
            last_accessed: None,
            tags: BTreeSet::new(),
            source: "system".to_string(),
        }
    }
}

impl NodeMetadata {
    pub fn record_access(&mut self, at: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = Some(at);
    }

    pub fn has_all_tags<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        tags.into_iter().all(|t| self.tags.contains(t))
    }
}

/// A typed entity in the knowledge graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub properties: NodeProperties,
    /// Owned exclusively by this node; never shared with the vector index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: NodeMetadata,
}

impl Node {
    /// Concatenate the string values of `fields` (in the given order),
    /// separated by single spaces.
    pub fn text_content(&self, fields: &[String]) -> String {
        text_from_fields(&self.properties.fields, fields)
    }
}

/// Assemble searchable text from a property map, field order preserved.
pub fn text_from_fields(properties: &PropertyMap, fields: &[String]) -> String {
    fields
        .iter()
        .filter_map(|f| properties.get(f).and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Edges
// =============================================================================

/// Structural properties of an edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeProperties {
    /// Non-negative traversal cost, 1.0 unless specified.
    pub weight: f64,
    pub direction: EdgeDirection,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: PropertyMap,
}

/// Provenance metadata of an edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    pub confidence: f64,
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub source: String,
}

impl Default for EdgeMetadata {
    fn default() -> Self {
        Self {
            confidence: 1.0,
            access_count: 0,
            last_accessed: None,
            source: "system".to_string(),
        }
    }
}

/// A typed relationship between two existing nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub properties: EdgeProperties,
    pub metadata: EdgeMetadata,
}

impl Edge {
    /// Deterministic edge id. `seq` disambiguates ids that would otherwise
    /// collide once node ids contain the separator.
    pub fn make_id(from_id: &str, edge_type: &str, to_id: &str, seq: u64) -> String {
        format!("{}->{}->{}#{}", from_id, edge_type, to_id, seq)
    }

    /// The node reached by walking this edge away from `node_id`, if the
    /// edge is traversable in that direction.
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.from_id == node_id {
            Some(&self.to_id)
        } else if self.to_id == node_id && self.properties.direction.is_reversible() {
            Some(&self.from_id)
        } else {
            None
        }
    }
}

//! Entity store: sole owner of every node and edge.
//!
//! Enforces id uniqueness, endpoint existence, `(from, to, type)` edge
//! deduplication and the configured capacity limits. Iteration follows
//! insertion order so that algorithms built on top are deterministic.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;

use kgraph_core::error::{GraphError, Result};
use kgraph_core::types::{Edge, EdgeDirection, EdgeMetadata, EdgeProperties, Node, PropertyMap};

/// Parsed `add_edge` properties.
///
/// Recognised keys are lifted out of the property bag; everything else is
/// kept as free-form fields on the edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeInput {
    pub weight: Option<f64>,
    pub direction: Option<EdgeDirection>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub fields: PropertyMap,
}

impl EdgeInput {
    /// Build from a JSON object. `null` is treated as an empty object.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields: PropertyMap = match value {
            Value::Null => PropertyMap::new(),
            Value::Object(map) => map.into_iter().collect(),
            other => {
                return Err(GraphError::InvalidInput(format!(
                    "edge properties must be an object, got {}",
                    other
                )))
            }
        };

        let weight = match fields.remove("weight") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let w = v.as_f64().ok_or_else(|| {
                    GraphError::InvalidInput(format!("edge weight must be a number, got {}", v))
                })?;
                if !w.is_finite() || w < 0.0 {
                    return Err(GraphError::InvalidInput(format!(
                        "edge weight must be finite and non-negative, got {}",
                        w
                    )));
                }
                Some(w)
            }
        };

        let direction = match fields.remove("direction") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let parsed = v.as_str().and_then(EdgeDirection::parse).ok_or_else(|| {
                    GraphError::InvalidInput(format!("unknown edge direction {}", v))
                })?;
                Some(parsed)
            }
        };

        let confidence = fields
            .remove("confidence")
            .and_then(|v| v.as_f64())
            .map(|c| c.clamp(0.0, 1.0));
        let source = fields
            .remove("source")
            .and_then(|v| v.as_str().map(String::from));

        // Owned by the store.
        fields.remove("created_at");

        Ok(Self {
            weight,
            direction,
            confidence,
            source,
            fields,
        })
    }
}

/// Outcome of [`EntityStore::upsert_edge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeUpsert {
    Created(String),
    Merged(String),
}

impl EdgeUpsert {
    pub fn edge_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Merged(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EdgeKey {
    from_id: String,
    to_id: String,
    edge_type: String,
}

impl EdgeKey {
    fn new(from_id: &str, to_id: &str, edge_type: &str) -> Self {
        Self {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            edge_type: edge_type.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityStore {
    nodes: HashMap<String, Node>,
    node_order: Vec<String>,
    edges: HashMap<String, Edge>,
    edge_order: Vec<String>,
    edge_keys: HashMap<EdgeKey, String>,
    next_edge_seq: u64,
    max_nodes: usize,
    max_edges: usize,
}

impl EntityStore {
    pub fn new(max_nodes: usize, max_edges: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            node_order: Vec::new(),
            edges: HashMap::new(),
            edge_order: Vec::new(),
            edge_keys: HashMap::new(),
            next_edge_seq: 0,
            max_nodes,
            max_edges,
        }
    }

    /// Fail if a node with `id` could not be inserted right now.
    pub fn check_node_insert(&self, id: &str) -> Result<()> {
        if self.nodes.contains_key(id) {
            return Err(GraphError::DuplicateNode { id: id.to_string() });
        }
        if self.nodes.len() >= self.max_nodes {
            return Err(GraphError::CapacityExceeded {
                kind: "node",
                limit: self.max_nodes,
            });
        }
        Ok(())
    }

    pub fn insert_node(&mut self, node: Node) -> Result<()> {
        self.check_node_insert(&node.id)?;
        self.node_order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Create an edge, or merge `input` into the existing edge with the same
    /// `(from_id, to_id, edge_type)` triple.
    pub fn upsert_edge(
        &mut self,
        from_id: &str,
        to_id: &str,
        edge_type: &str,
        input: EdgeInput,
    ) -> Result<EdgeUpsert> {
        for endpoint in [from_id, to_id] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::MissingNode {
                    id: endpoint.to_string(),
                });
            }
        }

        let key = EdgeKey::new(from_id, to_id, edge_type);
        if let Some(existing_id) = self.edge_keys.get(&key).cloned() {
            if let Some(edge) = self.edges.get_mut(&existing_id) {
                merge_edge(edge, input);
            }
            return Ok(EdgeUpsert::Merged(existing_id));
        }

        if self.edges.len() >= self.max_edges {
            return Err(GraphError::CapacityExceeded {
                kind: "edge",
                limit: self.max_edges,
            });
        }

        let id = self.allocate_edge_id(from_id, edge_type, to_id);
        let edge = Edge {
            id: id.clone(),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            edge_type: edge_type.to_string(),
            properties: EdgeProperties {
                weight: input.weight.unwrap_or(1.0),
                direction: input.direction.unwrap_or_default(),
                created_at: Utc::now(),
                fields: input.fields,
            },
            metadata: EdgeMetadata {
                confidence: input.confidence.unwrap_or(1.0),
                source: input.source.unwrap_or_else(|| "system".to_string()),
                ..EdgeMetadata::default()
            },
        };

        self.edge_keys.insert(key, id.clone());
        self.edge_order.push(id.clone());
        self.edges.insert(id.clone(), edge);
        Ok(EdgeUpsert::Created(id))
    }

    /// Re-insert a previously persisted edge, keeping its id.
    ///
    /// Returns `Ok(false)` when an edge for the same triple is already
    /// present; the persisted copy is then ignored.
    pub fn restore_edge(&mut self, edge: Edge) -> Result<bool> {
        for endpoint in [&edge.from_id, &edge.to_id] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::MissingNode {
                    id: endpoint.clone(),
                });
            }
        }
        let key = EdgeKey::new(&edge.from_id, &edge.to_id, &edge.edge_type);
        if self.edge_keys.contains_key(&key) || self.edges.contains_key(&edge.id) {
            return Ok(false);
        }
        if self.edges.len() >= self.max_edges {
            return Err(GraphError::CapacityExceeded {
                kind: "edge",
                limit: self.max_edges,
            });
        }

        self.edge_keys.insert(key, edge.id.clone());
        self.edge_order.push(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
        Ok(true)
    }

    fn allocate_edge_id(&mut self, from_id: &str, edge_type: &str, to_id: &str) -> String {
        loop {
            let id = Edge::make_id(from_id, edge_type, to_id, self.next_edge_seq);
            self.next_edge_seq += 1;
            if !self.edges.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn get_edge_mut(&mut self, id: &str) -> Option<&mut Edge> {
        self.edges.get_mut(id)
    }

    pub fn find_edge(&self, from_id: &str, to_id: &str, edge_type: &str) -> Option<&Edge> {
        self.edge_keys
            .get(&EdgeKey::new(from_id, to_id, edge_type))
            .and_then(|id| self.edges.get(id))
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edge_order.iter().filter_map(|id| self.edges.get(id))
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_order
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn max_edges(&self) -> usize {
        self.max_edges
    }
}

fn merge_edge(edge: &mut Edge, input: EdgeInput) {
    if let Some(weight) = input.weight {
        edge.properties.weight = weight;
    }
    if let Some(direction) = input.direction {
        edge.properties.direction = direction;
    }
    if let Some(confidence) = input.confidence {
        edge.metadata.confidence = confidence;
    }
    if let Some(source) = input.source {
        edge.metadata.source = source;
    }
    edge.properties.fields.extend(input.fields);
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgraph_core::types::{NodeMetadata, NodeProperties};
    use serde_json::json;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: "concept".to_string(),
            properties: NodeProperties::new(PropertyMap::new()),
            embedding: None,
            metadata: NodeMetadata::default(),
        }
    }

    fn store_with(ids: &[&str]) -> EntityStore {
        let mut store = EntityStore::new(100, 100);
        for id in ids {
            store.insert_node(node(id)).unwrap();
        }
        store
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut store = store_with(&["a"]);
        let err = store.insert_node(node("a")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { ref id } if id == "a"));
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn test_node_capacity_enforced() {
        let mut store = EntityStore::new(2, 10);
        store.insert_node(node("a")).unwrap();
        store.insert_node(node("b")).unwrap();
        let err = store.insert_node(node("c")).unwrap_err();
        assert!(matches!(
            err,
            GraphError::CapacityExceeded {
                kind: "node",
                limit: 2
            }
        ));
    }

    #[test]
    fn test_edge_requires_existing_endpoints() {
        let mut store = store_with(&["a"]);
        let err = store
            .upsert_edge("a", "ghost", "related_to", EdgeInput::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingNode { ref id } if id == "ghost"));
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn test_duplicate_triple_merges() {
        let mut store = store_with(&["a", "b"]);
        let first = store
            .upsert_edge(
                "a",
                "b",
                "related_to",
                EdgeInput::from_value(json!({"weight": 1.0, "note": "x"})).unwrap(),
            )
            .unwrap();
        let second = store
            .upsert_edge(
                "a",
                "b",
                "related_to",
                EdgeInput::from_value(json!({"weight": 3.0, "extra": true})).unwrap(),
            )
            .unwrap();

        assert!(matches!(first, EdgeUpsert::Created(_)));
        assert!(matches!(second, EdgeUpsert::Merged(_)));
        assert_eq!(first.edge_id(), second.edge_id());
        assert_eq!(store.edge_count(), 1);

        let edge = store.get_edge(first.edge_id()).unwrap();
        assert_eq!(edge.properties.weight, 3.0);
        assert_eq!(edge.properties.fields.get("note"), Some(&json!("x")));
        assert_eq!(edge.properties.fields.get("extra"), Some(&json!(true)));
    }

    #[test]
    fn test_merge_allowed_at_edge_capacity() {
        let mut store = EntityStore::new(10, 1);
        store.insert_node(node("a")).unwrap();
        store.insert_node(node("b")).unwrap();
        store
            .upsert_edge("a", "b", "t", EdgeInput::default())
            .unwrap();
        assert!(store
            .upsert_edge("a", "b", "t", EdgeInput::default())
            .is_ok());
        let err = store
            .upsert_edge("b", "a", "t", EdgeInput::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::CapacityExceeded { kind: "edge", .. }));
    }

    #[test]
    fn test_edge_input_validation() {
        assert!(EdgeInput::from_value(json!({"weight": -1.0})).is_err());
        assert!(EdgeInput::from_value(json!({"weight": "heavy"})).is_err());
        assert!(EdgeInput::from_value(json!({"direction": "sideways"})).is_err());
        assert!(EdgeInput::from_value(json!([1, 2])).is_err());

        let input = EdgeInput::from_value(json!({
            "weight": 2.5,
            "direction": "undirected",
            "label": "peer"
        }))
        .unwrap();
        assert_eq!(input.weight, Some(2.5));
        assert_eq!(input.direction, Some(EdgeDirection::Undirected));
        assert_eq!(input.fields.get("label"), Some(&json!("peer")));
        assert!(!input.fields.contains_key("weight"));
    }

    #[test]
    fn test_edge_defaults_and_lookup() {
        let mut store = store_with(&["a", "b"]);
        let id = store
            .upsert_edge("a", "b", "uses", EdgeInput::default())
            .unwrap();
        let edge = store.find_edge("a", "b", "uses").unwrap();
        assert_eq!(edge.id, id.edge_id());
        assert_eq!(edge.properties.weight, 1.0);
        assert_eq!(edge.properties.direction, EdgeDirection::Directed);
        assert!(store.find_edge("b", "a", "uses").is_none());
    }

    #[test]
    fn test_restore_edge_skips_existing_triple() {
        let mut store = store_with(&["a", "b"]);
        let created = store
            .upsert_edge("a", "b", "uses", EdgeInput::default())
            .unwrap();
        let mut copy = store.get_edge(created.edge_id()).unwrap().clone();
        copy.id = "other".to_string();
        assert!(!store.restore_edge(copy).unwrap());
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let store = store_with(&["zeta", "alpha", "mid"]);
        let ids: Vec<&str> = store.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }
}

//! Persistence hooks.
//!
//! The in-memory engine is authoritative. A backend receives a copy of every
//! node and edge as it is written and can hand a snapshot back at startup.

use std::sync::{Arc, Mutex};

use kgraph_core::error::{GraphError, Result};
use kgraph_core::types::{Edge, Node};

/// Everything a backend returns at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

pub trait PersistenceBackend: Send + Sync {
    fn persist_node(&self, node: &Node) -> Result<()>;

    fn persist_edge(&self, edge: &Edge) -> Result<()>;

    fn load_persisted_data(&self) -> Result<PersistedGraph>;
}

impl<T: PersistenceBackend + ?Sized> PersistenceBackend for Arc<T> {
    fn persist_node(&self, node: &Node) -> Result<()> {
        (**self).persist_node(node)
    }

    fn persist_edge(&self, edge: &Edge) -> Result<()> {
        (**self).persist_edge(edge)
    }

    fn load_persisted_data(&self) -> Result<PersistedGraph> {
        (**self).load_persisted_data()
    }
}

/// Discards writes and loads nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

impl PersistenceBackend for NoopPersistence {
    fn persist_node(&self, _node: &Node) -> Result<()> {
        Ok(())
    }

    fn persist_edge(&self, _edge: &Edge) -> Result<()> {
        Ok(())
    }

    fn load_persisted_data(&self) -> Result<PersistedGraph> {
        Ok(PersistedGraph::default())
    }
}

/// Keeps the latest copy of every entity in memory, in first-write order.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<PersistedGraph>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot, e.g. one captured from another engine.
    pub fn with_snapshot(snapshot: PersistedGraph) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> Result<PersistedGraph> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PersistedGraph>> {
        self.snapshot
            .lock()
            .map_err(|e| GraphError::Persistence(format!("Lock poisoned: {}", e)))
    }
}

impl PersistenceBackend for MemoryPersistence {
    fn persist_node(&self, node: &Node) -> Result<()> {
        let mut snapshot = self.lock()?;
        match snapshot.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node.clone(),
            None => snapshot.nodes.push(node.clone()),
        }
        Ok(())
    }

    fn persist_edge(&self, edge: &Edge) -> Result<()> {
        let mut snapshot = self.lock()?;
        match snapshot.edges.iter_mut().find(|e| e.id == edge.id) {
            Some(existing) => *existing = edge.clone(),
            None => snapshot.edges.push(edge.clone()),
        }
        Ok(())
    }

    fn load_persisted_data(&self) -> Result<PersistedGraph> {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgraph_core::types::{NodeMetadata, NodeProperties, PropertyMap};

    fn node(id: &str, version: u64) -> Node {
        let mut properties = NodeProperties::new(PropertyMap::new());
        properties.version = version;
        Node {
            id: id.to_string(),
            node_type: "concept".to_string(),
            properties,
            embedding: None,
            metadata: NodeMetadata::default(),
        }
    }

    #[test]
    fn test_memory_persistence_upserts_by_id() {
        let backend = MemoryPersistence::new();
        backend.persist_node(&node("a", 1)).unwrap();
        backend.persist_node(&node("b", 1)).unwrap();
        backend.persist_node(&node("a", 2)).unwrap();

        let loaded = backend.load_persisted_data().unwrap();
        assert_eq!(loaded.nodes.len(), 2);
        assert_eq!(loaded.nodes[0].id, "a");
        assert_eq!(loaded.nodes[0].properties.version, 2);
    }

    #[test]
    fn test_noop_loads_nothing() {
        let backend = NoopPersistence;
        backend.persist_node(&node("a", 1)).unwrap();
        assert_eq!(backend.load_persisted_data().unwrap(), PersistedGraph::default());
    }

    #[test]
    fn test_shared_backend_through_arc() {
        let backend = Arc::new(MemoryPersistence::new());
        let shared: Box<dyn PersistenceBackend> = Box::new(Arc::clone(&backend));
        shared.persist_node(&node("a", 1)).unwrap();
        assert_eq!(backend.snapshot().unwrap().nodes.len(), 1);
    }
}

//! Kgraph Engine crate - entity store, indexes, traversal, ranking and cache.
//!
//! Provides the in-memory knowledge graph: a typed node/edge store with
//! secondary indexes, graph algorithms (paths, clustering, PageRank), scored
//! and hybrid search, typed graph queries, a TTL query cache and
//! persistence hooks, all behind the [`KnowledgeGraph`] facade.

pub mod cache;
pub mod engine;
pub mod indexes;
pub mod persistence;
pub mod query;
pub mod search;
pub mod store;
pub mod traversal;

pub use cache::{CacheKey, CacheStats, CanonicalHash, QueryCache};
pub use engine::{GraphStats, GraphStructure, KnowledgeGraph, NodeOptions, StructureOptions};
pub use persistence::{MemoryPersistence, NoopPersistence, PersistedGraph, PersistenceBackend};
pub use query::{GraphQuery, GraphQueryResult, InfluenceScore};
pub use search::{
    EnrichedContext, HybridResult, HybridSearchOptions, ScoredNode, SearchCriteria,
};
pub use traversal::{
    CancelHandle, Cluster, Dependencies, DependencyLink, GraphPath, RelatedNode, ShortestPath,
    TraversalBudget,
};

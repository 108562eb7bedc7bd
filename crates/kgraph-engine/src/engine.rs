//! The `KnowledgeGraph` facade.
//!
//! Store and indexes live together behind one `RwLock`, so an index rebuild
//! is published atomically with respect to every reader and writer. Locks
//! are never held across an `.await`: embeddings are generated before the
//! write lock is taken and persistence hooks run after it is released.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use kgraph_core::config::KgraphConfig;
use kgraph_core::error::{GraphError, Result};
use kgraph_core::types::{text_from_fields, Edge, Node, NodeMetadata, NodeProperties, PropertyMap};
use kgraph_vector::{DynEmbeddingService, EmbeddingService};

use crate::cache::{CacheKey, CacheStats, CanonicalHash, QueryCache};
use crate::indexes::IndexManager;
use crate::persistence::{NoopPersistence, PersistenceBackend};
use crate::query::{GraphQuery, GraphQueryResult};
use crate::search::{
    enrich, HybridQuery, HybridResult, HybridSearchOptions, Ranker, ScoredNode, SearchCriteria,
};
use crate::store::{EdgeInput, EdgeUpsert, EntityStore};
use crate::traversal::{
    CancelHandle, Cluster, Dependencies, GraphPath, RelatedNode, ShortestPath, Traversal,
    TraversalBudget,
};

/// Keys owned by [`NodeProperties`] itself; stripped from caller input.
const RESERVED_PROPERTY_KEYS: [&str; 3] = ["created_at", "updated_at", "version"];

/// Options for [`KnowledgeGraph::add_node`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOptions {
    pub tags: Vec<String>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    /// Caller-supplied vector; skips the embedding service.
    pub embedding: Option<Vec<f32>>,
    pub generate_embedding: bool,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            importance: None,
            confidence: None,
            source: None,
            embedding: None,
            generate_embedding: true,
        }
    }
}

impl NodeOptions {
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn without_embedding(mut self) -> Self {
        self.generate_embedding = false;
        self
    }
}

/// Options for [`KnowledgeGraph::get_graph_structure`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureOptions {
    /// Defaults to the configured node limit.
    pub max_nodes: Option<usize>,
    pub include_embeddings: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStructure {
    pub nodes: Vec<Node>,
    /// Edges whose endpoints are both in `nodes`.
    pub edges: Vec<Edge>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub embedded_nodes: usize,
    pub indexed_types: usize,
    pub indexed_tags: usize,
    pub indexed_tokens: usize,
    pub average_degree: f64,
    pub cache: CacheStats,
}

struct GraphState {
    store: EntityStore,
    indexes: IndexManager,
}

#[derive(Debug, Clone)]
enum CachedResult {
    Search(Vec<ScoredNode>),
    Hybrid(Vec<HybridResult>),
    Graph(GraphQueryResult),
}

/// In-memory knowledge graph engine.
pub struct KnowledgeGraph {
    config: KgraphConfig,
    state: RwLock<GraphState>,
    cache: Mutex<QueryCache<CachedResult>>,
    embedder: Option<Box<dyn DynEmbeddingService>>,
    persistence: Box<dyn PersistenceBackend>,
    cancel: CancelHandle,
    shutting_down: AtomicBool,
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new(KgraphConfig::default())
    }
}

impl KnowledgeGraph {
    /// Create an empty graph without an embedding service or persistence.
    pub fn new(config: KgraphConfig) -> Self {
        let state = GraphState {
            store: EntityStore::new(config.limits.max_nodes, config.limits.max_edges),
            indexes: IndexManager::new(
                config.embedding.text_fields.clone(),
                config.search.min_token_len,
            ),
        };
        let cache = QueryCache::new(Duration::from_millis(config.cache.timeout_ms));

        Self {
            config,
            state: RwLock::new(state),
            cache: Mutex::new(cache),
            embedder: None,
            persistence: Box::new(NoopPersistence),
            cancel: CancelHandle::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn with_embedder(mut self, embedder: impl EmbeddingService + 'static) -> Self {
        self.embedder = Some(Box::new(embedder));
        self
    }

    pub fn with_persistence(mut self, backend: impl PersistenceBackend + 'static) -> Self {
        self.persistence = Box::new(backend);
        self
    }

    pub fn config(&self) -> &KgraphConfig {
        &self.config
    }

    /// Handle that aborts every traversal running at the time of `cancel()`.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Load persisted entities, then rebuild every index.
    ///
    /// Loading works on a copy of the store. The copy and its freshly built
    /// indexes replace the live state only when every entity loaded, so a
    /// failed load leaves the graph as it was.
    pub fn initialize(&self) -> Result<()> {
        let started = Instant::now();
        let persisted = self.persistence.load_persisted_data()?;
        let (mut loaded_nodes, mut loaded_edges) = (0usize, 0usize);

        let mut state = self.write()?;
        let mut staged = state.store.clone();
        for node in persisted.nodes {
            let id = node.id.clone();
            match staged.insert_node(node) {
                Ok(()) => loaded_nodes += 1,
                Err(GraphError::DuplicateNode { .. }) => {
                    warn!(node_id = %id, "Skipping duplicate persisted node");
                }
                Err(e) => {
                    warn!(node_id = %id, error = %e, "Persisted data rejected, graph left unchanged");
                    return Err(e);
                }
            }
        }
        for edge in persisted.edges {
            let id = edge.id.clone();
            match staged.restore_edge(edge) {
                Ok(true) => loaded_edges += 1,
                Ok(false) => debug!(edge_id = %id, "Persisted edge already present"),
                Err(GraphError::MissingNode { id: missing }) => {
                    warn!(edge_id = %id, missing = %missing, "Skipping persisted edge with missing endpoint");
                }
                Err(e) => {
                    warn!(edge_id = %id, error = %e, "Persisted data rejected, graph left unchanged");
                    return Err(e);
                }
            }
        }

        let indexes = IndexManager::build(
            &staged,
            self.config.embedding.text_fields.clone(),
            self.config.search.min_token_len,
        );
        *state = GraphState {
            store: staged,
            indexes,
        };
        info!(
            nodes = loaded_nodes,
            edges = loaded_edges,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Knowledge graph initialized"
        );
        Ok(())
    }

    /// Rebuild every index from the entity store and swap it in.
    pub fn build_indexes(&self) -> Result<()> {
        let started = Instant::now();
        let mut state = self.write()?;
        let fresh = IndexManager::build(
            &state.store,
            self.config.embedding.text_fields.clone(),
            self.config.search.min_token_len,
        );
        state.indexes = fresh;
        info!(
            nodes = state.store.node_count(),
            edges = state.store.edge_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Indexes rebuilt"
        );
        Ok(())
    }

    /// Stop accepting mutations, abort running traversals and drop the cache.
    pub fn shutdown(&self) -> Result<GraphStats> {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        self.clear_cache()?;

        let stats = self.get_stats()?;
        info!(
            nodes = stats.node_count,
            edges = stats.edge_count,
            embedded = stats.embedded_nodes,
            "Knowledge graph shut down"
        );
        Ok(stats)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Add a node. Embedding failures are logged and the node is stored
    /// without a vector.
    pub async fn add_node(
        &self,
        id: &str,
        node_type: &str,
        properties: Value,
        options: NodeOptions,
    ) -> Result<Node> {
        self.ensure_running()?;
        let fields = property_map(properties)?;
        {
            let state = self.read()?;
            state.store.check_node_insert(id)?;
        }

        let embedding = match options.embedding {
            Some(embedding) => Some(embedding),
            None if options.generate_embedding => self.embed_node_text(id, &fields).await,
            None => None,
        };

        let node = Node {
            id: id.to_string(),
            node_type: node_type.to_string(),
            properties: NodeProperties::new(fields),
            embedding,
            metadata: NodeMetadata {
                importance: options.importance.map_or(0.5, |v| v.clamp(0.0, 1.0)),
                confidence: options.confidence.map_or(1.0, |v| v.clamp(0.0, 1.0)),
                tags: options.tags.into_iter().collect(),
                source: options.source.unwrap_or_else(|| "system".to_string()),
                ..NodeMetadata::default()
            },
        };

        {
            let mut guard = self.write()?;
            let state = &mut *guard;
            state.store.insert_node(node.clone())?;
            state.indexes.update_node_indexes(&node);
        }

        self.persist_node(&node);
        debug!(
            node_id = %node.id,
            node_type = %node.node_type,
            embedded = node.embedding.is_some(),
            "Node added"
        );
        Ok(node)
    }

    /// Add an edge, or merge `properties` into the existing edge with the
    /// same `(from_id, to_id, edge_type)`.
    pub fn add_edge(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: &str,
        properties: Value,
    ) -> Result<Edge> {
        self.ensure_running()?;
        let input = EdgeInput::from_value(properties)?;

        let (edge, merged) = {
            let mut guard = self.write()?;
            let state = &mut *guard;
            let outcome = state.store.upsert_edge(from_id, to_id, edge_type, input)?;
            let edge = state
                .store
                .get_edge(outcome.edge_id())
                .cloned()
                .ok_or_else(|| {
                    GraphError::Storage(format!("edge {} vanished after upsert", outcome.edge_id()))
                })?;
            state.indexes.update_edge_indexes(&edge);
            (edge, matches!(outcome, EdgeUpsert::Merged(_)))
        };

        self.persist_edge(&edge);
        debug!(edge_id = %edge.id, merged, "Edge added");
        Ok(edge)
    }

    /// Merge `properties` into a node, bumping its version by one.
    pub fn update_node(&self, id: &str, properties: Value) -> Result<Node> {
        self.ensure_running()?;
        let fields = property_map(properties)?;
        let node = self.modify_node(id, |node| node.properties.merge(fields))?;
        debug!(node_id = %id, version = node.properties.version, "Node updated");
        Ok(node)
    }

    pub fn record_node_access(&self, id: &str) -> Result<Node> {
        self.ensure_running()?;
        let now = Utc::now();
        self.modify_node(id, |node| node.metadata.record_access(now))
    }

    /// Replace the tag set of a node.
    pub fn set_node_tags<I, S>(&self, id: &str, tags: I) -> Result<Node>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_running()?;
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        self.modify_node(id, |node| node.metadata.tags = tags)
    }

    fn modify_node(&self, id: &str, change: impl FnOnce(&mut Node)) -> Result<Node> {
        let node = {
            let mut guard = self.write()?;
            let state = &mut *guard;
            let node = state
                .store
                .get_node_mut(id)
                .ok_or_else(|| GraphError::MissingNode { id: id.to_string() })?;
            change(node);
            let updated = node.clone();
            state.indexes.update_node_indexes(&updated);
            updated
        };
        self.persist_node(&node);
        Ok(node)
    }

    // -------------------------------------------------------------------------
    // Lookups and traversal
    // -------------------------------------------------------------------------

    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        Ok(self.read()?.store.get_node(id).cloned())
    }

    pub fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        Ok(self.read()?.store.get_edge(id).cloned())
    }

    pub fn find_edge(&self, from_id: &str, to_id: &str, edge_type: &str) -> Result<Option<Edge>> {
        Ok(self.read()?.store.find_edge(from_id, to_id, edge_type).cloned())
    }

    pub fn get_neighbors(&self, node_id: &str) -> Result<Vec<String>> {
        self.with_traversal(|t| Ok(t.get_neighbors(node_id)))
    }

    /// Paths from `from_id` to `to_id`; depth and count default to the
    /// traversal configuration.
    pub fn find_paths(
        &self,
        from_id: &str,
        to_id: &str,
        max_depth: Option<usize>,
        max_paths: Option<usize>,
    ) -> Result<Vec<GraphPath>> {
        let max_depth = max_depth.unwrap_or(self.config.traversal.default_max_depth);
        let max_paths = max_paths.unwrap_or(self.config.traversal.default_max_paths);
        self.with_traversal(|t| t.find_paths(from_id, to_id, max_depth, max_paths))
    }

    pub fn find_shortest_path(&self, from_id: &str, to_id: &str) -> Result<Option<ShortestPath>> {
        self.with_traversal(|t| t.find_shortest_path(from_id, to_id))
    }

    pub fn detect_clusters(&self, min_cluster_size: usize) -> Result<Vec<Cluster>> {
        self.with_traversal(|t| t.detect_clusters(min_cluster_size))
    }

    pub fn calculate_page_rank(
        &self,
        damping_factor: Option<f64>,
        iterations: Option<usize>,
    ) -> Result<HashMap<String, f64>> {
        let damping = damping_factor.unwrap_or(self.config.traversal.pagerank_damping);
        let iterations = iterations.unwrap_or(self.config.traversal.pagerank_iterations);
        self.with_traversal(|t| t.calculate_page_rank(damping, iterations))
    }

    pub fn find_related_nodes(
        &self,
        node_id: &str,
        relationship_types: &[String],
        depth: usize,
    ) -> Result<Vec<RelatedNode>> {
        self.with_traversal(|t| t.find_related_nodes(node_id, relationship_types, depth))
    }

    /// Dependencies along `dependency_types`, or the configured types when
    /// the slice is empty.
    pub fn find_dependencies(
        &self,
        node_id: &str,
        dependency_types: &[String],
    ) -> Result<Dependencies> {
        let types = if dependency_types.is_empty() {
            self.config.traversal.dependency_types.as_slice()
        } else {
            dependency_types
        };
        let depth = self.config.traversal.dependency_depth;
        self.with_traversal(|t| t.find_dependencies(node_id, types, depth))
    }

    // -------------------------------------------------------------------------
    // Search and queries
    // -------------------------------------------------------------------------

    /// Filtered, scored node search. Returned nodes have their access
    /// metadata updated unless the result came from the cache.
    pub fn search_nodes(&self, criteria: &SearchCriteria) -> Result<Vec<ScoredNode>> {
        let key = criteria.cache_key();
        if let Some(CachedResult::Search(hit)) = self.cached(&key)? {
            debug!(results = hit.len(), "Node search served from cache");
            return Ok(hit);
        }

        let started = Instant::now();
        let now = Utc::now();
        let mut results = {
            let state = self.read()?;
            Ranker::new(&state.store, &state.indexes, &self.config.search)
                .search_nodes(criteria, now)
        };

        let touched = self.touch(results.iter().map(|r| r.node.id.as_str()), now)?;
        for result in &mut results {
            if let Some(node) = touched.get(&result.node.id) {
                result.node = node.clone();
            }
        }

        debug!(
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Node search"
        );
        self.store_cached(key, CachedResult::Search(results.clone()))?;
        Ok(results)
    }

    /// Vector, keyword and graph relevance fused into one ranking, each
    /// result enriched with its graph context.
    pub async fn hybrid_search(
        &self,
        query: &str,
        options: HybridSearchOptions,
    ) -> Result<Vec<HybridResult>> {
        let key = HybridQuery {
            query,
            options: &options,
        }
        .cache_key();
        if let Some(CachedResult::Hybrid(hit)) = self.cached(&key)? {
            debug!(results = hit.len(), "Hybrid search served from cache");
            return Ok(hit);
        }

        let started = Instant::now();
        let embedding = match &options.embedding {
            Some(embedding) => Some(embedding.clone()),
            None => self.embed_query(query).await,
        };
        let text = options.text.clone().unwrap_or_else(|| query.to_string());
        let search = &self.config.search;
        let top_k = options.top_k.unwrap_or(search.hybrid_top_k);
        let graph_weight = options.graph_weight.unwrap_or(search.graph_weight);
        let vector_weight = options.vector_weight.unwrap_or(search.vector_weight);
        let now = Utc::now();

        let (mut results, graph_hits) = {
            let state = self.read()?;
            let candidates = Ranker::new(&state.store, &state.indexes, search).hybrid_candidates(
                &text,
                embedding.as_deref(),
                top_k,
                graph_weight,
                vector_weight,
                now,
            );

            let budget = self.budget();
            let traversal = Traversal::new(&state.store, &state.indexes, &budget);
            let ranks = traversal.calculate_page_rank(
                self.config.traversal.pagerank_damping,
                self.config.traversal.pagerank_iterations,
            )?;

            let mut results = Vec::with_capacity(candidates.scores.len());
            for (node_id, combined_score) in candidates.scores {
                let Some(node) = state.store.get_node(&node_id) else {
                    continue;
                };
                let context = enrich(
                    &traversal,
                    &state.store,
                    &state.indexes,
                    &node_id,
                    &ranks,
                    self.config.traversal.related_limit,
                )?;
                results.push(HybridResult {
                    node: node.clone(),
                    combined_score,
                    context,
                });
            }
            (results, candidates.graph_hits)
        };

        let touched = self.touch(graph_hits.iter().map(String::as_str), now)?;
        for result in &mut results {
            if let Some(node) = touched.get(&result.node.id) {
                result.node = node.clone();
            }
        }

        debug!(
            results = results.len(),
            embedded_query = embedding.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Hybrid search"
        );
        self.store_cached(key, CachedResult::Hybrid(results.clone()))?;
        Ok(results)
    }

    pub fn execute_graph_query(&self, query: &GraphQuery) -> Result<GraphQueryResult> {
        let key = query.cache_key();
        if let Some(CachedResult::Graph(hit)) = self.cached(&key)? {
            debug!(kind = query.kind(), "Graph query served from cache");
            return Ok(hit);
        }

        let started = Instant::now();
        let result = self.with_traversal(|t| query.execute(t, &self.config.traversal))?;
        debug!(
            kind = query.kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Graph query executed"
        );
        self.store_cached(key, CachedResult::Graph(result.clone()))?;
        Ok(result)
    }

    /// Parse a `{"type": ..., ...}` query object and execute it.
    pub fn execute_graph_query_json(&self, query: &Value) -> Result<GraphQueryResult> {
        let query = GraphQuery::from_json(query)?;
        self.execute_graph_query(&query)
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn get_stats(&self) -> Result<GraphStats> {
        let cache = self.lock_cache()?.stats();
        let state = self.read()?;
        let node_count = state.store.node_count();
        let edge_count = state.store.edge_count();
        let average_degree = if node_count > 0 {
            2.0 * edge_count as f64 / node_count as f64
        } else {
            0.0
        };

        Ok(GraphStats {
            node_count,
            edge_count,
            max_nodes: state.store.max_nodes(),
            max_edges: state.store.max_edges(),
            nodes_by_type: state.indexes.type_histogram().into_iter().collect(),
            embedded_nodes: state.indexes.vector_count(),
            indexed_types: state.indexes.type_count(),
            indexed_tags: state.indexes.tag_count(),
            indexed_tokens: state.indexes.token_count(),
            average_degree,
            cache,
        })
    }

    /// Nodes in insertion order up to the limit, with the edges among them.
    pub fn get_graph_structure(&self, options: StructureOptions) -> Result<GraphStructure> {
        let limit = options.max_nodes.unwrap_or(self.config.limits.max_nodes);
        let state = self.read()?;

        let nodes: Vec<Node> = state
            .store
            .nodes()
            .take(limit)
            .map(|node| {
                let mut node = node.clone();
                if !options.include_embeddings {
                    node.embedding = None;
                }
                node
            })
            .collect();

        let included: HashSet<&str> =
            nodes.iter().map(|n| n.id.as_str()).collect();
        let edges = state
            .store
            .edges()
            .filter(|e| included.contains(e.from_id.as_str()) && included.contains(e.to_id.as_str()))
            .cloned()
            .collect();

        Ok(GraphStructure {
            truncated: state.store.node_count() > nodes.len(),
            nodes,
            edges,
        })
    }

    // -------------------------------------------------------------------------
    // Cache
    // -------------------------------------------------------------------------

    /// Remove expired cache entries; returns how many were dropped.
    pub fn cleanup_cache(&self) -> Result<usize> {
        Ok(self.lock_cache()?.cleanup_expired())
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.lock_cache()?.clear();
        Ok(())
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.lock_cache()?.stats())
    }

    /// Run [`KnowledgeGraph::cleanup_cache`] every `period` until the graph
    /// is dropped or shut down. `None` uses `cache.cleanup_interval_ms`.
    pub fn spawn_cache_sweeper(
        self: &Arc<Self>,
        period: Option<Duration>,
    ) -> tokio::task::JoinHandle<()> {
        let graph = Arc::downgrade(self);
        let period = period
            .unwrap_or_else(|| Duration::from_millis(self.config.cache.cleanup_interval_ms))
            .max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(graph) = graph.upgrade() else {
                    break;
                };
                if graph.is_shutting_down() {
                    break;
                }
                match graph.cleanup_cache() {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "Expired cache entries swept"),
                    Err(e) => warn!(error = %e, "Cache sweep failed"),
                }
            }
            debug!("Cache sweeper stopped");
        })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn read(&self) -> Result<RwLockReadGuard<'_, GraphState>> {
        self.state
            .read()
            .map_err(|e| GraphError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GraphState>> {
        self.state
            .write()
            .map_err(|e| GraphError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, QueryCache<CachedResult>>> {
        self.cache
            .lock()
            .map_err(|e| GraphError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(GraphError::ShuttingDown);
        }
        Ok(())
    }

    fn budget(&self) -> TraversalBudget {
        self.cancel
            .budget(self.config.traversal.timeout_ms.map(Duration::from_millis))
    }

    fn with_traversal<T>(&self, run: impl FnOnce(&Traversal<'_>) -> Result<T>) -> Result<T> {
        let state = self.read()?;
        let budget = self.budget();
        let traversal = Traversal::new(&state.store, &state.indexes, &budget);
        run(&traversal)
    }

    fn cached(&self, key: &CacheKey) -> Result<Option<CachedResult>> {
        if !self.config.cache.enabled {
            return Ok(None);
        }
        Ok(self.lock_cache()?.get(key))
    }

    fn store_cached(&self, key: CacheKey, value: CachedResult) -> Result<()> {
        if self.config.cache.enabled {
            self.lock_cache()?.insert(key, value);
        }
        Ok(())
    }

    /// Record an access on every listed node; returns the updated copies.
    fn touch<'a>(
        &self,
        ids: impl Iterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, Node>> {
        let mut state = self.write()?;
        let mut touched = HashMap::new();
        for id in ids {
            if let Some(node) = state.store.get_node_mut(id) {
                node.metadata.record_access(now);
                touched.insert(id.to_string(), node.clone());
            }
        }
        Ok(touched)
    }

    async fn embed_node_text(&self, node_id: &str, fields: &PropertyMap) -> Option<Vec<f32>> {
        if !self.config.embedding.enabled {
            return None;
        }
        let embedder = self.embedder.as_ref()?;
        let text = text_from_fields(fields, &self.config.embedding.text_fields);
        if text.trim().is_empty() {
            return None;
        }
        let text: String = text.chars().take(self.config.embedding.max_text_chars).collect();

        match embedder.embed_boxed(&text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Embedding generation failed; storing node without vector");
                None
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        if !self.config.embedding.enabled || query.trim().is_empty() {
            return None;
        }
        let embedder = self.embedder.as_ref()?;
        let text: String = query.chars().take(self.config.embedding.max_text_chars).collect();
        match embedder.embed_boxed(&text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Query embedding failed; continuing without vector signal");
                None
            }
        }
    }

    fn persist_node(&self, node: &Node) {
        if let Err(e) = self.persistence.persist_node(node) {
            warn!(node_id = %node.id, error = %e, "Failed to persist node");
        }
    }

    fn persist_edge(&self, edge: &Edge) {
        if let Err(e) = self.persistence.persist_edge(edge) {
            warn!(edge_id = %edge.id, error = %e, "Failed to persist edge");
        }
    }
}

/// Caller-supplied node properties as a map, minus the keys the engine owns.
fn property_map(value: Value) -> Result<PropertyMap> {
    let mut fields: PropertyMap = match value {
        Value::Null => PropertyMap::new(),
        Value::Object(map) => map.into_iter().collect(),
        other => {
            return Err(GraphError::InvalidInput(format!(
                "node properties must be an object, got {}",
                other
            )))
        }
    };
    for key in RESERVED_PROPERTY_KEYS {
        fields.remove(key);
    }
    Ok(fields)
}

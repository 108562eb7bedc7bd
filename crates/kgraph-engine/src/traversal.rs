//! Graph algorithms over the entity store and its adjacency lists.
//!
//! Every algorithm runs to completion on the calling thread. Long walks are
//! bounded by a [`TraversalBudget`], which can carry a wall-clock deadline
//! and observes cancellation requested through a [`CancelHandle`].
//!
//! BFS-style searches (`find_paths`, `find_related_nodes`) share a single
//! visited set across the whole search: once a node has been expanded it is
//! never expanded again through a different route.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use kgraph_core::error::{GraphError, Result};
use kgraph_core::types::{Edge, Node};

use crate::indexes::IndexManager;
use crate::store::EntityStore;

// =============================================================================
// Cancellation
// =============================================================================

/// Aborts every traversal that started before [`CancelHandle::cancel`] was
/// called. Traversals started afterwards are unaffected.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    epoch: Arc<AtomicU64>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// A budget tied to this handle, optionally bounded by `timeout`.
    pub fn budget(&self, timeout: Option<Duration>) -> TraversalBudget {
        TraversalBudget {
            deadline: timeout.map(|t| Instant::now() + t),
            cancel: Some((Arc::clone(&self.epoch), self.epoch.load(Ordering::SeqCst))),
        }
    }
}

/// Execution bound checked inside traversal loops.
#[derive(Debug, Clone, Default)]
pub struct TraversalBudget {
    deadline: Option<Instant>,
    cancel: Option<(Arc<AtomicU64>, u64)>,
}

impl TraversalBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    pub fn check(&self) -> Result<()> {
        if let Some((epoch, started)) = &self.cancel {
            if epoch.load(Ordering::SeqCst) != *started {
                return Err(GraphError::TraversalAborted("cancelled".to_string()));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(GraphError::TraversalAborted("deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Results
// =============================================================================

/// A walk through the graph: `nodes[i]` and `nodes[i + 1]` are joined by
/// `edges[i]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphPath {
    pub nodes: Vec<String>,
    pub edges: Vec<String>,
}

impl GraphPath {
    fn start(node_id: &str) -> Self {
        Self {
            nodes: vec![node_id.to_string()],
            edges: Vec::new(),
        }
    }

    fn extended(&self, edge_id: &str, node_id: &str) -> Self {
        let mut next = self.clone();
        next.edges.push(edge_id.to_string());
        next.nodes.push(node_id.to_string());
        next
    }

    /// Number of hops.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn last(&self) -> &str {
        self.nodes.last().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortestPath {
    pub path: Vec<String>,
    pub distance: f64,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: String,
    pub node_ids: Vec<String>,
    pub size: usize,
    pub dominant_type: String,
    pub density: f64,
}

/// A node reached from the search origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedNode {
    pub node_id: String,
    /// Node the edge was followed from.
    pub via: String,
    pub edge_id: String,
    pub relationship: String,
    /// Hops from the origin, starting at 1.
    pub distance: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyLink {
    pub node_id: String,
    pub edge_id: String,
    pub edge_type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Dependencies {
    pub direct: Vec<DependencyLink>,
    pub indirect: Vec<RelatedNode>,
    /// Cycles starting and ending at the queried node.
    pub circular: Vec<GraphPath>,
}

// =============================================================================
// Traversal
// =============================================================================

pub struct Traversal<'a> {
    store: &'a EntityStore,
    indexes: &'a IndexManager,
    budget: &'a TraversalBudget,
}

impl<'a> Traversal<'a> {
    pub fn new(
        store: &'a EntityStore,
        indexes: &'a IndexManager,
        budget: &'a TraversalBudget,
    ) -> Self {
        Self {
            store,
            indexes,
            budget,
        }
    }

    /// Edges that can be walked away from `node_id`, paired with the node on
    /// the other side. Outbound edges come first.
    pub fn neighbor_edges(&self, node_id: &str) -> Vec<(&'a Edge, &'a str)> {
        let mut result = Vec::new();
        for edge_id in self.indexes.out_edges(node_id) {
            if let Some(edge) = self.store.get_edge(edge_id) {
                result.push((edge, edge.to_id.as_str()));
            }
        }
        for edge_id in self.indexes.in_edges(node_id) {
            if let Some(edge) = self.store.get_edge(edge_id) {
                // Self-loops were already yielded as outbound.
                if edge.from_id != node_id && edge.properties.direction.is_reversible() {
                    result.push((edge, edge.from_id.as_str()));
                }
            }
        }
        result
    }

    /// Outbound targets plus the sources of inbound non-directed edges,
    /// without duplicates.
    pub fn get_neighbors(&self, node_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.neighbor_edges(node_id)
            .into_iter()
            .filter(|(_, other)| seen.insert(*other))
            .map(|(_, other)| other.to_string())
            .collect()
    }

    /// Breadth-first enumeration of paths from `from_id` to `to_id`.
    pub fn find_paths(
        &self,
        from_id: &str,
        to_id: &str,
        max_depth: usize,
        max_paths: usize,
    ) -> Result<Vec<GraphPath>> {
        let mut paths = Vec::new();
        if max_paths == 0 || !self.store.contains_node(from_id) || !self.store.contains_node(to_id)
        {
            return Ok(paths);
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::from([GraphPath::start(from_id)]);

        while let Some(path) = queue.pop_front() {
            self.budget.check()?;
            let current = path.last().to_string();

            if current == to_id {
                paths.push(path);
                if paths.len() >= max_paths {
                    break;
                }
                continue;
            }
            if !visited.insert(current.clone()) || path.len() >= max_depth {
                continue;
            }

            for (edge, next) in self.neighbor_edges(&current) {
                if !visited.contains(next) && !path.nodes.iter().any(|n| n == next) {
                    queue.push_back(path.extended(&edge.id, next));
                }
            }
        }

        Ok(paths)
    }

    /// Dijkstra over edge weights with a linear scan of the frontier.
    pub fn find_shortest_path(&self, from_id: &str, to_id: &str) -> Result<Option<ShortestPath>> {
        let (Some(from), Some(_)) = (self.store.get_node(from_id), self.store.get_node(to_id))
        else {
            return Ok(None);
        };
        if from_id == to_id {
            return Ok(Some(ShortestPath {
                path: vec![from_id.to_string()],
                distance: 0.0,
                nodes: vec![from.clone()],
            }));
        }

        let mut dist: HashMap<&str, f64> = HashMap::from([(from_id, 0.0)]);
        let mut prev: HashMap<&str, &str> = HashMap::new();
        let mut settled: HashSet<&str> = HashSet::new();
        let mut frontier: Vec<&str> = vec![self.node_key(from_id)];

        while !frontier.is_empty() {
            self.budget.check()?;

            let mut best = 0;
            for (i, candidate) in frontier.iter().enumerate() {
                if dist[candidate] < dist[frontier[best]] {
                    best = i;
                }
            }
            let current = frontier.swap_remove(best);
            if current == to_id {
                break;
            }
            settled.insert(current);

            let base = dist[current];
            for (edge, next) in self.neighbor_edges(current) {
                if settled.contains(next) {
                    continue;
                }
                let candidate = base + edge.properties.weight;
                let improved = dist.get(next).map_or(true, |d| candidate < *d);
                if improved {
                    if !dist.contains_key(next) {
                        frontier.push(next);
                    }
                    dist.insert(next, candidate);
                    prev.insert(next, current);
                }
            }
        }

        let Some(&distance) = dist.get(to_id) else {
            return Ok(None);
        };

        let mut path = vec![to_id.to_string()];
        let mut cursor = to_id;
        while let Some(&p) = prev.get(cursor) {
            path.push(p.to_string());
            cursor = p;
        }
        path.reverse();

        let nodes = path
            .iter()
            .filter_map(|id| self.store.get_node(id).cloned())
            .collect();
        Ok(Some(ShortestPath {
            path,
            distance,
            nodes,
        }))
    }

    /// Connected components of at least `min_cluster_size` nodes, largest
    /// first. Adjacency is the same as [`Traversal::get_neighbors`].
    pub fn detect_clusters(&self, min_cluster_size: usize) -> Result<Vec<Cluster>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut clusters = Vec::new();

        for start in self.store.node_ids() {
            if visited.contains(start.as_str()) {
                continue;
            }

            let mut component: Vec<&str> = Vec::new();
            let mut stack = vec![start.as_str()];
            while let Some(node_id) = stack.pop() {
                self.budget.check()?;
                if !visited.insert(node_id) {
                    continue;
                }
                component.push(node_id);
                for (_, next) in self.neighbor_edges(node_id) {
                    if !visited.contains(next) {
                        stack.push(next);
                    }
                }
            }

            if component.len() >= min_cluster_size.max(1) {
                clusters.push(self.describe_cluster(clusters.len(), &component));
            }
        }

        clusters.sort_by(|a, b| b.size.cmp(&a.size));
        Ok(clusters)
    }

    fn describe_cluster(&self, index: usize, members: &[&str]) -> Cluster {
        let member_set: HashSet<&str> = members.iter().copied().collect();

        let mut type_votes: BTreeMap<&str, usize> = BTreeMap::new();
        let mut internal_edges = 0usize;
        for node_id in members {
            if let Some(node) = self.store.get_node(node_id) {
                *type_votes.entry(node.node_type.as_str()).or_insert(0) += 1;
            }
            internal_edges += self
                .indexes
                .out_edges(node_id)
                .iter()
                .filter_map(|e| self.store.get_edge(e))
                .filter(|e| member_set.contains(e.to_id.as_str()))
                .count();
        }

        // Plurality vote; ties go to the alphabetically first type.
        let mut dominant_type = String::new();
        let mut best_votes = 0;
        for (node_type, votes) in type_votes {
            if votes > best_votes {
                best_votes = votes;
                dominant_type = node_type.to_string();
            }
        }

        let n = members.len();
        let density = if n > 1 {
            (2 * internal_edges) as f64 / (n * (n - 1)) as f64
        } else {
            0.0
        };

        Cluster {
            id: format!("cluster_{}", index),
            node_ids: members.iter().map(|s| s.to_string()).collect(),
            size: n,
            dominant_type,
            density,
        }
    }

    /// Power-iteration PageRank over outbound edges, for exactly
    /// `iterations` rounds. Rank held by nodes without outbound edges is
    /// spread evenly so scores keep summing to 1.
    pub fn calculate_page_rank(
        &self,
        damping_factor: f64,
        iterations: usize,
    ) -> Result<HashMap<String, f64>> {
        let ids = self.store.node_ids();
        let n = ids.len();
        if n == 0 {
            return Ok(HashMap::new());
        }

        let position: HashMap<&str, usize> =
            ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        let targets: Vec<Vec<usize>> = ids
            .iter()
            .map(|id| {
                self.indexes
                    .out_edges(id)
                    .iter()
                    .filter_map(|e| self.store.get_edge(e))
                    .filter_map(|e| position.get(e.to_id.as_str()).copied())
                    .collect()
            })
            .collect();

        let base = (1.0 - damping_factor) / n as f64;
        let mut ranks = vec![1.0 / n as f64; n];

        for _ in 0..iterations {
            self.budget.check()?;

            let mut next = vec![base; n];
            let mut dangling = 0.0;
            for (u, outs) in targets.iter().enumerate() {
                if outs.is_empty() {
                    dangling += ranks[u];
                    continue;
                }
                let share = damping_factor * ranks[u] / outs.len() as f64;
                for &v in outs {
                    next[v] += share;
                }
            }
            let spread = damping_factor * dangling / n as f64;
            for rank in &mut next {
                *rank += spread;
            }
            ranks = next;
        }

        Ok(ids.iter().cloned().zip(ranks).collect())
    }

    /// Breadth-first collection of nodes up to `depth` hops away, following
    /// only edges whose type is listed (any type when the list is empty).
    pub fn find_related_nodes(
        &self,
        node_id: &str,
        relationship_types: &[String],
        depth: usize,
    ) -> Result<Vec<RelatedNode>> {
        let mut related = Vec::new();
        if !self.store.contains_node(node_id) {
            return Ok(related);
        }

        let mut visited: HashSet<&str> = HashSet::from([self.node_key(node_id)]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(self.node_key(node_id), 0)]);

        while let Some((current, distance)) = queue.pop_front() {
            self.budget.check()?;
            if distance >= depth {
                continue;
            }
            for (edge, next) in self.neighbor_edges(current) {
                if !relationship_types.is_empty()
                    && !relationship_types.iter().any(|t| *t == edge.edge_type)
                {
                    continue;
                }
                if !visited.insert(next) {
                    continue;
                }
                related.push(RelatedNode {
                    node_id: next.to_string(),
                    via: current.to_string(),
                    edge_id: edge.id.clone(),
                    relationship: edge.edge_type.clone(),
                    distance: distance + 1,
                });
                queue.push_back((next, distance + 1));
            }
        }

        Ok(related)
    }

    /// Direct, indirect and circular dependencies of `node_id` along edges
    /// of the given types.
    pub fn find_dependencies(
        &self,
        node_id: &str,
        dependency_types: &[String],
        max_depth: usize,
    ) -> Result<Dependencies> {
        let mut deps = Dependencies::default();
        if !self.store.contains_node(node_id) {
            return Ok(deps);
        }

        let is_dependency =
            |t: &str| dependency_types.is_empty() || dependency_types.iter().any(|d| d == t);

        for edge_id in self.indexes.out_edges(node_id) {
            let Some(edge) = self.store.get_edge(edge_id) else {
                continue;
            };
            if !is_dependency(edge.edge_type.as_str()) {
                continue;
            }
            deps.direct.push(DependencyLink {
                node_id: edge.to_id.clone(),
                edge_id: edge.id.clone(),
                edge_type: edge.edge_type.clone(),
            });

            if let Some(back) = self
                .find_paths(&edge.to_id, node_id, max_depth, 1)?
                .into_iter()
                .next()
            {
                let mut cycle = GraphPath::start(node_id).extended(&edge.id, &edge.to_id);
                cycle.nodes.extend(back.nodes.into_iter().skip(1));
                cycle.edges.extend(back.edges);
                deps.circular.push(cycle);
            }
        }

        deps.indirect = self
            .find_related_nodes(node_id, dependency_types, max_depth)?
            .into_iter()
            .filter(|r| r.distance > 1)
            .collect();

        Ok(deps)
    }

    /// Borrow `node_id` from the store so it lives as long as the traversal.
    fn node_key(&self, node_id: &str) -> &'a str {
        self.store
            .get_node(node_id)
            .map(|n| n.id.as_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EdgeInput;
    use kgraph_core::types::{EdgeDirection, NodeMetadata, NodeProperties, PropertyMap};

    struct Fixture {
        store: EntityStore,
        indexes: IndexManager,
        budget: TraversalBudget,
    }

    impl Fixture {
        fn new(nodes: &[(&str, &str)]) -> Self {
            let mut store = EntityStore::new(1000, 1000);
            for (id, node_type) in nodes {
                store
                    .insert_node(Node {
                        id: id.to_string(),
                        node_type: node_type.to_string(),
                        properties: NodeProperties::new(PropertyMap::new()),
                        embedding: None,
                        metadata: NodeMetadata::default(),
                    })
                    .unwrap();
            }
            let indexes = IndexManager::new(Vec::new(), 3);
            let mut fixture = Self {
                store,
                indexes,
                budget: TraversalBudget::unbounded(),
            };
            fixture.reindex();
            fixture
        }

        fn edge(&mut self, from: &str, to: &str, edge_type: &str, weight: f64) -> &mut Self {
            self.edge_with(from, to, edge_type, weight, EdgeDirection::Directed)
        }

        fn edge_with(
            &mut self,
            from: &str,
            to: &str,
            edge_type: &str,
            weight: f64,
            direction: EdgeDirection,
        ) -> &mut Self {
            let input = EdgeInput {
                weight: Some(weight),
                direction: Some(direction),
                ..EdgeInput::default()
            };
            self.store.upsert_edge(from, to, edge_type, input).unwrap();
            self.reindex();
            self
        }

        fn reindex(&mut self) {
            self.indexes = IndexManager::build(&self.store, Vec::new(), 3);
        }

        fn traversal(&self) -> Traversal<'_> {
            Traversal::new(&self.store, &self.indexes, &self.budget)
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_neighbors_respect_direction() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("c", "t")]);
        f.edge("a", "b", "links", 1.0);
        f.edge_with("c", "a", "peer", 1.0, EdgeDirection::Undirected);

        assert_eq!(f.traversal().get_neighbors("a"), ids(&["b", "c"]));
        assert!(f.traversal().get_neighbors("b").is_empty());
        assert_eq!(f.traversal().get_neighbors("c"), ids(&["a"]));
        assert!(f.traversal().get_neighbors("missing").is_empty());
    }

    #[test]
    fn test_find_paths_shared_visited_set() {
        // Diamond: a -> b -> d and a -> c -> d.
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("c", "t"), ("d", "t")]);
        f.edge("a", "b", "x", 1.0)
            .edge("a", "c", "x", 1.0)
            .edge("b", "d", "x", 1.0)
            .edge("c", "d", "x", 1.0);

        let paths = f.traversal().find_paths("a", "d", 5, 10).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].nodes, ids(&["a", "b", "d"]));
        assert_eq!(paths[1].nodes, ids(&["a", "c", "d"]));

        let limited = f.traversal().find_paths("a", "d", 5, 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_find_paths_visited_blocks_longer_routes() {
        // a -> b -> c and a -> c -> ... c is expanded once, so the route
        // through b never reaches e a second time.
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("c", "t"), ("e", "t")]);
        f.edge("a", "c", "x", 1.0)
            .edge("a", "b", "x", 1.0)
            .edge("b", "c", "x", 1.0)
            .edge("c", "e", "x", 1.0);

        let paths = f.traversal().find_paths("a", "e", 5, 10).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].nodes, ids(&["a", "c", "e"]));
    }

    #[test]
    fn test_find_paths_depth_bound_and_missing_nodes() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("c", "t")]);
        f.edge("a", "b", "x", 1.0).edge("b", "c", "x", 1.0);

        assert!(f.traversal().find_paths("a", "c", 1, 10).unwrap().is_empty());
        assert_eq!(f.traversal().find_paths("a", "c", 2, 10).unwrap().len(), 1);
        assert!(f.traversal().find_paths("a", "zz", 5, 10).unwrap().is_empty());
    }

    #[test]
    fn test_shortest_path_prefers_lighter_route() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("c", "t")]);
        f.edge("a", "c", "x", 5.0)
            .edge("a", "b", "x", 1.0)
            .edge("b", "c", "x", 1.5);

        let sp = f.traversal().find_shortest_path("a", "c").unwrap().unwrap();
        assert_eq!(sp.path, ids(&["a", "b", "c"]));
        assert!((sp.distance - 2.5).abs() < 1e-9);
        assert_eq!(sp.nodes.len(), 3);
    }

    #[test]
    fn test_shortest_path_self_and_unreachable() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t")]);
        f.edge("b", "a", "x", 1.0);

        let same = f.traversal().find_shortest_path("a", "a").unwrap().unwrap();
        assert_eq!(same.path, ids(&["a"]));
        assert_eq!(same.distance, 0.0);

        assert!(f.traversal().find_shortest_path("a", "b").unwrap().is_none());
        assert!(f.traversal().find_shortest_path("a", "nope").unwrap().is_none());
    }

    #[test]
    fn test_shortest_path_zero_weight_edges() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("c", "t")]);
        f.edge("a", "b", "x", 0.0).edge("b", "c", "x", 0.0);
        let sp = f.traversal().find_shortest_path("a", "c").unwrap().unwrap();
        assert_eq!(sp.distance, 0.0);
        assert_eq!(sp.path.len(), 3);
    }

    #[test]
    fn test_detect_clusters_min_size() {
        let mut f = Fixture::new(&[
            ("a", "concept"),
            ("b", "concept"),
            ("c", "task"),
            ("d", "concept"),
            ("e", "agent"),
            ("f", "agent"),
        ]);
        f.edge("a", "b", "x", 1.0)
            .edge("b", "c", "x", 1.0)
            .edge("c", "d", "x", 1.0)
            .edge("e", "f", "x", 1.0);

        let clusters = f.traversal().detect_clusters(3).unwrap();
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.size, 4);
        assert_eq!(cluster.dominant_type, "concept");
        // 3 edges among 4 nodes: 2 * 3 / (4 * 3).
        assert!((cluster.density - 0.5).abs() < 1e-9);

        let all = f.traversal().detect_clusters(1).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].size, 2);
        assert!((all[1].density - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_singleton_cluster_density_is_zero() {
        let f = Fixture::new(&[("solo", "t")]);
        let clusters = f.traversal().detect_clusters(1).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].density, 0.0);
    }

    #[test]
    fn test_page_rank_cycle_is_uniform() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("c", "t")]);
        f.edge("a", "b", "x", 1.0)
            .edge("b", "c", "x", 1.0)
            .edge("c", "a", "x", 1.0);

        let ranks = f.traversal().calculate_page_rank(0.85, 20).unwrap();
        for id in ["a", "b", "c"] {
            assert!((ranks[id] - 1.0 / 3.0).abs() < 1e-6, "{} = {}", id, ranks[id]);
        }
    }

    #[test]
    fn test_page_rank_sums_to_one_with_sink() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("hub", "t")]);
        f.edge("a", "hub", "x", 1.0).edge("b", "hub", "x", 1.0);

        let ranks = f.traversal().calculate_page_rank(0.85, 20).unwrap();
        let total: f64 = ranks.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(ranks["hub"] > ranks["a"]);
        assert!((ranks["a"] - ranks["b"]).abs() < 1e-12);
    }

    #[test]
    fn test_page_rank_empty_graph() {
        let f = Fixture::new(&[]);
        assert!(f.traversal().calculate_page_rank(0.85, 20).unwrap().is_empty());
    }

    #[test]
    fn test_find_related_nodes_depth_and_types() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t"), ("c", "t"), ("d", "t")]);
        f.edge("a", "b", "uses", 1.0)
            .edge("b", "c", "uses", 1.0)
            .edge("a", "d", "mentions", 1.0);

        let all = f.traversal().find_related_nodes("a", &[], 2).unwrap();
        let found: Vec<(&str, usize)> = all
            .iter()
            .map(|r| (r.node_id.as_str(), r.distance))
            .collect();
        assert_eq!(found, vec![("b", 1), ("d", 1), ("c", 2)]);
        assert_eq!(all[2].via, "b");

        let uses = f
            .traversal()
            .find_related_nodes("a", &ids(&["uses"]), 1)
            .unwrap();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].relationship, "uses");

        assert!(f.traversal().find_related_nodes("zz", &[], 3).unwrap().is_empty());
    }

    #[test]
    fn test_find_dependencies_with_cycle() {
        let mut f = Fixture::new(&[("app", "t"), ("lib", "t"), ("core", "t"), ("doc", "t")]);
        f.edge("app", "lib", "depends_on", 1.0)
            .edge("lib", "core", "depends_on", 1.0)
            .edge("core", "app", "depends_on", 1.0)
            .edge("app", "doc", "mentions", 1.0);

        let deps = f
            .traversal()
            .find_dependencies("app", &ids(&["depends_on"]), 5)
            .unwrap();

        assert_eq!(deps.direct.len(), 1);
        assert_eq!(deps.direct[0].node_id, "lib");
        assert_eq!(deps.indirect.len(), 1);
        assert_eq!(deps.indirect[0].node_id, "core");
        assert_eq!(deps.circular.len(), 1);
        assert_eq!(deps.circular[0].nodes, ids(&["app", "lib", "core", "app"]));
        assert_eq!(deps.circular[0].len(), 3);
    }

    #[test]
    fn test_cancelled_budget_aborts() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t")]);
        f.edge("a", "b", "x", 1.0);

        let handle = CancelHandle::new();
        let budget = handle.budget(None);
        handle.cancel();
        let traversal = Traversal::new(&f.store, &f.indexes, &budget);
        let err = traversal.calculate_page_rank(0.85, 20).unwrap_err();
        assert!(matches!(err, GraphError::TraversalAborted(_)));

        // Budgets created after the cancel are unaffected.
        let fresh = handle.budget(None);
        let traversal = Traversal::new(&f.store, &f.indexes, &fresh);
        assert!(traversal.find_paths("a", "b", 3, 3).is_ok());
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let mut f = Fixture::new(&[("a", "t"), ("b", "t")]);
        f.edge("a", "b", "x", 1.0);
        let budget = TraversalBudget::with_timeout(Duration::ZERO);
        let traversal = Traversal::new(&f.store, &f.indexes, &budget);
        assert!(matches!(
            traversal.find_shortest_path("a", "b"),
            Err(GraphError::TraversalAborted(_))
        ));
    }
}

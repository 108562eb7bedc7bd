//! Scored retrieval: filtered node search and hybrid ranking fusion.

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kgraph_core::config::SearchConfig;
use kgraph_core::error::Result;
use kgraph_core::types::{Edge, Node, PropertyMap};
use kgraph_vector::cosine_similarity;

use crate::cache::{hash_f32_slice, hash_f64, hash_value, CanonicalHash};
use crate::indexes::IndexManager;
use crate::store::EntityStore;
use crate::traversal::{RelatedNode, Traversal};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Filters for [`Ranker::search_nodes`]. Every provided filter must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    /// Nodes must carry all of these.
    pub tags: Vec<String>,
    /// Nodes must contain at least one token of this text.
    pub text: Option<String>,
    /// Query vector. Scores results; filters only with `min_similarity`.
    pub embedding: Option<Vec<f32>>,
    pub min_similarity: Option<f64>,
    /// Exact-match property filters.
    pub properties: PropertyMap,
    pub limit: Option<usize>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl CanonicalHash for SearchCriteria {
    fn canonical_hash<H: Hasher>(&self, state: &mut H) {
        "search_nodes".hash(state);
        self.node_type.hash(state);
        // Tag filters are set semantics.
        let tags: BTreeSet<&String> = self.tags.iter().collect();
        tags.hash(state);
        self.text.hash(state);
        match &self.embedding {
            Some(e) => {
                true.hash(state);
                hash_f32_slice(e, state);
            }
            None => false.hash(state),
        }
        match self.min_similarity {
            Some(m) => {
                true.hash(state);
                hash_f64(m, state);
            }
            None => false.hash(state),
        }
        self.properties.len().hash(state);
        for (key, value) in &self.properties {
            key.hash(state);
            hash_value(value, state);
        }
        self.limit.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredNode {
    pub node: Node,
    pub relevance_score: f64,
    /// Cosine similarity to the query embedding, when one was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// Options for hybrid search. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchOptions {
    /// Query vector; generated from the query text when absent.
    pub embedding: Option<Vec<f32>>,
    /// Keyword text; the query string is used when absent.
    pub text: Option<String>,
    pub top_k: Option<usize>,
    pub graph_weight: Option<f64>,
    pub vector_weight: Option<f64>,
}

/// Cache identity of a hybrid search call.
pub struct HybridQuery<'a> {
    pub query: &'a str,
    pub options: &'a HybridSearchOptions,
}

impl CanonicalHash for HybridQuery<'_> {
    fn canonical_hash<H: Hasher>(&self, state: &mut H) {
        "hybrid_search".hash(state);
        self.query.hash(state);
        let options = self.options;
        match &options.embedding {
            Some(e) => {
                true.hash(state);
                hash_f32_slice(e, state);
            }
            None => false.hash(state),
        }
        options.text.hash(state);
        options.top_k.hash(state);
        for weight in [options.graph_weight, options.vector_weight] {
            match weight {
                Some(w) => {
                    true.hash(state);
                    hash_f64(w, state);
                }
                None => false.hash(state),
            }
        }
    }
}

/// Graph surroundings attached to every hybrid search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedContext {
    pub outgoing_edges: Vec<Edge>,
    pub incoming_edges: Vec<Edge>,
    pub related: Vec<RelatedNode>,
    /// PageRank score of the node.
    pub influence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridResult {
    pub node: Node,
    pub combined_score: f64,
    pub context: EnrichedContext,
}

/// Fused scores before enrichment, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HybridCandidates {
    pub scores: Vec<(String, f64)>,
    /// Nodes returned by the graph signal; their access metadata is updated.
    pub graph_hits: Vec<String>,
}

pub struct Ranker<'a> {
    store: &'a EntityStore,
    indexes: &'a IndexManager,
    config: &'a SearchConfig,
}

impl<'a> Ranker<'a> {
    pub fn new(store: &'a EntityStore, indexes: &'a IndexManager, config: &'a SearchConfig) -> Self {
        Self {
            store,
            indexes,
            config,
        }
    }

    /// Score every node that satisfies `criteria`, best first, truncated to
    /// the criteria limit. Access metadata is left untouched.
    pub fn search_nodes(&self, criteria: &SearchCriteria, now: DateTime<Utc>) -> Vec<ScoredNode> {
        let limit = criteria.limit.unwrap_or(self.config.default_limit);

        let mut results: Vec<ScoredNode> = match self.candidate_ids(criteria) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.store.get_node(id))
                .filter_map(|node| self.score(node, criteria, now))
                .collect(),
            None => self
                .store
                .nodes()
                .filter_map(|node| self.score(node, criteria, now))
                .collect(),
        };

        results.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        results.truncate(limit);
        results
    }

    /// Intersection of the index-backed filters, or `None` when no such
    /// filter applies.
    fn candidate_ids(&self, criteria: &SearchCriteria) -> Option<BTreeSet<String>> {
        let mut sets: Vec<BTreeSet<String>> = Vec::new();
        if let Some(node_type) = &criteria.node_type {
            sets.push(self.indexes.nodes_of_type(node_type));
        }
        if !criteria.tags.is_empty() {
            sets.push(self.indexes.nodes_with_all_tags(&criteria.tags));
        }
        if let Some(text) = &criteria.text {
            let tokens = self.indexes.tokenize(text);
            if !tokens.is_empty() {
                sets.push(self.indexes.nodes_with_any_token(&tokens));
            }
        }

        let mut iter = sets.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, set| acc.intersection(&set).cloned().collect()))
    }

    fn score(&self, node: &Node, criteria: &SearchCriteria, now: DateTime<Utc>) -> Option<ScoredNode> {
        let properties_match = criteria
            .properties
            .iter()
            .all(|(k, v)| node.properties.fields.get(k) == Some(v));
        if !properties_match {
            return None;
        }

        let similarity = criteria.embedding.as_ref().map(|query| {
            node.embedding
                .as_ref()
                .map(|e| cosine_similarity(query, e))
                .unwrap_or(0.0)
        });
        if let (Some(sim), Some(min)) = (similarity, criteria.min_similarity) {
            if sim < min {
                return None;
            }
        }

        let semantic_blend = similarity.map(|s| 0.3 + 0.7 * s).unwrap_or(1.0);
        let relevance_score = node.metadata.importance
            * node.metadata.confidence
            * self.recency_factor(node, now)
            * semantic_blend;

        Some(ScoredNode {
            node: node.clone(),
            relevance_score,
            similarity,
        })
    }

    fn recency_factor(&self, node: &Node, now: DateTime<Utc>) -> f64 {
        match node.metadata.last_accessed {
            Some(at) => {
                let days = (now - at).num_milliseconds().max(0) as f64 / MS_PER_DAY;
                (-days / self.config.recency_decay_days)
                    .exp()
                    .max(self.config.min_recency_factor)
            }
            None => 1.0,
        }
    }

    /// Fuse vector, keyword and graph relevance into one score per node.
    ///
    /// Each signal fetches `2 * top_k` candidates. Scores add up: vector
    /// similarity times `vector_weight`, a fixed keyword bonus of
    /// `text_match_score * vector_weight`, and graph relevance times
    /// `graph_weight`.
    pub fn hybrid_candidates(
        &self,
        text: &str,
        embedding: Option<&[f32]>,
        top_k: usize,
        graph_weight: f64,
        vector_weight: f64,
        now: DateTime<Utc>,
    ) -> HybridCandidates {
        let fetch = top_k.saturating_mul(2);
        let mut combined: HashMap<String, f64> = HashMap::new();

        if let Some(query) = embedding {
            for hit in self.indexes.vector_search(query, fetch) {
                *combined.entry(hit.node_id).or_insert(0.0) += hit.score * vector_weight;
            }
        }

        let tokens = self.indexes.tokenize(text);
        for (node_id, _) in self.indexes.text_search(&tokens, fetch) {
            *combined.entry(node_id).or_insert(0.0) += self.config.text_match_score * vector_weight;
        }

        let criteria = SearchCriteria {
            text: Some(text.to_string()),
            embedding: embedding.map(<[f32]>::to_vec),
            limit: Some(fetch),
            ..SearchCriteria::default()
        };
        let graph = self.search_nodes(&criteria, now);
        let graph_hits: Vec<String> = graph.iter().map(|s| s.node.id.clone()).collect();
        for scored in graph {
            *combined.entry(scored.node.id).or_insert(0.0) += scored.relevance_score * graph_weight;
        }

        let mut scores: Vec<(String, f64)> = combined.into_iter().collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scores.truncate(top_k);

        HybridCandidates { scores, graph_hits }
    }
}

/// Adjacent edges, nearby entities and influence of `node_id`.
pub fn enrich(
    traversal: &Traversal<'_>,
    store: &EntityStore,
    indexes: &IndexManager,
    node_id: &str,
    ranks: &HashMap<String, f64>,
    related_limit: usize,
) -> Result<EnrichedContext> {
    let collect = |ids: &[String]| -> Vec<Edge> {
        ids.iter()
            .filter_map(|id| store.get_edge(id).cloned())
            .collect()
    };

    let mut related = traversal.find_related_nodes(node_id, &[], 2)?;
    related.truncate(related_limit);

    Ok(EnrichedContext {
        outgoing_edges: collect(indexes.out_edges(node_id)),
        incoming_edges: collect(indexes.in_edges(node_id)),
        related,
        influence: ranks.get(node_id).copied().unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EdgeInput;
    use crate::traversal::TraversalBudget;
    use chrono::Duration;
    use kgraph_core::types::{NodeMetadata, NodeProperties};
    use serde_json::json;

    fn node(id: &str, node_type: &str, name: &str, tags: &[&str]) -> Node {
        let props: PropertyMap = serde_json::from_value(json!({ "name": name })).unwrap();
        Node {
            id: id.to_string(),
            node_type: node_type.to_string(),
            properties: NodeProperties::new(props),
            embedding: None,
            metadata: NodeMetadata {
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..NodeMetadata::default()
            },
        }
    }

    fn build(nodes: Vec<Node>) -> (EntityStore, IndexManager) {
        let mut store = EntityStore::new(100, 100);
        for n in nodes {
            store.insert_node(n).unwrap();
        }
        let indexes = IndexManager::build(&store, vec!["name".to_string()], 3);
        (store, indexes)
    }

    #[test]
    fn test_filters_combine_with_and() {
        let (store, indexes) = build(vec![
            node("a", "concept", "graph search", &["x", "y"]),
            node("b", "concept", "graph theory", &["x"]),
            node("c", "task", "graph chores", &["x", "y"]),
        ]);
        let config = SearchConfig::default();
        let ranker = Ranker::new(&store, &indexes, &config);

        let criteria = SearchCriteria::new()
            .with_type("concept")
            .with_tags(["x", "y"])
            .with_text("graph");
        let hits = ranker.search_nodes(&criteria, Utc::now());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.id, "a");

        let tagged = ranker.search_nodes(&SearchCriteria::new().with_tags(["x", "y"]), Utc::now());
        let ids: Vec<&str> = tagged.iter().map(|s| s.node.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_property_filter_and_limit() {
        let mut a = node("a", "doc", "alpha", &[]);
        a.properties.fields.insert("lang".into(), json!("rust"));
        let (store, indexes) = build(vec![a, node("b", "doc", "beta", &[])]);
        let config = SearchConfig::default();
        let ranker = Ranker::new(&store, &indexes, &config);

        let hits = ranker.search_nodes(
            &SearchCriteria::new().with_property("lang", json!("rust")),
            Utc::now(),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.id, "a");

        let limited = ranker.search_nodes(&SearchCriteria::new().with_limit(1), Utc::now());
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_stopword_only_text_is_ignored() {
        let (store, indexes) = build(vec![node("a", "doc", "alpha", &[])]);
        let config = SearchConfig::default();
        let ranker = Ranker::new(&store, &indexes, &config);
        let hits = ranker.search_nodes(&SearchCriteria::new().with_text("an"), Utc::now());
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_relevance_formula() {
        let now = Utc::now();
        let mut a = node("a", "doc", "alpha", &[]);
        a.metadata.importance = 0.8;
        a.metadata.confidence = 0.5;
        a.metadata.last_accessed = Some(now - Duration::days(30));
        a.embedding = Some(vec![1.0, 0.0]);
        let (store, indexes) = build(vec![a]);
        let config = SearchConfig::default();
        let ranker = Ranker::new(&store, &indexes, &config);

        let hits = ranker.search_nodes(&SearchCriteria::new().with_embedding(vec![1.0, 0.0]), now);
        let expected = 0.8 * 0.5 * (-1.0f64).exp() * 1.0;
        assert!((hits[0].relevance_score - expected).abs() < 1e-9);
        assert_eq!(hits[0].similarity, Some(1.0));
    }

    #[test]
    fn test_recency_factor_floor() {
        let now = Utc::now();
        let mut a = node("a", "doc", "alpha", &[]);
        a.metadata.importance = 1.0;
        a.metadata.last_accessed = Some(now - Duration::days(3650));
        let (store, indexes) = build(vec![a]);
        let config = SearchConfig::default();
        let ranker = Ranker::new(&store, &indexes, &config);

        let hits = ranker.search_nodes(&SearchCriteria::new(), now);
        assert!((hits[0].relevance_score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_min_similarity_filters() {
        let mut a = node("a", "doc", "alpha", &[]);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = node("b", "doc", "beta", &[]);
        b.embedding = Some(vec![0.0, 1.0]);
        let (store, indexes) = build(vec![a, b, node("c", "doc", "gamma", &[])]);
        let config = SearchConfig::default();
        let ranker = Ranker::new(&store, &indexes, &config);

        let mut criteria = SearchCriteria::new().with_embedding(vec![1.0, 0.0]);
        assert_eq!(ranker.search_nodes(&criteria, Utc::now()).len(), 3);

        criteria.min_similarity = Some(0.5);
        let hits = ranker.search_nodes(&criteria, Utc::now());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.id, "a");
    }

    #[test]
    fn test_hybrid_rewards_both_signals() {
        let mut both = node("both", "doc", "alpha", &[]);
        both.embedding = Some(vec![1.0, 0.0]);
        let mut text_only = node("text", "doc", "alpha", &[]);
        text_only.embedding = Some(vec![0.0, 1.0]);
        let mut vector_only = node("vector", "doc", "zeta", &[]);
        vector_only.embedding = Some(vec![1.0, 0.0]);
        let (store, indexes) = build(vec![both, text_only, vector_only]);
        let config = SearchConfig::default();
        let ranker = Ranker::new(&store, &indexes, &config);

        let fused = ranker.hybrid_candidates("alpha", Some(&[1.0, 0.0]), 10, 0.3, 0.7, Utc::now());
        assert_eq!(fused.scores[0].0, "both");
        assert_eq!(fused.scores.len(), 3);
        assert_eq!(fused.graph_hits, vec!["both".to_string(), "text".to_string()]);
    }

    #[test]
    fn test_criteria_cache_key_ignores_tag_order() {
        let a = SearchCriteria::new().with_tags(["x", "y"]).with_text("alpha");
        let b = SearchCriteria::new().with_tags(["y", "x"]).with_text("alpha");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), a.clone().with_limit(3).cache_key());
    }

    #[test]
    fn test_enrich_collects_edges_and_influence() {
        let (mut store, _) = build(vec![node("a", "t", "alpha", &[]), node("b", "t", "beta", &[])]);
        store.upsert_edge("a", "b", "links", EdgeInput::default()).unwrap();
        let indexes = IndexManager::build(&store, vec!["name".to_string()], 3);
        let budget = TraversalBudget::unbounded();
        let traversal = Traversal::new(&store, &indexes, &budget);
        let ranks = HashMap::from([("a".to_string(), 0.4)]);

        let ctx = enrich(&traversal, &store, &indexes, "a", &ranks, 5).unwrap();
        assert_eq!(ctx.outgoing_edges.len(), 1);
        assert!(ctx.incoming_edges.is_empty());
        assert_eq!(ctx.related.len(), 1);
        assert_eq!(ctx.influence, 0.4);
    }
}

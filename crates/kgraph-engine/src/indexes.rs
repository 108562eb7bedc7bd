//! Secondary indices derived from the entity store.
//!
//! The index manager only holds node and edge ids; the entity store keeps
//! ownership of every entity. All indices can be rebuilt from the store
//! with [`IndexManager::build`].

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use kgraph_core::types::{Edge, Node};
use kgraph_vector::{FlatVectorIndex, VectorHit};

use crate::store::EntityStore;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("Invalid non-word regex"));

/// Lowercase `text`, strip non-word characters, split on whitespace and
/// drop tokens shorter than `min_len` characters. Duplicates are removed,
/// first occurrence wins.
pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lowered, "");
    let mut seen = BTreeSet::new();
    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= min_len)
        .filter(|t| seen.insert(t.to_string()))
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone)]
pub struct IndexManager {
    text_fields: Vec<String>,
    min_token_len: usize,
    by_type: HashMap<String, BTreeSet<String>>,
    by_tag: HashMap<String, BTreeSet<String>>,
    by_token: HashMap<String, BTreeSet<String>>,
    // What each node was last indexed under, so re-indexing can retract it.
    node_tokens: HashMap<String, BTreeSet<String>>,
    node_tags: HashMap<String, BTreeSet<String>>,
    vectors: FlatVectorIndex,
    out_edges: HashMap<String, Vec<String>>,
    in_edges: HashMap<String, Vec<String>>,
}

impl IndexManager {
    pub fn new(text_fields: Vec<String>, min_token_len: usize) -> Self {
        Self {
            text_fields,
            min_token_len,
            by_type: HashMap::new(),
            by_tag: HashMap::new(),
            by_token: HashMap::new(),
            node_tokens: HashMap::new(),
            node_tags: HashMap::new(),
            vectors: FlatVectorIndex::new(),
            out_edges: HashMap::new(),
            in_edges: HashMap::new(),
        }
    }

    /// Build a complete index set from the current contents of `store`.
    pub fn build(store: &EntityStore, text_fields: Vec<String>, min_token_len: usize) -> Self {
        let mut indexes = Self::new(text_fields, min_token_len);
        for node in store.nodes() {
            indexes.update_node_indexes(node);
        }
        for edge in store.edges() {
            indexes.update_edge_indexes(edge);
        }
        indexes
    }

    /// Index (or re-index) a node under its type, tags, text tokens and
    /// embedding.
    pub fn update_node_indexes(&mut self, node: &Node) {
        self.by_type
            .entry(node.node_type.clone())
            .or_default()
            .insert(node.id.clone());

        if let Some(old_tags) = self.node_tags.remove(&node.id) {
            for tag in old_tags {
                remove_from(&mut self.by_tag, &tag, &node.id);
            }
        }
        for tag in &node.metadata.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(node.id.clone());
        }
        self.node_tags
            .insert(node.id.clone(), node.metadata.tags.clone());

        if let Some(old_tokens) = self.node_tokens.remove(&node.id) {
            for token in old_tokens {
                remove_from(&mut self.by_token, &token, &node.id);
            }
        }
        let tokens: BTreeSet<String> =
            tokenize(&node.text_content(&self.text_fields), self.min_token_len)
                .into_iter()
                .collect();
        for token in &tokens {
            self.by_token
                .entry(token.clone())
                .or_default()
                .insert(node.id.clone());
        }
        self.node_tokens.insert(node.id.clone(), tokens);

        if let Some(embedding) = &node.embedding {
            self.vectors.upsert(&node.id, embedding.clone());
        }
    }

    /// Register an edge in the adjacency lists. Idempotent.
    pub fn update_edge_indexes(&mut self, edge: &Edge) {
        push_unique(&mut self.out_edges, &edge.from_id, &edge.id);
        push_unique(&mut self.in_edges, &edge.to_id, &edge.id);
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        tokenize(text, self.min_token_len)
    }

    pub fn nodes_of_type(&self, node_type: &str) -> BTreeSet<String> {
        self.by_type.get(node_type).cloned().unwrap_or_default()
    }

    /// Nodes carrying every tag in `tags`.
    pub fn nodes_with_all_tags(&self, tags: &[String]) -> BTreeSet<String> {
        let mut result: Option<BTreeSet<String>> = None;
        for tag in tags {
            let ids = self.by_tag.get(tag).cloned().unwrap_or_default();
            result = Some(match result {
                None => ids,
                Some(acc) => acc.intersection(&ids).cloned().collect(),
            });
            if result.as_ref().is_some_and(|r| r.is_empty()) {
                break;
            }
        }
        result.unwrap_or_default()
    }

    /// Nodes containing at least one of `tokens`.
    pub fn nodes_with_any_token(&self, tokens: &[String]) -> BTreeSet<String> {
        tokens
            .iter()
            .filter_map(|t| self.by_token.get(t))
            .flat_map(|ids| ids.iter().cloned())
            .collect()
    }

    /// Rank nodes by how many of `tokens` they contain. Best first, ties by id.
    pub fn text_search(&self, tokens: &[String], limit: usize) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for token in tokens {
            if let Some(ids) = self.by_token.get(token) {
                for id in ids {
                    *counts.entry(id.as_str()).or_insert(0) += 1;
                }
            }
        }
        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(id, count)| (id.to_string(), count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    pub fn vector_search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        self.vectors.search(query, k)
    }

    pub fn out_edges(&self, node_id: &str) -> &[String] {
        self.out_edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_edges(&self, node_id: &str) -> &[String] {
        self.in_edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn type_count(&self) -> usize {
        self.by_type.len()
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn token_count(&self) -> usize {
        self.by_token.len()
    }

    pub fn vector_count(&self) -> usize {
        self.vectors.len()
    }

    /// Node count per type, sorted by type name.
    pub fn type_histogram(&self) -> Vec<(String, usize)> {
        let mut histogram: Vec<(String, usize)> = self
            .by_type
            .iter()
            .map(|(t, ids)| (t.clone(), ids.len()))
            .collect();
        histogram.sort();
        histogram
    }
}

fn remove_from(index: &mut HashMap<String, BTreeSet<String>>, key: &str, node_id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(node_id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn push_unique(index: &mut HashMap<String, Vec<String>>, node_id: &str, edge_id: &str) {
    let list = index.entry(node_id.to_string()).or_default();
    if !list.iter().any(|e| e == edge_id) {
        list.push(edge_id.to_string());
    }
}

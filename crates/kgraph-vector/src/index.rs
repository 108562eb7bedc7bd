//! Flat vector index with brute-force cosine similarity search.
//!
//! Every search is a linear scan. At the size of a single-process knowledge
//! base this is fast enough and keeps results exact.

use std::collections::HashMap;

use tracing::debug;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// The id of the node owning the matching vector.
    pub node_id: String,
    /// Cosine similarity score in [-1, 1].
    pub score: f64,
}

#[derive(Debug, Clone)]
struct VectorEntry {
    node_id: String,
    embedding: Vec<f32>,
}

/// In-memory list of `{node_id, embedding}` pairs.
///
/// The index keeps its own copy of each vector; the owning node's embedding
/// stays with the node. Synchronisation is the caller's concern.
#[derive(Debug, Clone, Default)]
pub struct FlatVectorIndex {
    entries: Vec<VectorEntry>,
    /// Node id -> position in `entries`.
    positions: HashMap<String, usize>,
}

impl FlatVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vector, replacing any existing entry for the same node.
    pub fn upsert(&mut self, node_id: &str, embedding: Vec<f32>) {
        if let Some(&pos) = self.positions.get(node_id) {
            self.entries[pos].embedding = embedding;
            return;
        }
        self.positions.insert(node_id.to_string(), self.entries.len());
        self.entries.push(VectorEntry {
            node_id: node_id.to_string(),
            embedding,
        });
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.positions.contains_key(node_id)
    }

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// Ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        let mut scored: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|entry| VectorHit {
                node_id: entry.node_id.clone(),
                score: cosine_similarity(query, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        debug!(candidates = self.entries.len(), returned = scored.len(), "Vector scan");
        scored
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_search() {
        let mut index = FlatVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0, 0.0]);
        index.upsert("b", vec![0.0, 1.0, 0.0]);
        index.upsert("c", vec![0.9, 0.1, 0.0]);

        let hits = index.search(&[1.0, 0.0, 0.0], 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].node_id, "a");
        assert_eq!(hits[1].node_id, "c");
        assert_eq!(hits[2].node_id, "b");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_upsert_replaces_existing_entry() {
        let mut index = FlatVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0]);
        index.upsert("a", vec![0.0, 1.0]);
        assert_eq!(index.len(), 1);

        let hits = index.search(&[0.0, 1.0], 1);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_upsert_keeps_position_of_replaced_entry() {
        let mut index = FlatVectorIndex::new();
        for i in 0..1_000 {
            index.upsert(&format!("n{}", i), vec![1.0, 0.0]);
        }
        index.upsert("n500", vec![0.0, 1.0]);
        index.upsert("n0", vec![1.0, 0.0]);
        assert_eq!(index.len(), 1_000);
        assert!(index.contains("n999"));
        assert!(!index.contains("n1000"));

        let hits = index.search(&[0.0, 1.0], 1);
        assert_eq!(hits[0].node_id, "n500");

        // Equal scores keep insertion order, so a replaced entry does not move.
        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits[0].node_id, "n0");
        assert_eq!(hits[1].node_id, "n1");

        index.clear();
        assert!(!index.contains("n0"));
        index.upsert("n0", vec![1.0]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_search_respects_k_and_empty_index() {
        let mut index = FlatVectorIndex::new();
        assert!(index.search(&[1.0], 5).is_empty());

        for i in 0..10 {
            index.upsert(&format!("n{}", i), vec![1.0, i as f32]);
        }
        assert_eq!(index.search(&[1.0, 0.0], 3).len(), 3);

        index.clear();
        assert!(index.is_empty());
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}

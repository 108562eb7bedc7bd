//! Kgraph Vector crate - embedding service seam and flat cosine index.
//!
//! Provides the trait through which the engine reaches an external
//! embedding model, a deterministic mock implementation for testing, and the
//! linear-scan vector index used for similarity lookups.

pub mod embedding;
pub mod index;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding};
pub use index::{cosine_similarity, FlatVectorIndex, VectorHit};

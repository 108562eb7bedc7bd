use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GraphError, Result};

/// Top-level configuration for a knowledge graph engine instance.
///
/// Every section falls back to its defaults, so a partial TOML file (or none
/// at all) yields a usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KgraphConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub traversal: TraversalConfig,
}

impl KgraphConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KgraphConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| GraphError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Hard capacity limits. These are the only backpressure the engine applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_nodes: 100_000,
            max_edges: 500_000,
        }
    }
}

/// Embedding generation at node-creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Whether nodes are embedded on creation when a service is attached.
    pub enabled: bool,
    /// Property keys whose string values are concatenated into the text
    /// that gets embedded and tokenized.
    pub text_fields: Vec<String>,
    /// Maximum number of characters sent to the embedding service.
    pub max_text_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            text_fields: ["name", "description", "content", "title", "summary"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_text_chars: 1000,
        }
    }
}

/// Ranking and hybrid search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default result limit for `search_nodes`.
    pub default_limit: usize,
    /// Default `top_k` for hybrid search.
    pub hybrid_top_k: usize,
    /// Default weight of the graph relevance signal.
    pub graph_weight: f64,
    /// Default weight of the vector similarity signal.
    pub vector_weight: f64,
    /// Fixed contribution of a text match, multiplied by the vector weight.
    pub text_match_score: f64,
    /// Decay constant (in days) of the recency factor.
    pub recency_decay_days: f64,
    /// Floor of the recency factor.
    pub min_recency_factor: f64,
    /// Tokens shorter than this are dropped from the inverted index.
    pub min_token_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            hybrid_top_k: 10,
            graph_weight: 0.3,
            vector_weight: 0.7,
            text_match_score: 0.8,
            recency_decay_days: 30.0,
            min_recency_factor: 0.1,
            min_token_len: 3,
        }
    }
}

/// Query result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entries older than this are treated as misses.
    pub timeout_ms: u64,
    /// Period of the background sweeper, when one is spawned.
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 300_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Graph algorithm defaults and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub default_max_depth: usize,
    pub default_max_paths: usize,
    /// Wall-clock bound for a single traversal call. `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub pagerank_damping: f64,
    pub pagerank_iterations: usize,
    /// Number of related entities attached to each hybrid search result.
    pub related_limit: usize,
    /// Edge types treated as dependencies when a query names none.
    pub dependency_types: Vec<String>,
    /// Hop limit when collecting indirect dependencies.
    pub dependency_depth: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_max_depth: 5,
            default_max_paths: 10,
            timeout_ms: None,
            pagerank_damping: 0.85,
            pagerank_iterations: 20,
            related_limit: 5,
            dependency_types: ["depends_on", "requires", "uses", "imports"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dependency_depth: 3,
        }
    }
}

//! Typed graph queries and their dispatch onto the traversal engine.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kgraph_core::config::TraversalConfig;
use kgraph_core::error::{GraphError, Result};

use crate::cache::{hash_f64, CanonicalHash};
use crate::traversal::{Cluster, Dependencies, RelatedNode, ShortestPath, Traversal};

const DEFAULT_RELATED_DEPTH: usize = 2;
const DEFAULT_INFLUENCE_TOP_N: usize = 10;

fn default_min_cluster_size() -> usize {
    3
}

/// One variant per supported query `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphQuery {
    FindRelated {
        node_id: String,
        #[serde(default)]
        relationship_types: Vec<String>,
        #[serde(default)]
        depth: Option<usize>,
    },
    AnalyzeInfluence {
        /// Report these nodes; the `top_n` most influential when empty.
        #[serde(default)]
        node_ids: Vec<String>,
        #[serde(default)]
        top_n: Option<usize>,
        #[serde(default)]
        damping_factor: Option<f64>,
        #[serde(default)]
        iterations: Option<usize>,
    },
    DetectClusters {
        #[serde(default = "default_min_cluster_size")]
        min_cluster_size: usize,
    },
    FindDependencies {
        node_id: String,
        /// Falls back to the configured dependency types when empty.
        #[serde(default)]
        dependency_types: Vec<String>,
    },
    ShortestPath {
        from_id: String,
        to_id: String,
    },
}

impl GraphQuery {
    pub const KINDS: [&'static str; 5] = [
        "find_related",
        "analyze_influence",
        "detect_clusters",
        "find_dependencies",
        "shortest_path",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FindRelated { .. } => "find_related",
            Self::AnalyzeInfluence { .. } => "analyze_influence",
            Self::DetectClusters { .. } => "detect_clusters",
            Self::FindDependencies { .. } => "find_dependencies",
            Self::ShortestPath { .. } => "shortest_path",
        }
    }

    /// Parse a `{"type": ..., ...}` object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::InvalidInput("query needs a string \"type\" field".into()))?;

        if !Self::KINDS.contains(&kind) {
            return Err(GraphError::UnknownQueryType(kind.to_string()));
        }

        serde_json::from_value(value.clone())
            .map_err(|e| GraphError::InvalidInput(format!("malformed {} query: {}", kind, e)))
    }

    pub fn execute(
        &self,
        traversal: &Traversal<'_>,
        config: &TraversalConfig,
    ) -> Result<GraphQueryResult> {
        match self {
            Self::FindRelated {
                node_id,
                relationship_types,
                depth,
            } => {
                let related = traversal.find_related_nodes(
                    node_id,
                    relationship_types,
                    depth.unwrap_or(DEFAULT_RELATED_DEPTH),
                )?;
                Ok(GraphQueryResult::FindRelated {
                    node_id: node_id.clone(),
                    related,
                })
            }
            Self::AnalyzeInfluence {
                node_ids,
                top_n,
                damping_factor,
                iterations,
            } => {
                let ranks = traversal.calculate_page_rank(
                    damping_factor.unwrap_or(config.pagerank_damping),
                    iterations.unwrap_or(config.pagerank_iterations),
                )?;

                let mut scores: Vec<InfluenceScore> = if node_ids.is_empty() {
                    ranks
                        .into_iter()
                        .map(|(node_id, score)| InfluenceScore { node_id, score })
                        .collect()
                } else {
                    node_ids
                        .iter()
                        .filter_map(|id| {
                            ranks.get(id).map(|score| InfluenceScore {
                                node_id: id.clone(),
                                score: *score,
                            })
                        })
                        .collect()
                };
                scores.sort_by(|a, b| {
                    b.score
                        .total_cmp(&a.score)
                        .then_with(|| a.node_id.cmp(&b.node_id))
                });
                if node_ids.is_empty() {
                    scores.truncate(top_n.unwrap_or(DEFAULT_INFLUENCE_TOP_N));
                }
                Ok(GraphQueryResult::AnalyzeInfluence { scores })
            }
            Self::DetectClusters { min_cluster_size } => Ok(GraphQueryResult::DetectClusters {
                clusters: traversal.detect_clusters(*min_cluster_size)?,
            }),
            Self::FindDependencies {
                node_id,
                dependency_types,
            } => {
                let types = if dependency_types.is_empty() {
                    &config.dependency_types
                } else {
                    dependency_types
                };
                let dependencies =
                    traversal.find_dependencies(node_id, types, config.dependency_depth)?;
                Ok(GraphQueryResult::FindDependencies {
                    node_id: node_id.clone(),
                    dependencies,
                })
            }
            Self::ShortestPath { from_id, to_id } => Ok(GraphQueryResult::ShortestPath {
                path: traversal.find_shortest_path(from_id, to_id)?,
            }),
        }
    }
}

impl CanonicalHash for GraphQuery {
    fn canonical_hash<H: Hasher>(&self, state: &mut H) {
        "graph_query".hash(state);
        self.kind().hash(state);
        match self {
            Self::FindRelated {
                node_id,
                relationship_types,
                depth,
            } => {
                node_id.hash(state);
                relationship_types.hash(state);
                depth.hash(state);
            }
            Self::AnalyzeInfluence {
                node_ids,
                top_n,
                damping_factor,
                iterations,
            } => {
                node_ids.hash(state);
                top_n.hash(state);
                match damping_factor {
                    Some(d) => {
                        true.hash(state);
                        hash_f64(*d, state);
                    }
                    None => false.hash(state),
                }
                iterations.hash(state);
            }
            Self::DetectClusters { min_cluster_size } => min_cluster_size.hash(state),
            Self::FindDependencies {
                node_id,
                dependency_types,
            } => {
                node_id.hash(state);
                dependency_types.hash(state);
            }
            Self::ShortestPath { from_id, to_id } => {
                from_id.hash(state);
                to_id.hash(state);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfluenceScore {
    pub node_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphQueryResult {
    FindRelated {
        node_id: String,
        related: Vec<RelatedNode>,
    },
    AnalyzeInfluence {
        scores: Vec<InfluenceScore>,
    },
    DetectClusters {
        clusters: Vec<Cluster>,
    },
    FindDependencies {
        node_id: String,
        dependencies: Dependencies,
    },
    ShortestPath {
        path: Option<ShortestPath>,
    },
}

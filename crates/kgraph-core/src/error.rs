use thiserror::Error;

/// Top-level error type for the knowledge graph engine.
///
/// Contract violations (duplicate ids, missing endpoints, capacity) are
/// surfaced to the caller as-is; nothing in the engine retries them.
/// "Not found" results from graph algorithms are expressed as `None` or an
/// empty collection instead of an error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GraphError {
    #[error("Node already exists: {id}")]
    DuplicateNode { id: String },

    #[error("Capacity exceeded: {kind} limit of {limit} reached")]
    CapacityExceeded { kind: &'static str, limit: usize },

    #[error("Node not found: {id}")]
    MissingNode { id: String },

    #[error("Unknown query type: {0}")]
    UnknownQueryType(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Traversal aborted: {0}")]
    TraversalAborted(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for GraphError {
    fn from(err: toml::de::Error) -> Self {
        GraphError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for GraphError {
    fn from(err: toml::ser::Error) -> Self {
        GraphError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

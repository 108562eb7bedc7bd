pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::KgraphConfig;
pub use error::{GraphError, Result};
pub use types::*;

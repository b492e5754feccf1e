pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::{AiConfig, AppConfig, DetectionConfig, SimilarityConfig};
pub use error::{CoreError, Result};
pub use models::*;

pub use storage::connection_cache::ConnectionCache;
pub use storage::database::{open_database, open_in_memory, ConnectionPool, Database};
pub use storage::quality_reader::QualityReader;
pub use storage::repositories::{fold_name, BenchmarkStore, SessionStore};

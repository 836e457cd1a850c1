pub mod cli;
pub mod config;
pub mod db;
pub mod distance;
pub mod error;
pub mod fingerprint;
pub mod indexer;
mod metrics;
pub mod oracle;
pub mod searcher;
mod server;
pub mod utils;

pub use config::{IndexerConfig, Opts, PrunePolicy, SearchConfig};
pub use db::{IndexStats, IndexStore};
pub use error::{FaceSearchError, Result};
pub use fingerprint::{Fingerprint, FingerprintMode, fingerprint};
pub use indexer::{IncrementalIndexer, IndexEvent, IndexingStats};
pub use oracle::{BoundingBox, CommandOracle, DetectedFace, Embedding, EmbeddingOracle};
pub use searcher::{SearchEngine, SearchMatch};

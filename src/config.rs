//! Configuration and environment-based component factory
//!
//! [`AggregationConfig`] holds the tunables of an aggregation. The
//! [`ComponentFactory`] builds chunk storage and metadata stores from
//! environment variables so the same binary can run against memory or a local
//! directory.

use crate::metadata::{LocalMetadataStore, MetadataStore};
use crate::storage::{ChunkStorage, MemoryChunkStorage, ObjectStoreChunkStorage};
use crate::{Error, Result};
use object_store::{local::LocalFileSystem, memory::InMemory, ObjectStore};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Aggregation tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Rows per chunk, also the target size for consolidation
    pub chunk_size: usize,
    /// Records held in memory by the external sorter before spilling
    pub sorter_items_in_memory: usize,
    /// Write buffer size of sorter spill files in bytes
    pub sorter_block_size: usize,
    /// Upper bound of chunks merged by one consolidation
    pub max_chunks_to_consolidate: usize,
    /// Older catalogs are reloaded in full instead of incrementally
    pub max_incremental_reload_period: Duration,
    /// Chunk writes allowed in flight during ingestion
    pub max_in_flight_writes: usize,
    /// Skip chunks that fail to read instead of failing the query
    pub ignore_chunk_reading_errors: bool,
    /// Directory for sorter spill files (system temp dir when unset)
    pub sort_dir: Option<PathBuf>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000_000,
            sorter_items_in_memory: 1_000_000,
            sorter_block_size: 256 * 1024,
            max_chunks_to_consolidate: 1_000,
            max_incremental_reload_period: Duration::from_secs(10 * 60),
            max_in_flight_writes: 2,
            ignore_chunk_reading_errors: false,
            sort_dir: None,
        }
    }
}

impl AggregationConfig {
    /// Defaults overridden by `ROLLUP_*` environment variables
    ///
    /// Environment variables:
    /// - ROLLUP_CHUNK_SIZE
    /// - ROLLUP_SORTER_ITEMS_IN_MEMORY
    /// - ROLLUP_SORTER_BLOCK_SIZE
    /// - ROLLUP_MAX_CHUNKS_TO_CONSOLIDATE
    /// - ROLLUP_MAX_INCREMENTAL_RELOAD_SECS
    /// - ROLLUP_MAX_IN_FLIGHT_WRITES
    /// - ROLLUP_IGNORE_CHUNK_READING_ERRORS ("true"/"1")
    /// - ROLLUP_SORT_DIR
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AggregationConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse(&lookup, "ROLLUP_CHUNK_SIZE")? {
            config.chunk_size = v;
        }
        if let Some(v) = parse(&lookup, "ROLLUP_SORTER_ITEMS_IN_MEMORY")? {
            config.sorter_items_in_memory = v;
        }
        if let Some(v) = parse(&lookup, "ROLLUP_SORTER_BLOCK_SIZE")? {
            config.sorter_block_size = v;
        }
        if let Some(v) = parse(&lookup, "ROLLUP_MAX_CHUNKS_TO_CONSOLIDATE")? {
            config.max_chunks_to_consolidate = v;
        }
        if let Some(secs) = parse(&lookup, "ROLLUP_MAX_INCREMENTAL_RELOAD_SECS")? {
            config.max_incremental_reload_period = Duration::from_secs(secs);
        }
        if let Some(v) = parse(&lookup, "ROLLUP_MAX_IN_FLIGHT_WRITES")? {
            config.max_in_flight_writes = v;
        }
        if let Some(value) = lookup("ROLLUP_IGNORE_CHUNK_READING_ERRORS") {
            let value = value.trim();
            config.ignore_chunk_reading_errors = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Some(dir) = lookup("ROLLUP_SORT_DIR") {
            config.sort_dir = Some(PathBuf::from(dir));
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject sizes of zero
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("chunk_size", self.chunk_size),
            ("sorter_items_in_memory", self.sorter_items_in_memory),
            ("sorter_block_size", self.sorter_block_size),
            ("max_chunks_to_consolidate", self.max_chunks_to_consolidate),
            ("max_in_flight_writes", self.max_in_flight_writes),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {}='{}': {}", name, raw, e))),
    }
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create object store from environment
    ///
    /// Environment variables:
    /// - STORAGE_BACKEND: "memory" (default) or "local"
    /// - ROLLUP_DATA_DIR: directory for the local backend (required for local)
    pub fn create_object_store() -> Result<Arc<dyn ObjectStore>> {
        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "memory".to_string());

        match backend.as_str() {
            "memory" => {
                info!("Using in-memory object store (development mode)");
                Ok(Arc::new(InMemory::new()))
            }
            "local" => {
                let dir = std::env::var("ROLLUP_DATA_DIR").map_err(|_| {
                    Error::Config("ROLLUP_DATA_DIR required when STORAGE_BACKEND=local".to_string())
                })?;
                std::fs::create_dir_all(&dir)?;
                info!(dir = %dir, "Using local file system object store");
                Ok(Arc::new(LocalFileSystem::new_with_prefix(&dir)?))
            }
            _ => Err(Error::Config(format!(
                "Unknown STORAGE_BACKEND: {}. Use 'memory' or 'local'",
                backend
            ))),
        }
    }

    /// Create chunk storage from environment
    ///
    /// Environment variables:
    /// - STORAGE_BACKEND: "memory" keeps chunks in process; "local" stores
    ///   them through [`ComponentFactory::create_object_store`]
    /// - ROLLUP_CHUNK_PREFIX: object prefix of chunk files (default: chunks)
    pub async fn create_chunk_storage() -> Result<Arc<dyn ChunkStorage>> {
        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "memory".to_string());
        if backend == "memory" {
            info!("Using in-memory chunk storage");
            return Ok(Arc::new(MemoryChunkStorage::new()));
        }

        let store = Self::create_object_store()?;
        let prefix = std::env::var("ROLLUP_CHUNK_PREFIX").unwrap_or_else(|_| "chunks".to_string());
        Ok(Arc::new(ObjectStoreChunkStorage::open(store, prefix).await?))
    }

    /// Create metadata store from environment
    ///
    /// Environment variables:
    /// - METADATA_BACKEND: "local" (default)
    pub fn create_metadata_store() -> Result<Arc<dyn MetadataStore>> {
        let backend = std::env::var("METADATA_BACKEND").unwrap_or_else(|_| "local".to_string());

        match backend.as_str() {
            "local" => {
                info!("Using LocalMetadataStore (single process)");
                Ok(Arc::new(LocalMetadataStore::new()))
            }
            _ => Err(Error::Config(format!(
                "Unknown METADATA_BACKEND: {}. Use 'local'",
                backend
            ))),
        }
    }
}

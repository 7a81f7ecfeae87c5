//! # RollupDB
//!
//! An embeddable aggregation engine that keeps pre-aggregated rows in
//! immutable, key-sorted chunks.
//!
//! Rows are grouped by an ordered primary key and combined with per-measure
//! reducers (sum, min, max, count) on the way in. Chunks cover contiguous
//! primary-key ranges; a range index per key prefix answers which chunks a
//! query must read, and background consolidation merges overlapping chunks to
//! keep that number small.
//!
//! ## Key Features
//!
//! - **Prefix Range Indexes**: one interval index per key-prefix length turns a
//!   predicate into a single range lookup
//! - **Predicate Algebra**: predicates simplify to a canonical form and yield
//!   key range scans
//! - **Minimal Read Plans**: chunks are read as few sorted, non-overlapping
//!   sequences merged on the fly
//! - **Consolidation Strategies**: partitioning, min-key, size-fix and
//!   hot-segment selection bound read amplification
//!
//! ## Architecture
//!
//! - **Ingester**: group-by accumulation and chunk rotation on the write path
//! - **Catalog**: chunk descriptors, range indexes and consolidation selection
//! - **Query**: planning, k-way merge with reduction, external sort
//! - **Consolidator**: periodic background consolidation against a metadata store

pub mod aggregation;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod consolidator;
pub mod index;
pub mod ingester;
pub mod metadata;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod storage;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::aggregation::{Aggregation, ConsolidationStats};
    pub use crate::catalog::{ChunkCatalog, PickingStrategy};
    pub use crate::chunk::{AggregationDiff, Chunk, ChunkId};
    pub use crate::config::{AggregationConfig, ComponentFactory};
    pub use crate::consolidator::{Consolidator, ConsolidatorConfig};
    pub use crate::metadata::{LocalMetadataStore, MetadataStore};
    pub use crate::predicate::Predicate;
    pub use crate::query::{AggregationQuery, QueryPlan};
    pub use crate::schema::{
        AggregationStructure, FieldType, Measure, PrimaryKey, Record, RecordLayout, Value,
    };
    pub use crate::storage::{ChunkStorage, MemoryChunkStorage, ObjectStoreChunkStorage, RecordStream};
    pub use crate::{Error, Result};
}

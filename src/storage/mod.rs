//! Chunk storage
//!
//! Chunk bytes live behind the [`ChunkStorage`] trait. Every chunk stores rows
//! of the aggregation's key columns plus the measures it was written with;
//! reads may request any subset of those columns and receive rows projected to
//! that subset.

mod memory;
mod object;

pub use memory::MemoryChunkStorage;
pub use object::ObjectStoreChunkStorage;

use crate::chunk::ChunkId;
use crate::schema::{Record, RecordLayout};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Stream of rows produced by reads, merges and sorts
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Chunk storage backend
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Allocate a fresh chunk id
    async fn create_id(&self) -> Result<ChunkId>;

    /// Read a chunk, projected to `keys` and `fields`
    async fn read(&self, keys: &[String], fields: &[String], chunk_id: ChunkId)
        -> Result<RecordStream>;

    /// Persist rows laid out as `keys` followed by `fields`
    async fn write(
        &self,
        keys: &[String],
        fields: &[String],
        chunk_id: ChunkId,
        records: RecordStream,
    ) -> Result<()>;

    /// Make written chunks durable and visible to readers
    async fn finish(&self, chunk_ids: &[ChunkId]) -> Result<()>;
}

/// Serialized form of one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredChunk {
    pub layout: RecordLayout,
    pub records: Vec<Record>,
}

impl StoredChunk {
    /// Rows projected to the requested columns
    pub fn project(&self, keys: &[String], fields: &[String]) -> Result<Vec<Record>> {
        let projection = Projection::new(&self.layout, keys, fields)?;
        self.records
            .iter()
            .map(|record| {
                if record.keys.len() != self.layout.keys.len()
                    || record.measures.len() != self.layout.measures.len()
                {
                    return Err(Error::Serialization(format!(
                        "stored row has {} keys and {} measures, layout has {} and {}",
                        record.keys.len(),
                        record.measures.len(),
                        self.layout.keys.len(),
                        self.layout.measures.len()
                    )));
                }
                Ok(projection.apply(record))
            })
            .collect()
    }
}

/// Column positions mapping a stored layout onto a requested one
#[derive(Debug, Clone)]
pub(crate) struct Projection {
    keys: Vec<usize>,
    measures: Vec<usize>,
}

impl Projection {
    pub fn new(stored: &RecordLayout, keys: &[String], fields: &[String]) -> Result<Self> {
        let keys = stored.key_positions(keys)?;
        let measures = fields
            .iter()
            .map(|field| {
                stored.measure_position(field).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "field '{}' is not stored in chunk with fields {:?}",
                        field, stored.measures
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { keys, measures })
    }

    pub fn apply(&self, record: &Record) -> Record {
        Record::new(
            self.keys.iter().map(|&i| record.keys[i].clone()).collect(),
            self.measures.iter().map(|&i| record.measures[i].clone()).collect(),
        )
    }
}

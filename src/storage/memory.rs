//! In-memory chunk storage for development and testing

use super::{ChunkStorage, RecordStream, StoredChunk};
use crate::chunk::ChunkId;
use crate::schema::RecordLayout;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::{StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};

/// Chunk storage kept in process memory
#[derive(Debug, Default)]
pub struct MemoryChunkStorage {
    next_id: AtomicU64,
    chunks: DashMap<ChunkId, StoredChunk>,
    finished: DashSet<ChunkId>,
}

impl MemoryChunkStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks written, finished or not
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_finished(&self, chunk_id: ChunkId) -> bool {
        self.finished.contains(&chunk_id)
    }

    /// Ids of every written chunk
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.chunks.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl ChunkStorage for MemoryChunkStorage {
    async fn create_id(&self) -> Result<ChunkId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn read(
        &self,
        keys: &[String],
        fields: &[String],
        chunk_id: ChunkId,
    ) -> Result<RecordStream> {
        let rows = {
            let chunk = self
                .chunks
                .get(&chunk_id)
                .ok_or(Error::ChunkNotFound(chunk_id))?;
            chunk.project(keys, fields)?
        };
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn write(
        &self,
        keys: &[String],
        fields: &[String],
        chunk_id: ChunkId,
        records: RecordStream,
    ) -> Result<()> {
        let records = records.try_collect::<Vec<_>>().await?;
        let layout = RecordLayout::new(keys.iter().cloned(), fields.iter().cloned());
        self.chunks.insert(chunk_id, StoredChunk { layout, records });
        Ok(())
    }

    async fn finish(&self, chunk_ids: &[ChunkId]) -> Result<()> {
        for id in chunk_ids {
            if !self.chunks.contains_key(id) {
                return Err(Error::ChunkNotFound(*id));
            }
            self.finished.insert(*id);
        }
        Ok(())
    }
}

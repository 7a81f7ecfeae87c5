//! Chunk storage on top of an object store
//!
//! Chunks are written as JSON documents under `<prefix>/<id>.temp` and only
//! become readable once [`ChunkStorage::finish`] renames them to
//! `<prefix>/<id>.log`.

use super::{ChunkStorage, RecordStream, StoredChunk};
use crate::chunk::ChunkId;
use crate::schema::RecordLayout;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::ObjectStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const LOG_SUFFIX: &str = "log";
const TEMP_SUFFIX: &str = "temp";

/// Chunk storage backed by any [`ObjectStore`]
pub struct ObjectStoreChunkStorage {
    object_store: Arc<dyn ObjectStore>,
    prefix: String,
    next_id: AtomicU64,
}

impl ObjectStoreChunkStorage {
    /// Create a storage rooted at `prefix`. Ids continue after the highest
    /// chunk already present under the prefix.
    pub async fn open(object_store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Result<Self> {
        let storage = Self {
            object_store,
            prefix: prefix.into(),
            next_id: AtomicU64::new(0),
        };
        let max_id = storage.list_chunks().await?.into_iter().max().unwrap_or(0);
        storage.next_id.store(max_id, Ordering::SeqCst);
        debug!(prefix = %storage.prefix, max_id, "Opened object store chunk storage");
        Ok(storage)
    }

    /// Ids of finished chunks
    pub async fn list_chunks(&self) -> Result<Vec<ChunkId>> {
        let prefix = Path::from(self.prefix.as_str());
        let metas: Vec<_> = self.object_store.list(Some(&prefix)).try_collect().await?;
        let mut ids: Vec<ChunkId> = metas
            .iter()
            .filter_map(|meta| {
                let name = meta.location.filename()?;
                let id = name.strip_suffix(LOG_SUFFIX)?.strip_suffix('.')?;
                id.parse().ok()
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn path(&self, chunk_id: ChunkId, suffix: &str) -> Path {
        Path::from(format!("{}/{}.{}", self.prefix, chunk_id, suffix))
    }
}

#[async_trait]
impl ChunkStorage for ObjectStoreChunkStorage {
    async fn create_id(&self) -> Result<ChunkId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn read(
        &self,
        keys: &[String],
        fields: &[String],
        chunk_id: ChunkId,
    ) -> Result<RecordStream> {
        let path = self.path(chunk_id, LOG_SUFFIX);
        let data = match self.object_store.get(&path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(Error::ChunkNotFound(chunk_id))
            }
            Err(e) => return Err(e.into()),
        };
        let chunk: StoredChunk = serde_json::from_slice(&data)?;
        let rows = chunk.project(keys, fields)?;
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
        let chunk = StoredChunk {
            layout: RecordLayout::new(keys.iter().cloned(), fields.iter().cloned()),
            records,
        };
        let data = Bytes::from(serde_json::to_vec(&chunk)?);
        let size = data.len();
        self.object_store
            .put(&self.path(chunk_id, TEMP_SUFFIX), data.into())
            .await?;
        debug!(chunk_id, size, "Wrote temporary chunk");
        Ok(())
    }

    async fn finish(&self, chunk_ids: &[ChunkId]) -> Result<()> {
        for &chunk_id in chunk_ids {
            let from = self.path(chunk_id, TEMP_SUFFIX);
            let to = self.path(chunk_id, LOG_SUFFIX);
            match self.object_store.rename(&from, &to).await {
                Ok(()) => {}
                Err(object_store::Error::NotFound { .. }) => {
                    return Err(Error::ChunkNotFound(chunk_id))
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(chunks = chunk_ids.len(), "Finished chunks");
        Ok(())
    }
}

//! Chunk rotation and bounded chunk writers

use crate::chunk::Chunk;
use crate::schema::Record;
use crate::storage::ChunkStorage;
use crate::{Error, Result};
use futures::stream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Cuts a sorted row stream into chunks and writes them.
///
/// A chunk is closed when it holds `chunk_size` rows, when the next row falls
/// into another partition, or at the end of a sorted batch. At most
/// `max_in_flight` chunk writes run at once; pushing waits while the limit is
/// reached. The first failed write fails the next push or [`Chunker::finish`],
/// and dropping the chunker aborts writes still running.
pub struct Chunker {
    storage: Arc<dyn ChunkStorage>,
    keys: Arc<Vec<String>>,
    fields: Arc<Vec<String>>,
    chunk_size: usize,
    partitioning_key_len: usize,
    permits: Arc<Semaphore>,
    writers: JoinSet<Result<Chunk>>,
    current: Vec<Record>,
    written: Vec<Chunk>,
}

impl Chunker {
    pub fn new(
        storage: Arc<dyn ChunkStorage>,
        keys: Vec<String>,
        fields: Vec<String>,
        chunk_size: usize,
        partitioning_key_len: usize,
        max_in_flight: usize,
    ) -> Self {
        Self {
            storage,
            keys: Arc::new(keys),
            fields: Arc::new(fields),
            chunk_size: chunk_size.max(1),
            partitioning_key_len,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            writers: JoinSet::new(),
            current: Vec::new(),
            written: Vec::new(),
        }
    }

    /// Append the next row; rows must arrive sorted within a batch
    pub async fn push(&mut self, record: Record) -> Result<()> {
        if let Some(last) = self.current.last() {
            if self.current.len() >= self.chunk_size
                || !same_partition(last, &record, self.partitioning_key_len)
            {
                self.close_chunk().await?;
            }
        }
        self.current.push(record);
        Ok(())
    }

    /// Close the chunk in progress at the end of a sorted batch
    pub async fn end_batch(&mut self) -> Result<()> {
        self.close_chunk().await
    }

    /// Close the last chunk and wait for every write
    pub async fn finish(mut self) -> Result<Vec<Chunk>> {
        self.close_chunk().await?;
        while let Some(result) = self.writers.join_next().await {
            self.written.push(result??);
        }
        self.written.sort();
        Ok(self.written)
    }

    async fn close_chunk(&mut self) -> Result<()> {
        let (Some(first), Some(last)) = (self.current.first(), self.current.last()) else {
            return Ok(());
        };
        let (min_key, max_key) = (first.key(), last.key());
        let records = std::mem::take(&mut self.current);

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("chunk writer pool closed: {}", e)))?;
        self.reap()?;

        let id = self.storage.create_id().await?;
        let chunk = Chunk::new(
            id,
            self.fields.to_vec(),
            min_key,
            max_key,
            records.len() as u64,
        )?;
        debug!(chunk_id = id, rows = chunk.count, "Writing chunk");

        let storage = self.storage.clone();
        let keys = self.keys.clone();
        let fields = self.fields.clone();
        self.writers.spawn(async move {
            let _permit = permit;
            let rows = stream::iter(records.into_iter().map(Ok)).boxed();
            storage.write(&keys, &fields, chunk.id, rows).await?;
            Ok(chunk)
        });
        Ok(())
    }

    /// Collect completed writes, failing on the first error
    fn reap(&mut self) -> Result<()> {
        while let Some(result) = self.writers.try_join_next() {
            match result {
                Ok(Ok(chunk)) => self.written.push(chunk),
                Ok(Err(e)) => {
                    self.writers.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    self.writers.abort_all();
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

fn same_partition(a: &Record, b: &Record, partitioning_key_len: usize) -> bool {
    let len = partitioning_key_len.min(a.keys.len()).min(b.keys.len());
    a.keys[..len] == b.keys[..len]
}

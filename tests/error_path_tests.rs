//! Failure injection tests
//!
//! A wrapping chunk storage fails writes, reads or finishes on demand. Failed
//! operations must leave the catalog as it was.

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use rollupdb::prelude::*;
use rollupdb::record;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct FaultyStorage {
    inner: MemoryChunkStorage,
    fail_writes: AtomicBool,
    fail_finish: AtomicBool,
    unreadable: Mutex<HashSet<ChunkId>>,
    truncated: Mutex<HashSet<ChunkId>>,
}

impl FaultyStorage {
    fn injected(what: &str) -> Error {
        Error::Internal(format!("injected {} failure", what))
    }
}

#[async_trait]
impl ChunkStorage for FaultyStorage {
    async fn create_id(&self) -> Result<ChunkId> {
        self.inner.create_id().await
    }

    async fn read(&self, keys: &[String], fields: &[String], chunk_id: ChunkId) -> Result<RecordStream> {
        if self.unreadable.lock().contains(&chunk_id) {
            return Err(Self::injected("read"));
        }
        let rows = self.inner.read(keys, fields, chunk_id).await?;
        if self.truncated.lock().contains(&chunk_id) {
            // First row, then an error in place of the rest
            return Ok(rows
                .take(1)
                .chain(stream::once(async { Err(FaultyStorage::injected("stream")) }))
                .boxed());
        }
        Ok(rows)
    }

    async fn write(
        &self,
        keys: &[String],
        fields: &[String],
        chunk_id: ChunkId,
        records: RecordStream,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected("write"));
        }
        self.inner.write(keys, fields, chunk_id, records).await
    }

    async fn finish(&self, chunk_ids: &[ChunkId]) -> Result<()> {
        if self.fail_finish.load(Ordering::SeqCst) {
            return Err(Self::injected("finish"));
        }
        self.inner.finish(chunk_ids).await
    }
}

fn structure() -> AggregationStructure {
    AggregationStructure::new()
        .with_key("day", FieldType::Int)
        .with_measure("clicks", FieldType::Int, Measure::Sum)
}

fn layout() -> RecordLayout {
    RecordLayout::new(["day"], ["clicks"])
}

fn query() -> AggregationQuery {
    AggregationQuery::new().with_keys(["day"]).with_measures(["clicks"])
}

fn rows(days: std::ops::Range<i64>) -> RecordStream {
    stream::iter(days.map(|day| Ok(record!([day], [1])))).boxed()
}

async fn setup(storage: Arc<FaultyStorage>) -> Aggregation {
    let config = AggregationConfig {
        chunk_size: 3,
        ..AggregationConfig::default()
    };
    let mut aggregation = Aggregation::new(structure(), storage, config).unwrap();
    for batch in [0..6, 2..8] {
        let diff = aggregation.consume(&layout(), rows(batch)).await.unwrap();
        aggregation.apply_diff(&diff).unwrap();
    }
    aggregation
}

async fn collect(aggregation: &Aggregation) -> Result<Vec<Record>> {
    aggregation.query(&query()).await?.try_collect().await
}

#[tokio::test]
async fn test_failed_write_produces_no_diff() {
    let storage = Arc::new(FaultyStorage::default());
    let aggregation = setup(storage.clone()).await;
    let before = aggregation.chunks();

    storage.fail_writes.store(true, Ordering::SeqCst);
    let result = aggregation.consume(&layout(), rows(10..20)).await;
    assert!(matches!(result, Err(Error::Internal(_))));
    assert_eq!(aggregation.chunks(), before);
}

#[tokio::test]
async fn test_failed_finish_produces_no_diff() {
    let storage = Arc::new(FaultyStorage::default());
    let aggregation = setup(storage.clone()).await;

    storage.fail_finish.store(true, Ordering::SeqCst);
    assert!(aggregation.consume(&layout(), rows(10..12)).await.is_err());
    assert_eq!(aggregation.catalog().len(), 4);
}

#[tokio::test]
async fn test_failed_consolidation_keeps_catalog() {
    let storage = Arc::new(FaultyStorage::default());
    let mut aggregation = setup(storage.clone()).await;
    let before = aggregation.chunks();
    let expected = collect(&aggregation).await.unwrap();

    let selection = aggregation.select_for_consolidation(PickingStrategy::MinKey);
    assert!(!selection.is_empty());
    storage.unreadable.lock().insert(selection.chunks[0].id);

    assert!(aggregation.consolidate_selection(&selection).await.is_err());
    assert_eq!(aggregation.chunks(), before);
    let stats = aggregation.consolidation_stats();
    assert!(stats.last_error.is_some());
    assert_eq!(stats.consolidations, 0);

    // Consolidation never skips unreadable chunks, even when queries may.
    aggregation.set_ignore_chunk_reading_errors(true);
    assert!(aggregation.consolidate_selection(&selection).await.is_err());

    storage.unreadable.lock().clear();
    let diff = aggregation.consolidate_selection(&selection).await.unwrap();
    aggregation.apply_diff(&diff).unwrap();
    assert_eq!(collect(&aggregation).await.unwrap(), expected);
    assert!(aggregation.consolidation_stats().last_error.is_none());
}

#[tokio::test]
async fn test_unreadable_chunk_strict_and_lenient() {
    let storage = Arc::new(FaultyStorage::default());
    let mut aggregation = setup(storage.clone()).await;
    let lost = aggregation.chunks()[0].clone();
    storage.unreadable.lock().insert(lost.id);

    assert!(collect(&aggregation).await.is_err());

    aggregation.set_ignore_chunk_reading_errors(true);
    let rows = collect(&aggregation).await.unwrap();
    let total: i64 = rows.iter().map(|r| r.measures[0].as_i64().unwrap()).sum();
    assert_eq!(total, 12 - lost.count as i64);
}

#[tokio::test]
async fn test_truncated_chunk_keeps_rows_read_so_far() {
    let storage = Arc::new(FaultyStorage::default());
    let mut aggregation = setup(storage.clone()).await;
    let broken = aggregation.chunks()[0].clone();
    assert!(broken.count > 1);
    storage.truncated.lock().insert(broken.id);

    assert!(collect(&aggregation).await.is_err());

    aggregation.set_ignore_chunk_reading_errors(true);
    let rows = collect(&aggregation).await.unwrap();
    let total: i64 = rows.iter().map(|r| r.measures[0].as_i64().unwrap()).sum();
    assert_eq!(total, 12 - broken.count as i64 + 1);
}

#[tokio::test]
async fn test_invalid_input_rejected_before_io() {
    let storage = Arc::new(FaultyStorage::default());
    let aggregation = setup(storage.clone()).await;
    let written = storage.inner.chunk_count();

    let unknown = RecordLayout::new(["day"], ["impressions"]);
    assert!(matches!(
        aggregation.consume(&unknown, rows(0..3)).await,
        Err(Error::Config(_))
    ));

    let bad_type = stream::iter(vec![Ok(record!(["monday"], [1]))]).boxed();
    assert!(matches!(
        aggregation.consume(&layout(), bad_type).await,
        Err(Error::InvalidSchema(_))
    ));
    assert_eq!(storage.inner.chunk_count(), written);

    let bad_query = AggregationQuery::new().with_keys(["hour"]).with_measures(["clicks"]);
    assert!(matches!(aggregation.query(&bad_query).await, Err(Error::Config(_))));
}

//! Plan execution over chunk storage

use super::merge::{measure_positions, merge_sorted, project_measures, reduce_sorted};
use super::{AggregationQuery, ExternalSorter, QueryPlan, Sequence};
use crate::chunk::ChunkId;
use crate::predicate::RowFilter;
use crate::schema::{AggregationStructure, Record, RecordLayout};
use crate::storage::{ChunkStorage, RecordStream};
use crate::Result;
use futures::future::ready;
use futures::stream;
use futures::{StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes query plans against a chunk storage
#[derive(Clone)]
pub struct QueryEngine {
    structure: Arc<AggregationStructure>,
    storage: Arc<dyn ChunkStorage>,
    sorter: ExternalSorter,
    ignore_chunk_reading_errors: bool,
}

/// Query resolved against the aggregation structure
struct ResolvedQuery {
    key_positions: Arc<Vec<usize>>,
    natural_order: bool,
    full_key: bool,
}

impl QueryEngine {
    pub fn new(
        structure: Arc<AggregationStructure>,
        storage: Arc<dyn ChunkStorage>,
        sorter: ExternalSorter,
    ) -> Self {
        Self {
            structure,
            storage,
            sorter,
            ignore_chunk_reading_errors: false,
        }
    }

    /// Log and skip chunks that fail to read instead of failing the query
    pub fn with_ignore_chunk_reading_errors(mut self, ignore: bool) -> Self {
        self.ignore_chunk_reading_errors = ignore;
        self
    }

    /// Check keys, measures and predicate of `query` without touching storage
    pub fn validate(&self, query: &AggregationQuery) -> Result<()> {
        self.resolve(query)?;
        self.structure.reducers(&query.measures)?;
        RowFilter::compile(&query.predicate, &self.structure.chunk_layout(&[]))?;
        Ok(())
    }

    fn resolve(&self, query: &AggregationQuery) -> Result<ResolvedQuery> {
        let natural_keys = self.structure.key_names();
        let layout = RecordLayout::new(natural_keys.iter().cloned(), Vec::<String>::new());
        let key_positions = layout.key_positions(&query.keys)?;

        let natural_order = query.keys.len() <= natural_keys.len()
            && query.keys.iter().zip(&natural_keys).all(|(a, b)| a == b);
        let requested: BTreeSet<&String> = query.keys.iter().collect();
        let full_key = requested.len() == natural_keys.len();

        Ok(ResolvedQuery {
            key_positions: Arc::new(key_positions),
            natural_order,
            full_key,
        })
    }

    /// Stream the rows of `plan` laid out as `query` requests
    pub async fn execute(&self, plan: QueryPlan, query: &AggregationQuery) -> Result<RecordStream> {
        let resolved = self.resolve(query)?;
        let reducers = self.structure.reducers(&query.measures)?;

        let mut streams = Vec::with_capacity(plan.sequences.len());
        let mut positions = Vec::with_capacity(plan.sequences.len());
        for sequence in &plan.sequences {
            let layout = self.structure.chunk_layout(&sequence.fields);
            let filter = RowFilter::compile(&query.predicate, &layout)?;
            let mut rows = self.sequence_stream(sequence, filter, resolved.key_positions.clone());
            if !resolved.natural_order {
                rows = self.sorter.sort(rows).await?;
            }
            streams.push(rows);
            positions.push(measure_positions(&sequence.fields, &query.measures));
        }

        debug!(
            sequences = streams.len(),
            natural_order = resolved.natural_order,
            full_key = resolved.full_key,
            "Executing query plan"
        );

        if streams.len() == 1 && resolved.full_key {
            if let (Some(rows), Some(positions)) = (streams.pop(), positions.pop()) {
                return Ok(project_measures(rows, positions));
            }
        }
        Ok(reduce_sorted(merge_sorted(streams), positions, reducers))
    }

    /// Rows of every chunk of `sequence`, filtered and keyed by the requested keys
    fn sequence_stream(
        &self,
        sequence: &Sequence,
        filter: RowFilter,
        key_positions: Arc<Vec<usize>>,
    ) -> RecordStream {
        let storage = self.storage.clone();
        let keys = Arc::new(self.structure.key_names());
        let fields = Arc::new(sequence.fields.clone());
        let ignore_errors = self.ignore_chunk_reading_errors;

        let rows = stream::iter(sequence.chunks.clone())
            .then(move |chunk| {
                open_chunk(
                    storage.clone(),
                    keys.clone(),
                    fields.clone(),
                    chunk.id,
                    ignore_errors,
                )
            })
            .try_flatten();

        let rows = if filter.is_always_true() {
            rows.boxed()
        } else {
            rows.try_filter(move |record| ready(filter.matches(record)))
                .boxed()
        };

        rows.map_ok(move |record| {
            let keys = record.project_key(&key_positions).into_values();
            Record::new(keys, record.measures)
        })
        .boxed()
    }
}

async fn open_chunk(
    storage: Arc<dyn ChunkStorage>,
    keys: Arc<Vec<String>>,
    fields: Arc<Vec<String>>,
    chunk_id: ChunkId,
    ignore_errors: bool,
) -> Result<RecordStream> {
    match storage.read(&keys, &fields, chunk_id).await {
        Ok(rows) if ignore_errors => Ok(rows
            .take_while(move |row| {
                if let Err(e) = row {
                    warn!(chunk_id, error = %e, "Skipping rest of unreadable chunk");
                }
                ready(row.is_ok())
            })
            .boxed()),
        Ok(rows) => Ok(rows),
        Err(e) if ignore_errors => {
            warn!(chunk_id, error = %e, "Skipping unreadable chunk");
            Ok(stream::empty().boxed())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::predicate::{always_true, between, regexp};
    use crate::query::create_plan;
    use crate::record;
    use crate::schema::{FieldType, Measure, PrimaryKey};
    use crate::storage::MemoryChunkStorage;
    use crate::Error;

    fn structure() -> Arc<AggregationStructure> {
        Arc::new(
            AggregationStructure::new()
                .with_key("day", FieldType::Int)
                .with_key("site", FieldType::Str)
                .with_measure("clicks", FieldType::Int, Measure::Sum)
                .with_measure("cost", FieldType::Float, Measure::Max),
        )
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    async fn write_chunk(
        storage: &MemoryChunkStorage,
        fields: &[&str],
        rows: Vec<Record>,
    ) -> Chunk {
        let id = storage.create_id().await.unwrap();
        let min = rows.first().unwrap().key();
        let max = rows.last().unwrap().key();
        let count = rows.len() as u64;
        storage
            .write(
                &names(&["day", "site"]),
                &names(fields),
                id,
                stream::iter(rows.into_iter().map(Ok)).boxed(),
            )
            .await
            .unwrap();
        storage.finish(&[id]).await.unwrap();
        Chunk::new(id, names(fields), min, max, count).unwrap()
    }

    async fn run(
        engine: &QueryEngine,
        chunks: Vec<Chunk>,
        query: AggregationQuery,
    ) -> Result<Vec<Record>> {
        let plan = create_plan(chunks, &query.measures);
        engine.execute(plan, &query).await?.try_collect().await
    }

    #[tokio::test]
    async fn test_overlapping_chunks_are_reduced() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let a = write_chunk(
            &storage,
            &["clicks"],
            vec![record!([1, "a"], [1]), record!([2, "a"], [2])],
        )
        .await;
        let b = write_chunk(
            &storage,
            &["clicks", "cost"],
            vec![record!([1, "a"], [10, 0.5]), record!([1, "b"], [3, 1.5])],
        )
        .await;
        let engine = QueryEngine::new(structure(), storage, ExternalSorter::new(10, 64, None));

        let rows = run(
            &engine,
            vec![a, b],
            AggregationQuery::new()
                .with_keys(["day", "site"])
                .with_measures(["clicks", "cost"]),
        )
        .await
        .unwrap();
        assert_eq!(
            rows,
            vec![
                record!([1, "a"], [11, 0.5]),
                record!([1, "b"], [3, 1.5]),
                Record::new(
                    vec![2.into(), "a".into()],
                    vec![2.into(), crate::schema::Value::Null]
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_key_prefix_groups_rows() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let a = write_chunk(
            &storage,
            &["clicks"],
            vec![
                record!([1, "a"], [1]),
                record!([1, "b"], [2]),
                record!([2, "a"], [4]),
            ],
        )
        .await;
        let engine = QueryEngine::new(structure(), storage, ExternalSorter::new(10, 64, None));
        let rows = run(
            &engine,
            vec![a],
            AggregationQuery::new().with_keys(["day"]).with_measures(["clicks"]),
        )
        .await
        .unwrap();
        assert_eq!(rows, vec![record!([1], [3]), record!([2], [4])]);
    }

    #[tokio::test]
    async fn test_reordered_keys_are_sorted() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let a = write_chunk(
            &storage,
            &["clicks"],
            vec![
                record!([1, "b"], [1]),
                record!([2, "a"], [2]),
                record!([3, "b"], [4]),
            ],
        )
        .await;
        let engine = QueryEngine::new(structure(), storage, ExternalSorter::new(1, 64, None));
        let rows = run(
            &engine,
            vec![a],
            AggregationQuery::new().with_keys(["site"]).with_measures(["clicks"]),
        )
        .await
        .unwrap();
        assert_eq!(rows, vec![record!(["a"], [2]), record!(["b"], [5])]);
    }

    #[tokio::test]
    async fn test_predicate_filters_rows() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let a = write_chunk(
            &storage,
            &["clicks"],
            vec![
                record!([1, "alpha"], [1]),
                record!([2, "beta"], [2]),
                record!([3, "alps"], [4]),
            ],
        )
        .await;
        let engine = QueryEngine::new(structure(), storage, ExternalSorter::new(10, 64, None));
        let rows = run(
            &engine,
            vec![a],
            AggregationQuery::new()
                .with_keys(["day", "site"])
                .with_measures(["clicks"])
                .with_predicate(crate::predicate::and([
                    between("day", 1, 3),
                    regexp("site", "al.*"),
                ])),
        )
        .await
        .unwrap();
        assert_eq!(rows, vec![record!([1, "alpha"], [1]), record!([3, "alps"], [4])]);
    }

    #[tokio::test]
    async fn test_unknown_columns_are_config_errors() {
        let engine = QueryEngine::new(
            structure(),
            Arc::new(MemoryChunkStorage::new()),
            ExternalSorter::new(10, 64, None),
        );
        let bad_key = AggregationQuery::new().with_keys(["week"]).with_measures(["clicks"]);
        assert!(matches!(engine.validate(&bad_key), Err(Error::Config(_))));
        let bad_measure = AggregationQuery::new().with_keys(["day"]).with_measures(["revenue"]);
        assert!(matches!(engine.validate(&bad_measure), Err(Error::Config(_))));
        let bad_predicate = AggregationQuery::new()
            .with_keys(["day"])
            .with_measures(["clicks"])
            .with_predicate(between("clicks", 1, 2));
        assert!(matches!(engine.validate(&bad_predicate), Err(Error::Config(_))));
        let good = AggregationQuery::new()
            .with_keys(["day"])
            .with_measures(["clicks"])
            .with_predicate(always_true());
        assert!(engine.validate(&good).is_ok());
    }

    #[tokio::test]
    async fn test_missing_chunk_fails_or_is_skipped() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let a = write_chunk(&storage, &["clicks"], vec![record!([1, "a"], [1])]).await;
        let ghost = Chunk::new(99, names(&["clicks"]), PrimaryKey::new(vec![5.into(), "a".into()]), PrimaryKey::new(vec![5.into(), "z".into()]), 1).unwrap();
        let query = AggregationQuery::new()
            .with_keys(["day", "site"])
            .with_measures(["clicks"]);

        let strict = QueryEngine::new(structure(), storage.clone(), ExternalSorter::new(10, 64, None));
        assert!(matches!(
            run(&strict, vec![a.clone(), ghost.clone()], query.clone()).await,
            Err(Error::ChunkNotFound(99))
        ));

        let lenient = strict.with_ignore_chunk_reading_errors(true);
        let rows = run(&lenient, vec![a, ghost], query).await.unwrap();
        assert_eq!(rows, vec![record!([1, "a"], [1])]);
    }
}

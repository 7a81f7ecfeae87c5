//! Aggregation facade
//!
//! [`Aggregation`] ties the chunk catalog to chunk storage, the write path and
//! the query engine. Ingestion and consolidation only produce diffs; the
//! catalog changes when a diff is applied, so queries never see a half-done
//! operation.

use crate::catalog::{ChunkCatalog, ConsolidationDebugInfo, ConsolidationSelection, PickingStrategy};
use crate::chunk::{AggregationDiff, Chunk, ChunkId};
use crate::config::AggregationConfig;
use crate::ingester::{Chunker, IngestionPipeline};
use crate::metadata::MetadataStore;
use crate::query::{create_plan, AggregationQuery, ExternalSorter, QueryEngine, QueryPlan};
use crate::schema::{AggregationStructure, RecordLayout};
use crate::storage::{ChunkStorage, RecordStream};
use crate::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

/// Consolidation bookkeeping, for observability only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationStats {
    /// Start of the consolidation in progress
    pub started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
    pub last_strategy: Option<PickingStrategy>,
    /// Consolidations that produced a diff
    pub consolidations: u64,
    pub last_error: Option<String>,
}

/// Clears the in-progress flag when a consolidation ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One aggregation: structure, chunk catalog and collaborators
pub struct Aggregation {
    structure: Arc<AggregationStructure>,
    config: AggregationConfig,
    storage: Arc<dyn ChunkStorage>,
    catalog: ChunkCatalog,
    pipeline: IngestionPipeline,
    engine: QueryEngine,
    revision: u64,
    last_reload: Option<Instant>,
    consolidating: AtomicBool,
    stats: Mutex<ConsolidationStats>,
}

impl Aggregation {
    pub fn new(
        structure: AggregationStructure,
        storage: Arc<dyn ChunkStorage>,
        config: AggregationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let structure = Arc::new(structure);
        let sorter = ExternalSorter::new(
            config.sorter_items_in_memory,
            config.sorter_block_size,
            config.sort_dir.clone(),
        );
        let engine = QueryEngine::new(structure.clone(), storage.clone(), sorter)
            .with_ignore_chunk_reading_errors(config.ignore_chunk_reading_errors);
        let pipeline = IngestionPipeline::new(structure.clone(), storage.clone(), &config);

        Ok(Self {
            catalog: ChunkCatalog::for_structure(&structure),
            structure,
            config,
            storage,
            pipeline,
            engine,
            revision: 0,
            last_reload: None,
            consolidating: AtomicBool::new(false),
            stats: Mutex::new(ConsolidationStats::default()),
        })
    }

    pub fn structure(&self) -> &AggregationStructure {
        &self.structure
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ChunkCatalog {
        &self.catalog
    }

    /// Metadata revision the catalog was last loaded at
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.catalog.chunks().cloned().collect()
    }

    pub fn ignore_chunk_reading_errors(&self) -> bool {
        self.config.ignore_chunk_reading_errors
    }

    pub fn set_ignore_chunk_reading_errors(&mut self, ignore: bool) {
        self.config.ignore_chunk_reading_errors = ignore;
        self.engine = self.engine.clone().with_ignore_chunk_reading_errors(ignore);
    }

    /// Aggregate `rows` into new chunks; the returned diff is not yet applied
    pub async fn consume(&self, layout: &RecordLayout, rows: RecordStream) -> Result<AggregationDiff> {
        self.pipeline.consume(layout, rows).await
    }

    /// Apply a diff to the catalog; a rejected diff changes nothing
    pub fn apply_diff(&mut self, diff: &AggregationDiff) -> Result<()> {
        self.catalog.apply_diff(diff)?;
        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            chunks = self.catalog.len(),
            "Applied diff"
        );
        Ok(())
    }

    /// Persist a diff to the metadata store, then apply it
    pub async fn commit(&mut self, metadata: &dyn MetadataStore, diff: &AggregationDiff) -> Result<()> {
        if diff.is_empty() {
            return Ok(());
        }
        let added: Vec<Chunk> = diff.added.iter().cloned().collect();
        if diff.removed.is_empty() {
            metadata.save_chunks(&added).await?;
        } else {
            let removed: Vec<Chunk> = diff.removed.iter().cloned().collect();
            metadata.save_consolidated_chunks(&removed, &added).await?;
        }
        self.apply_diff(diff)
    }

    /// Bring the catalog up to date with the metadata store.
    ///
    /// Loads the changes since the last seen revision, or everything when the
    /// catalog was never loaded or was last loaded longer ago than
    /// `max_incremental_reload_period`. Returns the diff that was applied.
    pub async fn load_chunks(&mut self, metadata: &dyn MetadataStore) -> Result<AggregationDiff> {
        let full = match self.last_reload {
            None => true,
            Some(at) => at.elapsed() > self.config.max_incremental_reload_period,
        };
        let since = if full { 0 } else { self.revision };
        let loaded = metadata.load_chunks(since).await?;

        let diff = if full {
            let previous: BTreeSet<Chunk> = self.catalog.chunks().cloned().collect();
            let mut fresh = ChunkCatalog::for_structure(&self.structure);
            for chunk in &loaded.added {
                fresh.add(chunk.clone())?;
            }
            let current: BTreeSet<Chunk> = fresh.chunks().cloned().collect();
            self.catalog = fresh;
            AggregationDiff::new(
                current.difference(&previous).cloned().collect(),
                previous.difference(&current).cloned().collect(),
            )
        } else {
            let removed: BTreeSet<Chunk> = loaded
                .removed
                .iter()
                .filter_map(|&id| self.catalog.get(id).cloned())
                .collect();
            let added: BTreeSet<Chunk> = loaded
                .added
                .into_iter()
                .filter(|chunk| !self.catalog.contains(chunk.id))
                .collect();
            let diff = AggregationDiff::new(added, removed);
            self.catalog.apply_diff(&diff)?;
            diff
        };

        info!(
            full,
            since,
            revision = loaded.revision,
            added = diff.added.len(),
            removed = diff.removed.len(),
            chunks = self.catalog.len(),
            "Loaded chunks"
        );
        self.revision = loaded.revision;
        self.last_reload = Some(Instant::now());
        Ok(diff)
    }

    /// Plan `query` against the current catalog
    pub fn plan(&self, query: &AggregationQuery) -> Result<QueryPlan> {
        self.engine.validate(query)?;
        let chunks = self.catalog.find_chunks(&query.predicate, &query.measures);
        Ok(create_plan(chunks, &query.measures))
    }

    /// Number of chunks `query` would read
    pub fn estimate_cost(&self, query: &AggregationQuery) -> Result<usize> {
        self.engine.validate(query)?;
        Ok(self.catalog.find_chunks(&query.predicate, &query.measures).len())
    }

    /// Rows matching `query`, grouped by its keys and sorted by them
    pub async fn query(&self, query: &AggregationQuery) -> Result<RecordStream> {
        let span = info_span!(
            "query",
            keys = ?query.keys,
            measures = ?query.measures,
            predicate = %query.predicate
        );
        async {
            let plan = self.plan(query)?;
            info!(
                sequences = plan.sequences.len(),
                chunks = plan.chunk_count(),
                "Planned query"
            );
            self.engine.execute(plan, query).await
        }
        .instrument(span)
        .await
    }

    /// Chunks the given strategy would consolidate now.
    ///
    /// `HotSegment` looks for the most overlapped key range; every other
    /// strategy runs the partitioning, min-key and size-fix chain.
    pub fn select_for_consolidation(&self, strategy: PickingStrategy) -> ConsolidationSelection {
        let max_chunks = self.config.max_chunks_to_consolidate;
        match strategy {
            PickingStrategy::HotSegment => self.catalog.find_chunks_for_consolidation_hot_segment(max_chunks),
            _ => self
                .catalog
                .find_chunks_for_consolidation_min_key(max_chunks, self.config.chunk_size as u64),
        }
    }

    /// Select and rewrite chunks; the returned diff is not yet applied.
    ///
    /// Yields an empty diff when nothing needs consolidation or another
    /// consolidation is already running on this aggregation.
    pub async fn consolidate(&self, strategy: PickingStrategy) -> Result<AggregationDiff> {
        let selection = self.select_for_consolidation(strategy);
        self.consolidate_selection(&selection).await
    }

    pub async fn consolidate_min_key(&self) -> Result<AggregationDiff> {
        self.consolidate(PickingStrategy::MinKey).await
    }

    pub async fn consolidate_hot_segment(&self) -> Result<AggregationDiff> {
        self.consolidate(PickingStrategy::HotSegment).await
    }

    /// Rewrite the chunks of `selection` into new chunks
    pub async fn consolidate_selection(&self, selection: &ConsolidationSelection) -> Result<AggregationDiff> {
        if selection.is_empty() {
            return Ok(AggregationDiff::empty());
        }
        if self
            .consolidating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Consolidation already in progress, skipping");
            return Ok(AggregationDiff::empty());
        }
        let _running = RunningGuard(&self.consolidating);

        let started = Instant::now();
        self.stats.lock().started_at = Some(Utc::now());
        let result = self.rewrite(&selection.chunks).await;

        let mut stats = self.stats.lock();
        stats.started_at = None;
        match &result {
            Ok(diff) => {
                stats.last_completed_at = Some(Utc::now());
                stats.last_duration = Some(started.elapsed());
                stats.last_strategy = Some(selection.strategy);
                stats.consolidations += 1;
                stats.last_error = None;
                info!(
                    strategy = %selection.strategy,
                    removed = diff.removed.len(),
                    added = diff.added.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Consolidation finished"
                );
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());
                warn!(strategy = %selection.strategy, error = %e, "Consolidation failed");
            }
        }
        result
    }

    /// Merge `chunks` into freshly cut chunks holding the same rows
    async fn rewrite(&self, chunks: &[Chunk]) -> Result<AggregationDiff> {
        let fields = self
            .structure
            .measures_in(chunks.iter().flat_map(|c| c.fields.iter()));
        let query = AggregationQuery::new()
            .with_keys(self.structure.key_names())
            .with_measures(fields.clone());
        let plan = create_plan(chunks.to_vec(), &fields);
        // Losing rows of an unreadable chunk is never acceptable here.
        let engine = self.engine.clone().with_ignore_chunk_reading_errors(false);
        let mut rows = engine.execute(plan, &query).await?;

        let mut chunker = Chunker::new(
            self.storage.clone(),
            self.structure.key_names(),
            fields,
            self.config.chunk_size,
            self.structure.partitioning_key_len(),
            self.config.max_in_flight_writes,
        );
        while let Some(row) = rows.next().await {
            chunker.push(row?).await?;
        }
        let added = chunker.finish().await?;
        let ids: Vec<ChunkId> = added.iter().map(|c| c.id).collect();
        if !ids.is_empty() {
            self.storage.finish(&ids).await?;
        }

        Ok(AggregationDiff::new(
            added.into_iter().collect(),
            chunks.iter().cloned().collect(),
        ))
    }

    pub fn consolidation_stats(&self) -> ConsolidationStats {
        self.stats.lock().clone()
    }

    pub fn consolidation_debug_info(&self) -> Vec<ConsolidationDebugInfo> {
        self.catalog.consolidation_debug_info()
    }

    pub fn overlapping_chunks(&self) -> BTreeSet<Chunk> {
        self.catalog.find_overlapping_chunks()
    }

    pub fn number_of_overlapping_chunks(&self) -> usize {
        self.overlapping_chunks().len()
    }
}

//! Write path
//!
//! Rows flow through two stages:
//! - [`GroupReducer`] folds rows with equal keys and hands out sorted batches
//!   of at most `chunk_size` keys
//! - [`Chunker`] cuts every batch into chunks bounded by size and partition and
//!   writes them through a small pool of concurrent writers
//!
//! The chunks written by one call are returned as an add-only diff; nothing is
//! registered in the catalog here.

mod buffer;
mod chunker;

pub use buffer::GroupReducer;
pub use chunker::Chunker;

use crate::chunk::{AggregationDiff, ChunkId};
use crate::config::AggregationConfig;
use crate::schema::{AggregationStructure, FieldType, RecordLayout, Value};
use crate::storage::{ChunkStorage, RecordStream};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Input layout resolved against the aggregation structure
#[derive(Debug, Clone)]
struct IngestionLayout {
    key_positions: Vec<usize>,
    key_types: Vec<FieldType>,
    fields: Vec<String>,
    measure_positions: Vec<usize>,
}

/// Turns row streams into chunks
pub struct IngestionPipeline {
    structure: Arc<AggregationStructure>,
    storage: Arc<dyn ChunkStorage>,
    chunk_size: usize,
    max_in_flight_writes: usize,
}

impl IngestionPipeline {
    pub fn new(
        structure: Arc<AggregationStructure>,
        storage: Arc<dyn ChunkStorage>,
        config: &AggregationConfig,
    ) -> Self {
        Self {
            structure,
            storage,
            chunk_size: config.chunk_size,
            max_in_flight_writes: config.max_in_flight_writes,
        }
    }

    /// Check an input layout: it must carry every key column and only known
    /// measures, at least one of them.
    pub fn validate(&self, layout: &RecordLayout) -> Result<()> {
        self.resolve(layout).map(|_| ())
    }

    fn resolve(&self, layout: &RecordLayout) -> Result<IngestionLayout> {
        let key_names = self.structure.key_names();
        if layout.keys.len() != key_names.len() {
            return Err(Error::Config(format!(
                "input keys {:?} do not match aggregation keys {:?}",
                layout.keys, key_names
            )));
        }
        let key_positions = layout.key_positions(&key_names)?;
        let key_types = self.structure.keys().iter().map(|k| k.field_type).collect();

        if let Some(unknown) = layout
            .measures
            .iter()
            .find(|m| self.structure.measure(m).is_none())
        {
            return Err(Error::Config(format!("unknown measure '{}'", unknown)));
        }
        let fields = self.structure.measures_in(&layout.measures);
        if fields.is_empty() {
            return Err(Error::Config("input carries no measures".to_string()));
        }
        let measure_positions = fields
            .iter()
            .filter_map(|f| layout.measure_position(f))
            .collect();

        Ok(IngestionLayout {
            key_positions,
            key_types,
            fields,
            measure_positions,
        })
    }

    /// Aggregate `rows` into new chunks and make them durable.
    ///
    /// The layout is validated before any I/O. Any failed read of the input
    /// or write of a chunk fails the whole call; chunks already written are not
    /// returned.
    pub async fn consume(&self, layout: &RecordLayout, mut rows: RecordStream) -> Result<AggregationDiff> {
        let started = Instant::now();
        let resolved = self.resolve(layout)?;
        let reducers = self.structure.reducers(&resolved.fields)?;

        let mut reducer = GroupReducer::new(
            resolved.key_positions.clone(),
            resolved.measure_positions.clone(),
            reducers,
            self.chunk_size,
        );
        let mut chunker = Chunker::new(
            self.storage.clone(),
            self.structure.key_names(),
            resolved.fields.clone(),
            self.chunk_size,
            self.structure.partitioning_key_len(),
            self.max_in_flight_writes,
        );

        let mut input_rows = 0u64;
        while let Some(record) = rows.next().await {
            let record = record?;
            layout.check(&record)?;
            check_key_types(&record.keys, &resolved)?;
            input_rows += 1;
            if let Some(batch) = reducer.push(&record) {
                for row in batch {
                    chunker.push(row).await?;
                }
                chunker.end_batch().await?;
            }
        }
        for row in reducer.take() {
            chunker.push(row).await?;
        }

        let chunks = chunker.finish().await?;
        let ids: Vec<ChunkId> = chunks.iter().map(|c| c.id).collect();
        if !ids.is_empty() {
            self.storage.finish(&ids).await?;
        }

        info!(
            rows = input_rows,
            chunks = ids.len(),
            fields = ?resolved.fields,
            duration_ms = started.elapsed().as_millis() as u64,
            "Consumed rows"
        );
        Ok(AggregationDiff::added(chunks))
    }
}

fn check_key_types(keys: &[Value], layout: &IngestionLayout) -> Result<()> {
    for (&position, &field_type) in layout.key_positions.iter().zip(&layout.key_types) {
        let value = &keys[position];
        if !value.conforms_to(field_type) {
            return Err(Error::InvalidSchema(format!(
                "key value {} is not of type {}",
                value, field_type
            )));
        }
    }
    Ok(())
}

//! Chunk catalog
//!
//! The catalog owns every chunk descriptor of an aggregation and indexes them
//! once per key-prefix length: index `p` holds each chunk under
//! `[min_key.prefix(p), max_key.prefix(p)]`, so a range scan of prefix length
//! `p` is a single interval query. All mutation goes through
//! [`ChunkCatalog::add`], [`ChunkCatalog::remove`] or
//! [`ChunkCatalog::apply_diff`].

mod consolidation;

pub use consolidation::{ConsolidationSelection, PickingStrategy};

use crate::chunk::{AggregationDiff, Chunk, ChunkId};
use crate::index::RangeIndex;
use crate::predicate::{to_range_scan, Predicate, RangeScan};
use crate::schema::{AggregationStructure, PrimaryKey};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Breakpoint summary of the full-length index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationDebugInfo {
    pub key: PrimaryKey,
    pub continuing: BTreeSet<Chunk>,
    pub closing: BTreeSet<Chunk>,
    pub overlaps: usize,
}

/// Chunk descriptors plus one range index per key-prefix length
#[derive(Debug, Clone)]
pub struct ChunkCatalog {
    keys: Vec<String>,
    partitioning_key_len: usize,
    chunks: BTreeMap<ChunkId, Chunk>,
    prefix_ranges: Vec<RangeIndex<PrimaryKey, Chunk>>,
}

impl ChunkCatalog {
    pub fn new(keys: Vec<String>, partitioning_key_len: usize) -> Self {
        let prefix_ranges = (0..=keys.len()).map(|_| RangeIndex::new()).collect();
        Self {
            partitioning_key_len: partitioning_key_len.min(keys.len()),
            keys,
            chunks: BTreeMap::new(),
            prefix_ranges,
        }
    }

    pub fn for_structure(structure: &AggregationStructure) -> Self {
        Self::new(structure.key_names(), structure.partitioning_key_len())
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.chunks.contains_key(&id)
    }

    /// Chunks ordered by id
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Register a chunk in the id map and every prefix index
    pub fn add(&mut self, chunk: Chunk) -> Result<()> {
        self.check_key_arity(&chunk)?;
        if self.chunks.contains_key(&chunk.id) {
            return Err(Error::Conflict(format!("chunk {} is already registered", chunk.id)));
        }
        for (len, index) in self.prefix_ranges.iter_mut().enumerate() {
            index.insert(chunk.min_key.prefix(len), chunk.max_key.prefix(len), chunk.clone());
        }
        debug!(chunk_id = chunk.id, "Added chunk to catalog");
        self.chunks.insert(chunk.id, chunk);
        Ok(())
    }

    /// Unregister a chunk by id
    pub fn remove(&mut self, id: ChunkId) -> Result<Chunk> {
        let chunk = self.chunks.remove(&id).ok_or(Error::ChunkNotFound(id))?;
        for (len, index) in self.prefix_ranges.iter_mut().enumerate() {
            index.remove(&chunk.min_key.prefix(len), &chunk.max_key.prefix(len), &chunk);
        }
        debug!(chunk_id = id, "Removed chunk from catalog");
        Ok(chunk)
    }

    /// Apply a diff atomically: the whole diff is validated before the catalog
    /// changes, so a rejected diff leaves it untouched.
    pub fn apply_diff(&mut self, diff: &AggregationDiff) -> Result<()> {
        for chunk in &diff.removed {
            if !self.chunks.contains_key(&chunk.id) && !diff.added.contains(chunk) {
                return Err(Error::ChunkNotFound(chunk.id));
            }
        }
        for chunk in &diff.added {
            self.check_key_arity(chunk)?;
            if self.chunks.contains_key(&chunk.id) {
                return Err(Error::Conflict(format!(
                    "chunk {} is already registered",
                    chunk.id
                )));
            }
        }

        for chunk in &diff.added {
            self.add(chunk.clone())?;
        }
        for chunk in &diff.removed {
            self.remove(chunk.id)?;
        }
        Ok(())
    }

    /// Drop every chunk
    pub fn clear(&mut self) {
        self.chunks.clear();
        for index in self.prefix_ranges.iter_mut() {
            *index = RangeIndex::new();
        }
    }

    /// Chunks that may hold rows matching `predicate` and store at least one of
    /// `fields`, ordered by min key.
    pub fn find_chunks(&self, predicate: &Predicate, fields: &[String]) -> Vec<Chunk> {
        let (from, to) = match to_range_scan(predicate, &self.keys) {
            RangeScan::NoScan => return Vec::new(),
            RangeScan::Scan { from, to } => (from, to),
        };
        let index = &self.prefix_ranges[from.len()];
        let mut chunks: Vec<Chunk> = index
            .range_query(&from, &to)
            .into_iter()
            .filter(|chunk| chunk.has_any_field(fields))
            .collect();
        sort_by_min_key(&mut chunks);
        chunks
    }

    /// Chunks sharing a full-key breakpoint with at least one other chunk
    pub fn find_overlapping_chunks(&self) -> BTreeSet<Chunk> {
        self.full_index()
            .segments()
            .values()
            .filter(|segment| segment.overlap() >= 2)
            .flat_map(|segment| segment.values())
            .collect()
    }

    /// Per-breakpoint view of the full-length index
    pub fn consolidation_debug_info(&self) -> Vec<ConsolidationDebugInfo> {
        self.full_index()
            .segments()
            .iter()
            .map(|(key, segment)| ConsolidationDebugInfo {
                key: key.clone(),
                continuing: segment.continuing.clone(),
                closing: segment.closing.clone(),
                overlaps: segment.overlap(),
            })
            .collect()
    }

    fn full_index(&self) -> &RangeIndex<PrimaryKey, Chunk> {
        &self.prefix_ranges[self.keys.len()]
    }

    fn check_key_arity(&self, chunk: &Chunk) -> Result<()> {
        if chunk.min_key.len() != self.keys.len() || chunk.max_key.len() != self.keys.len() {
            return Err(Error::InvalidSchema(format!(
                "chunk {} keys have {} and {} columns, aggregation has {}",
                chunk.id,
                chunk.min_key.len(),
                chunk.max_key.len(),
                self.keys.len()
            )));
        }
        Ok(())
    }
}

pub(crate) fn sort_by_min_key(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| a.min_key.cmp(&b.min_key).then(a.id.cmp(&b.id)));
}

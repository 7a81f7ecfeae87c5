//! Consolidation chunk selection
//!
//! Selection runs in two steps. A picking strategy proposes a group of chunks:
//!
//! - **Partitioning**: some chunk straddles a partition boundary, so those
//!   chunks are rewritten first and nothing else runs this cycle.
//! - **MinKey**: the lowest breakpoint of a partition where chunks overlap.
//! - **SizeFix**: no overlap, but a chunk whose row count is off the optimal
//!   chunk size; the chunks from that breakpoint onwards are taken.
//! - **HotSegment**: the breakpoint(s) with the highest overlap overall.
//!
//! Then the group is trimmed to the chunk budget, or expanded over the key
//! range it spans so that the rewrite leaves no new overlap behind.

use super::{sort_by_min_key, ChunkCatalog};
use crate::chunk::Chunk;
use crate::index::RangeIndex;
use crate::schema::PrimaryKey;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound::{Included, Unbounded};
use tracing::info;

const MIN_OVERLAPS: usize = 2;
const MIN_CHUNKS: usize = 2;

/// Strategy that produced a consolidation selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PickingStrategy {
    Partitioning,
    HotSegment,
    MinKey,
    SizeFix,
}

impl fmt::Display for PickingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PickingStrategy::Partitioning => "partitioning",
            PickingStrategy::HotSegment => "hot_segment",
            PickingStrategy::MinKey => "min_key",
            PickingStrategy::SizeFix => "size_fix",
        };
        f.write_str(name)
    }
}

/// Chunks chosen for one consolidation, ordered by min key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationSelection {
    pub strategy: PickingStrategy,
    pub chunks: Vec<Chunk>,
}

impl ConsolidationSelection {
    fn new(strategy: PickingStrategy, mut chunks: Vec<Chunk>) -> Self {
        sort_by_min_key(&mut chunks);
        info!(
            chunks = chunks.len(),
            ids = ?chunks.iter().map(|c| c.id).collect::<Vec<_>>(),
            strategy = %strategy,
            "Chunks selected for consolidation"
        );
        Self { strategy, chunks }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl ChunkCatalog {
    /// Select chunks by partitioning, then min-key overlap, then size fix
    pub fn find_chunks_for_consolidation_min_key(
        &self,
        max_chunks: usize,
        optimal_chunk_size: u64,
    ) -> ConsolidationSelection {
        let Some(partitions) = self.group_by_partition() else {
            let chunks = self.find_chunks_for_partitioning(max_chunks);
            let selected = process_selection(
                chunks,
                max_chunks,
                self.full_index(),
                PickingStrategy::Partitioning,
            );
            return ConsolidationSelection::new(PickingStrategy::Partitioning, selected);
        };

        for tree in partitions.values() {
            let (strategy, chunks) = pick_min_key_or_size_fix(tree, max_chunks, optimal_chunk_size);
            if chunks.len() >= MIN_CHUNKS {
                let selected = process_selection(chunks, max_chunks, tree, strategy);
                return ConsolidationSelection::new(strategy, selected);
            }
        }
        ConsolidationSelection::new(PickingStrategy::MinKey, Vec::new())
    }

    /// Select the chunks around the most overlapped breakpoint
    pub fn find_chunks_for_consolidation_hot_segment(
        &self,
        max_chunks: usize,
    ) -> ConsolidationSelection {
        let tree = self.full_index();
        let chunks = most_overlapped(tree);
        let selected = process_selection(chunks, max_chunks, tree, PickingStrategy::HotSegment);
        ConsolidationSelection::new(PickingStrategy::HotSegment, selected)
    }

    /// One full-key index per partition value, or `None` when any chunk
    /// straddles a partition boundary.
    fn group_by_partition(&self) -> Option<BTreeMap<PrimaryKey, RangeIndex<PrimaryKey, Chunk>>> {
        let mut partitions: BTreeMap<PrimaryKey, RangeIndex<PrimaryKey, Chunk>> = BTreeMap::new();
        for chunk in self.chunks() {
            if !chunk.is_partitioned(self.partitioning_key_len) {
                return None;
            }
            partitions
                .entry(chunk.min_key.prefix(self.partitioning_key_len))
                .or_default()
                .insert(chunk.min_key.clone(), chunk.max_key.clone(), chunk.clone());
        }
        Some(partitions)
    }

    fn find_chunks_for_partitioning(&self, max_chunks: usize) -> Vec<Chunk> {
        let mut all: Vec<Chunk> = self.chunks().cloned().collect();
        sort_by_min_key(&mut all);
        all.into_iter()
            .filter(|chunk| !chunk.is_partitioned(self.partitioning_key_len))
            .take(max_chunks)
            .collect()
    }
}

fn pick_min_key_or_size_fix(
    tree: &RangeIndex<PrimaryKey, Chunk>,
    max_chunks: usize,
    optimal_chunk_size: u64,
) -> (PickingStrategy, Vec<Chunk>) {
    let mut size_fix_start = None;
    for (key, segment) in tree.segments() {
        let overlaps = segment.overlap();
        if overlaps >= MIN_OVERLAPS {
            return (PickingStrategy::MinKey, segment.values().into_iter().collect());
        }
        if overlaps == 1 {
            let off_size = segment
                .values()
                .iter()
                .next()
                .is_some_and(|chunk| chunk.count != optimal_chunk_size);
            if off_size {
                size_fix_start = Some(key);
                break;
            }
        }
    }

    let Some(start) = size_fix_start else {
        return (PickingStrategy::SizeFix, Vec::new());
    };

    let mut chunks = BTreeSet::new();
    for (_, segment) in tree.segments().range((Included(start), Unbounded)) {
        if chunks.len() >= max_chunks {
            break;
        }
        chunks.extend(segment.values());
    }
    (PickingStrategy::SizeFix, chunks.into_iter().collect())
}

/// Chunks at the breakpoint with the highest overlap; on ties the last such
/// breakpoint wins.
fn most_overlapped(tree: &RangeIndex<PrimaryKey, Chunk>) -> Vec<Chunk> {
    let mut max_overlaps = MIN_OVERLAPS;
    let mut result = Vec::new();
    for segment in tree.segments().values() {
        let overlaps = segment.overlap();
        if overlaps >= max_overlaps {
            max_overlaps = overlaps;
            result = segment.values().into_iter().collect();
        }
    }
    result
}

fn process_selection(
    chunks: Vec<Chunk>,
    max_chunks: usize,
    tree: &RangeIndex<PrimaryKey, Chunk>,
    strategy: PickingStrategy,
) -> Vec<Chunk> {
    if chunks.is_empty() || chunks.len() == max_chunks {
        return chunks;
    }
    if chunks.len() > max_chunks {
        return trim(chunks, max_chunks);
    }
    if strategy == PickingStrategy::SizeFix {
        return chunks;
    }

    let mut set: BTreeSet<Chunk> = chunks.into_iter().collect();
    while set.len() < max_chunks && expand_range(tree, &mut set) {}
    trim(set.into_iter().collect(), max_chunks)
}

fn trim(mut chunks: Vec<Chunk>, max_chunks: usize) -> Vec<Chunk> {
    sort_by_min_key(&mut chunks);
    chunks.truncate(max_chunks);
    chunks
}

/// Add every chunk intersecting the key range spanned by `chunks`. Returns
/// whether the set grew.
fn expand_range(tree: &RangeIndex<PrimaryKey, Chunk>, chunks: &mut BTreeSet<Chunk>) -> bool {
    let Some(min_key) = chunks.iter().map(|c| &c.min_key).min().cloned() else {
        return false;
    };
    let Some(max_key) = chunks.iter().map(|c| &c.max_key).max().cloned() else {
        return false;
    };
    let before = chunks.len();
    chunks.extend(tree.range_query(&min_key, &max_key));
    chunks.len() > before
}

#[cfg(test)]
mod tests {
    use crate::catalog::*;
    use crate::chunk::{Chunk, ChunkId};
    use crate::key;
    use crate::schema::PrimaryKey;

    fn chunk(id: ChunkId, min: PrimaryKey, max: PrimaryKey, count: u64) -> Chunk {
        Chunk::new(id, vec!["clicks".into()], min, max, count).unwrap()
    }

    fn catalog(partitioning_key_len: usize, chunks: Vec<Chunk>) -> ChunkCatalog {
        let mut catalog =
            ChunkCatalog::new(vec!["day".into(), "hour".into()], partitioning_key_len);
        for c in chunks {
            catalog.add(c).unwrap();
        }
        catalog
    }

    fn ids(selection: &ConsolidationSelection) -> Vec<ChunkId> {
        selection.chunks.iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_partitioning_takes_priority() {
        let catalog = catalog(
            1,
            vec![
                chunk(1, key![1, 0], key![1, 1], 10),
                chunk(2, key![1, 0], key![1, 5], 10),
                chunk(3, key![1, 8], key![2, 2], 10),
                chunk(4, key![5, 0], key![5, 1], 10),
            ],
        );
        let selection = catalog.find_chunks_for_consolidation_min_key(100, 10);
        assert_eq!(selection.strategy, PickingStrategy::Partitioning);
        // The straddling chunk is expanded over the range it spans.
        assert_eq!(ids(&selection), vec![3]);

        let wide = self::catalog(
            1,
            vec![
                chunk(1, key![1, 0], key![1, 9], 10),
                chunk(2, key![1, 5], key![2, 2], 10),
            ],
        );
        let selection = wide.find_chunks_for_consolidation_min_key(100, 10);
        assert_eq!(selection.strategy, PickingStrategy::Partitioning);
        assert_eq!(ids(&selection), vec![1, 2]);
    }

    #[test]
    fn test_min_key_picks_first_overlap() {
        let catalog = catalog(
            1,
            vec![
                chunk(1, key![1, 0], key![1, 1], 10),
                chunk(2, key![1, 3], key![1, 6], 10),
                chunk(3, key![1, 5], key![1, 9], 10),
                chunk(4, key![2, 0], key![2, 5], 10),
                chunk(5, key![2, 1], key![2, 6], 10),
            ],
        );
        let selection = catalog.find_chunks_for_consolidation_min_key(100, 10);
        assert_eq!(selection.strategy, PickingStrategy::MinKey);
        assert_eq!(ids(&selection), vec![2, 3]);
    }

    #[test]
    fn test_min_key_expands_over_range() {
        let catalog = catalog(
            0,
            vec![
                chunk(1, key![1, 0], key![1, 4], 10),
                chunk(2, key![1, 2], key![1, 9], 10),
                chunk(3, key![1, 6], key![1, 7], 10),
            ],
        );
        let selection = catalog.find_chunks_for_consolidation_min_key(100, 10);
        assert_eq!(selection.strategy, PickingStrategy::MinKey);
        assert_eq!(ids(&selection), vec![1, 2, 3]);
    }

    #[test]
    fn test_size_fix_collects_tail() {
        let catalog = catalog(
            0,
            vec![
                chunk(1, key![1, 0], key![1, 1], 10),
                chunk(2, key![1, 2], key![1, 3], 4),
                chunk(3, key![1, 4], key![1, 5], 10),
            ],
        );
        let selection = catalog.find_chunks_for_consolidation_min_key(100, 10);
        assert_eq!(selection.strategy, PickingStrategy::SizeFix);
        assert_eq!(ids(&selection), vec![2, 3]);
    }

    #[test]
    fn test_size_fix_discards_small_singleton() {
        let catalog = catalog(
            0,
            vec![
                chunk(1, key![1, 0], key![1, 1], 10),
                chunk(2, key![1, 2], key![1, 3], 4),
            ],
        );
        let selection = catalog.find_chunks_for_consolidation_min_key(100, 10);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_oversized_singleton_partition_is_skipped() {
        let lone = catalog(0, vec![chunk(1, key![1, 0], key![1, 1], 25)]);
        assert!(lone.find_chunks_for_consolidation_min_key(100, 10).is_empty());

        let catalog = catalog(
            1,
            vec![
                chunk(1, key![1, 0], key![1, 9], 25),
                chunk(2, key![2, 0], key![2, 5], 10),
                chunk(3, key![2, 3], key![2, 8], 10),
            ],
        );
        let selection = catalog.find_chunks_for_consolidation_min_key(100, 10);
        assert_eq!(selection.strategy, PickingStrategy::MinKey);
        assert_eq!(ids(&selection), vec![2, 3]);
    }

    #[test]
    fn test_nothing_to_consolidate() {
        let catalog = catalog(
            1,
            vec![
                chunk(1, key![1, 0], key![1, 1], 10),
                chunk(2, key![2, 2], key![2, 3], 10),
            ],
        );
        assert!(catalog
            .find_chunks_for_consolidation_min_key(100, 10)
            .is_empty());
        assert!(catalog
            .find_chunks_for_consolidation_hot_segment(100)
            .is_empty());
    }

    #[test]
    fn test_hot_segment_picks_max_overlap() {
        let catalog = catalog(
            0,
            vec![
                chunk(1, key![1, 0], key![1, 2], 10),
                chunk(2, key![1, 1], key![1, 3], 10),
                chunk(3, key![5, 0], key![5, 9], 10),
                chunk(4, key![5, 1], key![5, 8], 10),
                chunk(5, key![5, 2], key![5, 7], 10),
            ],
        );
        let selection = catalog.find_chunks_for_consolidation_hot_segment(100);
        assert_eq!(selection.strategy, PickingStrategy::HotSegment);
        assert_eq!(ids(&selection), vec![3, 4, 5]);
    }

    #[test]
    fn test_selection_respects_budget() {
        let chunks: Vec<Chunk> = (0..20)
            .map(|i| chunk(i, key![1, i as i64], key![1, 100], 10))
            .collect();
        let catalog = catalog(1, chunks);
        for max in [1usize, 2, 5, 19, 20, 50] {
            let min_key = catalog.find_chunks_for_consolidation_min_key(max, 10);
            assert!(min_key.chunks.len() <= max);
            let hot = catalog.find_chunks_for_consolidation_hot_segment(max);
            assert!(hot.chunks.len() <= max);
        }
        let trimmed = catalog.find_chunks_for_consolidation_hot_segment(3);
        assert_eq!(ids(&trimmed), vec![0, 1, 2]);
    }
}

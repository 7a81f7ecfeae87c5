//! Chunk descriptors and catalog diffs

use crate::schema::PrimaryKey;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Chunk identifier
pub type ChunkId = u64;

/// Immutable descriptor of one stored chunk.
///
/// Identity is the chunk id: equality, ordering and hashing ignore the other
/// attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    /// Measures stored in the chunk
    pub fields: Vec<String>,
    pub min_key: PrimaryKey,
    pub max_key: PrimaryKey,
    /// Number of rows
    pub count: u64,
}

impl Chunk {
    pub fn new(
        id: ChunkId,
        fields: Vec<String>,
        min_key: PrimaryKey,
        max_key: PrimaryKey,
        count: u64,
    ) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::InvalidSchema(format!("chunk {} has no fields", id)));
        }
        if min_key > max_key {
            return Err(Error::InvalidSchema(format!(
                "chunk {} has min key {} above max key {}",
                id, min_key, max_key
            )));
        }
        Ok(Self {
            id,
            fields,
            min_key,
            max_key,
            count,
        })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// Whether any of `fields` is stored in this chunk
    pub fn has_any_field(&self, fields: &[String]) -> bool {
        fields.iter().any(|f| self.has_field(f))
    }

    /// Whether the chunk's key range crosses a partition boundary
    pub fn is_partitioned(&self, partitioning_key_len: usize) -> bool {
        self.min_key
            .shares_prefix(&self.max_key, partitioning_key_len)
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Chunk {}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Chunk {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}..{} ({} rows, {:?})",
            self.id, self.min_key, self.max_key, self.count, self.fields
        )
    }
}

/// Atomic change to a chunk catalog: chunks added and chunks removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationDiff {
    pub added: BTreeSet<Chunk>,
    pub removed: BTreeSet<Chunk>,
}

impl AggregationDiff {
    pub fn new(added: BTreeSet<Chunk>, removed: BTreeSet<Chunk>) -> Self {
        Self { added, removed }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Diff that only adds chunks
    pub fn added<I: IntoIterator<Item = Chunk>>(chunks: I) -> Self {
        Self {
            added: chunks.into_iter().collect(),
            removed: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn added_ids(&self) -> Vec<ChunkId> {
        self.added.iter().map(|c| c.id).collect()
    }

    pub fn removed_ids(&self) -> Vec<ChunkId> {
        self.removed.iter().map(|c| c.id).collect()
    }

    /// Combine with a later diff
    pub fn merge(mut self, other: AggregationDiff) -> Self {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self
    }
}

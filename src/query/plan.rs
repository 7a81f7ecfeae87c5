//! Read plans
//!
//! Chunks are split, per subset of requested fields, into the fewest runs of
//! chunks whose key ranges strictly increase. Reading a run chunk after chunk
//! yields rows sorted by primary key with no key repeated, so runs can be
//! merged without buffering.

use crate::catalog::sort_by_min_key;
use crate::chunk::{Chunk, ChunkId};
use crate::schema::PrimaryKey;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Chunks read one after another for the same fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// Requested fields stored by every chunk of the sequence
    pub fields: Vec<String>,
    /// Chunks ordered by key range
    pub chunks: Vec<Chunk>,
}

impl Sequence {
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.chunks.iter().map(|c| c.id).collect()
    }

    fn max_key(&self) -> Option<&PrimaryKey> {
        self.chunks.last().map(|c| &c.max_key)
    }
}

/// Sequences covering every planned chunk exactly once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    pub sequences: Vec<Sequence>,
}

impl QueryPlan {
    pub fn chunk_count(&self) -> usize {
        self.sequences.iter().map(|s| s.chunks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "plan: {} sequences", self.sequences.len())?;
        for (i, sequence) in self.sequences.iter().enumerate() {
            let ids: Vec<String> = sequence.chunks.iter().map(|c| c.id.to_string()).collect();
            writeln!(
                f,
                "  sequence {} [{}]: {}",
                i,
                sequence.fields.join(", "),
                ids.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Split `chunks` into sequences for `query_fields`.
///
/// Chunks are visited by ascending min key. A chunk extends the open sequence
/// of its field subset with the greatest max key strictly below the chunk's min
/// key, or starts a new sequence when there is none. Chunks storing none of the
/// requested fields are left out.
pub fn create_plan(mut chunks: Vec<Chunk>, query_fields: &[String]) -> QueryPlan {
    sort_by_min_key(&mut chunks);

    let mut sequences: Vec<Sequence> = Vec::new();
    // field subset -> max key of an open sequence -> sequence indexes
    let mut open: HashMap<Vec<String>, BTreeMap<PrimaryKey, Vec<usize>>> = HashMap::new();

    for chunk in chunks {
        let fields: Vec<String> = query_fields
            .iter()
            .filter(|f| chunk.has_field(f))
            .cloned()
            .collect();
        if fields.is_empty() {
            debug!(chunk_id = chunk.id, "Chunk stores no requested field");
            continue;
        }

        let ends = open.entry(fields.clone()).or_default();
        let reusable = ends
            .range(..chunk.min_key.clone())
            .next_back()
            .map(|(key, _)| key.clone());
        let index = match reusable.and_then(|key| pop_sequence(ends, &key)) {
            Some(index) => index,
            None => {
                sequences.push(Sequence {
                    fields,
                    chunks: Vec::new(),
                });
                sequences.len() - 1
            }
        };

        let sequence = &mut sequences[index];
        sequence.chunks.push(chunk);
        if let Some(max_key) = sequence.max_key() {
            ends.entry(max_key.clone()).or_default().push(index);
        }
    }

    QueryPlan { sequences }
}

fn pop_sequence(ends: &mut BTreeMap<PrimaryKey, Vec<usize>>, key: &PrimaryKey) -> Option<usize> {
    let stack = ends.get_mut(key)?;
    let index = stack.pop();
    if stack.is_empty() {
        ends.remove(key);
    }
    index
}

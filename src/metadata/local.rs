//! Local in-memory metadata store for development and testing

use super::{LoadedChunks, MetadataStore};
use crate::chunk::{Chunk, ChunkId};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// One committed change
#[derive(Debug, Clone)]
struct RevisionEntry {
    revision: u64,
    added: Vec<Chunk>,
    removed: Vec<ChunkId>,
}

#[derive(Debug, Default)]
struct State {
    revision: u64,
    log: Vec<RevisionEntry>,
    live: BTreeMap<ChunkId, Chunk>,
    consolidating: HashSet<ChunkId>,
}

impl State {
    fn commit(&mut self, added: Vec<Chunk>, removed: Vec<ChunkId>) -> u64 {
        self.revision += 1;
        for id in &removed {
            self.live.remove(id);
            self.consolidating.remove(id);
        }
        for chunk in &added {
            self.live.insert(chunk.id, chunk.clone());
        }
        self.log.push(RevisionEntry {
            revision: self.revision,
            added,
            removed,
        });
        self.revision
    }
}

/// Local in-memory metadata store
///
/// Keeps the full revision log, suitable for tests and single-process
/// deployments.
#[derive(Debug, Default)]
pub struct LocalMetadataStore {
    next_id: AtomicU64,
    state: RwLock<State>,
}

impl LocalMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest committed revision
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Chunks currently live
    pub fn live_chunks(&self) -> Vec<Chunk> {
        self.state.read().live.values().cloned().collect()
    }

    /// Ids currently marked for consolidation
    pub fn consolidating(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.state.read().consolidating.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl MetadataStore for LocalMetadataStore {
    async fn create_chunk_id(&self) -> Result<ChunkId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn save_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write();
        if let Some(chunk) = chunks.iter().find(|c| state.live.contains_key(&c.id)) {
            return Err(Error::Conflict(format!("chunk {} already saved", chunk.id)));
        }
        let revision = state.commit(chunks.to_vec(), Vec::new());
        debug!(revision, chunks = chunks.len(), "Saved chunks");
        Ok(())
    }

    async fn load_chunks(&self, since_revision: u64) -> Result<LoadedChunks> {
        let state = self.state.read();
        if since_revision > state.revision {
            return Err(Error::Metadata(format!(
                "revision {} is ahead of store revision {}",
                since_revision, state.revision
            )));
        }
        if since_revision == 0 {
            return Ok(LoadedChunks {
                revision: state.revision,
                removed: Vec::new(),
                added: state.live.values().cloned().collect(),
            });
        }

        let mut added: BTreeMap<ChunkId, Chunk> = BTreeMap::new();
        let mut removed = Vec::new();
        for entry in state.log.iter().filter(|e| e.revision > since_revision) {
            for chunk in &entry.added {
                added.insert(chunk.id, chunk.clone());
            }
            for id in &entry.removed {
                if added.remove(id).is_none() {
                    removed.push(*id);
                }
            }
        }
        Ok(LoadedChunks {
            revision: state.revision,
            removed,
            added: added.into_values().collect(),
        })
    }

    async fn start_consolidation(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write();
        for chunk in chunks {
            if !state.live.contains_key(&chunk.id) {
                return Err(Error::Conflict(format!("chunk {} is not live", chunk.id)));
            }
            if state.consolidating.contains(&chunk.id) {
                return Err(Error::Conflict(format!(
                    "chunk {} is already being consolidated",
                    chunk.id
                )));
            }
        }
        state.consolidating.extend(chunks.iter().map(|c| c.id));
        info!(chunks = chunks.len(), "Started consolidation");
        Ok(())
    }

    async fn cancel_consolidation(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write();
        for chunk in chunks {
            state.consolidating.remove(&chunk.id);
        }
        Ok(())
    }

    async fn save_consolidated_chunks(
        &self,
        original: &[Chunk],
        replacement: &[Chunk],
    ) -> Result<()> {
        let mut state = self.state.write();
        if let Some(chunk) = original.iter().find(|c| !state.live.contains_key(&c.id)) {
            return Err(Error::Conflict(format!(
                "consolidated chunk {} is no longer live",
                chunk.id
            )));
        }
        let revision = state.commit(
            replacement.to_vec(),
            original.iter().map(|c| c.id).collect(),
        );
        info!(
            revision,
            removed = original.len(),
            added = replacement.len(),
            "Saved consolidated chunks"
        );
        Ok(())
    }
}

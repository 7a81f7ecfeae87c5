//! Chunk metadata store
//!
//! The metadata store is the durable record of which chunks make up an
//! aggregation. Every committed change bumps a revision, so an in-memory
//! catalog can catch up by loading only the changes since the revision it last
//! saw.

mod client;
mod local;

pub use client::MetadataStore;
pub use local::LocalMetadataStore;

use crate::chunk::{Chunk, ChunkId};

/// Chunk changes committed after some revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedChunks {
    /// Revision the changes bring a reader up to
    pub revision: u64,
    /// Chunks removed since the requested revision
    pub removed: Vec<ChunkId>,
    /// Chunks added since the requested revision and still live
    pub added: Vec<Chunk>,
}

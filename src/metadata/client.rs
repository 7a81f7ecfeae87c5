//! Metadata store trait

use super::LoadedChunks;
use crate::chunk::{Chunk, ChunkId};
use crate::Result;
use async_trait::async_trait;

/// Metadata store interface
///
/// Abstracts the durable chunk registry so the catalog can run against an
/// in-process store in tests and a shared database in production.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Allocate a fresh chunk id
    async fn create_chunk_id(&self) -> Result<ChunkId>;

    /// Register newly ingested chunks
    async fn save_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Changes committed after `since_revision`; revision 0 loads everything
    async fn load_chunks(&self, since_revision: u64) -> Result<LoadedChunks>;

    /// Mark chunks as being consolidated
    async fn start_consolidation(&self, chunks: &[Chunk]) -> Result<()>;

    /// Release chunks marked by `start_consolidation` without replacing them
    async fn cancel_consolidation(&self, chunks: &[Chunk]) -> Result<()>;

    /// Replace consolidated chunks with their replacement in one revision
    async fn save_consolidated_chunks(&self, original: &[Chunk], replacement: &[Chunk])
        -> Result<()>;
}

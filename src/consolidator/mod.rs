//! Background consolidation service
//!
//! The consolidator keeps an aggregation's read amplification bounded. Every
//! cycle it:
//! - reloads the catalog from the metadata store
//! - picks chunks (hot segment every Nth cycle, min-key otherwise)
//! - marks them in the metadata store so no other process rewrites them
//! - rewrites them and commits the replacement as one diff
//!
//! A failed cycle is logged and releases its chunks; the next tick tries again.

use crate::aggregation::Aggregation;
use crate::catalog::PickingStrategy;
use crate::chunk::{AggregationDiff, Chunk};
use crate::metadata::MetadataStore;
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consolidator configuration
#[derive(Debug, Clone)]
pub struct ConsolidatorConfig {
    /// Time between cycles
    pub check_interval: Duration,
    /// Every Nth cycle targets the hot segment; 0 disables it
    pub hot_segment_every: u64,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60), // Check every minute
            hot_segment_every: 10,
        }
    }
}

/// Consolidator service
pub struct Consolidator {
    config: ConsolidatorConfig,
    aggregation: Arc<RwLock<Aggregation>>,
    metadata: Arc<dyn MetadataStore>,
    /// Cycles started so far
    cycles: AtomicU64,
    /// Cancellation token for graceful shutdown
    shutdown: CancellationToken,
}

impl Consolidator {
    pub fn new(
        config: ConsolidatorConfig,
        aggregation: Arc<RwLock<Aggregation>>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            aggregation,
            metadata,
            cycles: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get a cancellation token that can be used to trigger graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Run the main service loop. Returns when the shutdown token is cancelled.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.check_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Consolidation cycle failed");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Consolidator shutting down gracefully");
                    break;
                }
            }
        }
    }

    fn strategy_for_cycle(&self, cycle: u64) -> PickingStrategy {
        let every = self.config.hot_segment_every;
        if every > 0 && cycle % every == 0 {
            PickingStrategy::HotSegment
        } else {
            PickingStrategy::MinKey
        }
    }

    /// Run one consolidation cycle and return the committed diff
    pub async fn run_cycle(&self) -> Result<AggregationDiff> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let strategy = self.strategy_for_cycle(cycle);

        {
            let mut aggregation = self.aggregation.write().await;
            aggregation.load_chunks(self.metadata.as_ref()).await?;
        }

        let diff = {
            let aggregation = self.aggregation.read().await;
            let selection = aggregation.select_for_consolidation(strategy);
            if selection.is_empty() {
                debug!(cycle, strategy = %strategy, "Nothing to consolidate");
                return Ok(AggregationDiff::empty());
            }

            self.metadata.start_consolidation(&selection.chunks).await?;
            match aggregation.consolidate_selection(&selection).await {
                Ok(diff) if diff.is_empty() => {
                    self.release(&selection.chunks).await;
                    return Ok(diff);
                }
                Ok(diff) => diff,
                Err(e) => {
                    self.release(&selection.chunks).await;
                    return Err(e);
                }
            }
        };

        let mut aggregation = self.aggregation.write().await;
        if let Err(e) = aggregation.commit(self.metadata.as_ref(), &diff).await {
            let removed: Vec<Chunk> = diff.removed.iter().cloned().collect();
            self.release(&removed).await;
            return Err(e);
        }
        info!(
            cycle,
            strategy = %strategy,
            removed = diff.removed.len(),
            added = diff.added.len(),
            "Consolidation committed"
        );
        Ok(diff)
    }

    async fn release(&self, chunks: &[Chunk]) {
        if let Err(e) = self.metadata.cancel_consolidation(chunks).await {
            warn!(error = %e, chunks = chunks.len(), "Failed to release consolidation marks");
        }
    }
}

//! C1 — BlockTracker: the two persisted cursors `lastFetched` and
//! `lastProcessed`.
//!
//! Grounded on the reference service's `CheckpointManager`/`IndexerStateStore`
//! pairing (`indexer/checkpoint.rs`), generalized from one `last_block` slot
//! to the two independent cursors this pipeline requires.

use tracing::{debug, instrument};

use crate::error::Result;
use crate::ports::BlockTrackerStore;
use crate::types::BlockRef;

/// Owns the pipeline's two cursors through a [`BlockTrackerStore`].
///
/// A `BlockTracker` is the exclusive owner of
/// its cursors: callers outside the gate-holding fetch cycle must not write
/// to it directly.
#[derive(Debug)]
pub struct BlockTracker<S> {
    store: S,
}

impl<S> BlockTracker<S>
where
    S: BlockTrackerStore,
{
    /// Wrap a store in a block tracker.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// `getLastFetched`.
    #[instrument(skip(self))]
    pub async fn last_fetched(&self) -> Result<Option<BlockRef>> {
        Ok(self.store.get_last_fetched().await?)
    }

    /// `setLastFetched`: unconditional overwrite.
    #[instrument(skip(self), fields(block = %block.number))]
    pub async fn set_last_fetched(&self, block: BlockRef) -> Result<()> {
        self.store.set_last_fetched(block).await?;
        debug!("lastFetched updated");
        Ok(())
    }

    /// `getLastProcessed`.
    #[instrument(skip(self))]
    pub async fn last_processed(&self) -> Result<Option<BlockRef>> {
        Ok(self.store.get_last_processed().await?)
    }

    /// `setLastProcessedIfHigher`: updates only when `block.number` strictly
    /// exceeds the stored number, or when none is stored. The hash at the
    /// accepted number is always overwritten with the provided value.
    #[instrument(skip(self), fields(block = %block.number))]
    pub async fn set_last_processed_if_higher(&self, block: BlockRef) -> Result<()> {
        let current = self.store.get_last_processed().await?;
        let should_write = match current {
            None => true,
            Some(existing) => block.number > existing.number,
        };
        if should_write {
            self.store.set_last_processed(block).await?;
            debug!("lastProcessed advanced");
        } else {
            debug!(
                current = %current.map(|c| c.number.value()).unwrap_or_default(),
                "lastProcessed not advanced: incoming block not higher"
            );
        }
        Ok(())
    }

    /// Reference to the underlying store, e.g. for adapters that need the
    /// raw persistence handle.
    pub const fn store(&self) -> &S {
        &self.store
    }
}

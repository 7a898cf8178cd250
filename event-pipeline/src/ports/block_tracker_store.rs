//! Port over the block tracker's persistent key-value surface.
//!
//! Two slots per emitter scope: `lastFetchedBlock` and
//! `lastProcessedBlock`. Grounded on the reference service's
//! `IndexerStateStore` port, generalized from the single `last_block` slot
//! it models to the two independent cursors this pipeline requires.

use async_trait::async_trait;

use crate::error::InfraError;
use crate::types::BlockRef;

/// Durable storage for the two cursors a [`crate::pipeline::block_tracker::BlockTracker`] owns.
///
/// Writes must be durable before the caller's next observable progress
/// step — implementations backed by a remote database should
/// `await` the write to completion rather than fire-and-forget it.
#[async_trait]
pub trait BlockTrackerStore: Send + Sync {
    /// Read the `lastFetched` cursor.
    async fn get_last_fetched(&self) -> Result<Option<BlockRef>, InfraError>;

    /// Overwrite the `lastFetched` cursor unconditionally.
    async fn set_last_fetched(&self, block: BlockRef) -> Result<(), InfraError>;

    /// Read the `lastProcessed` cursor.
    async fn get_last_processed(&self) -> Result<Option<BlockRef>, InfraError>;

    /// Overwrite the `lastProcessed` cursor unconditionally.
    ///
    /// Callers wanting the "ifHigher" semantics should use
    /// [`crate::pipeline::block_tracker::BlockTracker::set_last_processed_if_higher`],
    /// which reads-then-writes through this method.
    async fn set_last_processed(&self, block: BlockRef) -> Result<(), InfraError>;
}

//! Channel payload types delivered through the [`crate::pipeline::dispatcher::Dispatcher`].
//!
//! The reference service exposes event delivery through a typed pub/sub
//! object with one callback signature per handler; here that is replaced by
//! an explicit [`Channel`] enum plus a single [`PipelineEvent`] sum type, one
//! variant per channel, following the per-channel payload redesign.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use super::buffered_event::BufferedEvent;
use super::log::LogRecord;
use super::primitives::BlockNumber;

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRESS / BATCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Progress of one fetched batch, emitted once per batch regardless of
/// whether it carried any confirmed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Number of batches completed so far in this `fetch` call, 1-indexed.
    pub steps_complete: u64,
    /// Total number of batches this `fetch` call will cover.
    pub total_steps: u64,
    /// First block number covered by this batch.
    pub step_from_block: BlockNumber,
    /// Last block number covered by this batch.
    pub step_to_block: BlockNumber,
}

/// One batch of fetched events, yielded from [`crate::pipeline::events_emitter::EventsEmitter::fetch`].
///
/// Only the *confirmed* events for the batch's range are attached; buffered
/// (unconfirmed) events are inserted directly through
/// [`crate::ports::ConfirmationBufferStore`] and are not yielded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Progress metadata for this batch.
    pub progress: ProgressInfo,
    /// Confirmed events for this batch's range, in `(block_number, log_index)` order.
    pub events: Vec<LogRecord>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIRMATION PAYLOADS
// ═══════════════════════════════════════════════════════════════════════════════

/// Payload for the `newConfirmation` channel: a buffered event has not yet
/// reached its target confirmation depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConfirmation {
    /// The log record awaiting confirmation.
    pub event: LogRecord,
    /// Current confirmation depth.
    pub confirmations: u64,
    /// Depth required before promotion.
    pub target_confirmation: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL / PIPELINE EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// The channels a [`Subscription`](crate::pipeline::dispatcher::Subscription) can be registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// A confirmed event, ready for delivery.
    NewEvent,
    /// Batch progress within a `fetch` cycle.
    Progress,
    /// A reorg was detected.
    Reorg,
    /// A reorg reached past `lastProcessed`; the library cannot repair it.
    ReorgOutOfRange,
    /// A buffered event's confirmation depth advanced but is not yet final.
    NewConfirmation,
    /// A buffered event's transaction was dropped by a reorg.
    InvalidConfirmation,
    /// `AutoEventsEmitter::init()` finished draining historical batches.
    InitFinished,
    /// A non-fatal pipeline failure.
    Error,
}

/// One payload delivered on a [`Channel`].
///
/// `#[non_exhaustive]` because new notification kinds may be added without
/// being a breaking change for consumers that match on a subset.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PipelineEvent {
    /// Delivered on [`Channel::NewEvent`].
    NewEvent(LogRecord),
    /// Delivered on [`Channel::Progress`].
    Progress(ProgressInfo),
    /// Delivered on [`Channel::Reorg`]; carries the block number the reorg
    /// was detected at.
    Reorg(BlockNumber),
    /// Delivered on [`Channel::ReorgOutOfRange`]; carries the
    /// `lastProcessed` block number that could not be repaired.
    ReorgOutOfRange(BlockNumber),
    /// Delivered on [`Channel::NewConfirmation`].
    NewConfirmation(NewConfirmation),
    /// Delivered on [`Channel::InvalidConfirmation`]; carries the dropped row.
    InvalidConfirmation(BufferedEvent),
    /// Delivered on [`Channel::InitFinished`]; carries the contract address
    /// whose historical drain completed.
    InitFinished(Address),
    /// Delivered on [`Channel::Error`].
    Error(String),
}

impl PipelineEvent {
    /// The channel this payload belongs to.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::NewEvent(_) => Channel::NewEvent,
            Self::Progress(_) => Channel::Progress,
            Self::Reorg(_) => Channel::Reorg,
            Self::ReorgOutOfRange(_) => Channel::ReorgOutOfRange,
            Self::NewConfirmation(_) => Channel::NewConfirmation,
            Self::InvalidConfirmation(_) => Channel::InvalidConfirmation,
            Self::InitFinished(_) => Channel::InitFinished,
            Self::Error(_) => Channel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_matches_variant() {
        assert_eq!(
            PipelineEvent::Reorg(BlockNumber::new(1)).channel(),
            Channel::Reorg
        );
        assert_eq!(
            PipelineEvent::Error("boom".into()).channel(),
            Channel::Error
        );
    }
}

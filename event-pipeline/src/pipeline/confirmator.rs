//! C5 — Confirmator: promotes buffered events as confirmation depth accrues.
//!
//! Grounded on the reference service's `indexer/reorg_handler.rs` depth and
//! rollback computations and the cursor-update pattern in
//! `indexer/checkpoint.rs`. This type holds only
//! non-owning references (`Arc<Dispatcher>`, `Arc<B>`, `Arc<BlockTracker<T>>`,
//! `Arc<L>`) and never a back-edge to [`crate::pipeline::events_emitter::EventsEmitter`],
//! breaking the cycle that a direct emitter reference would create.

use std::sync::Arc;

use alloy::primitives::Address;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, InfraError, Result};
use crate::pipeline::block_tracker::BlockTracker;
use crate::pipeline::dispatcher::Dispatcher;
use crate::ports::{BlockTrackerStore, ConfirmationBufferStore, LogSource, TopicFilter};
use crate::types::{BlockRef, BufferedEvent, LogRecord, NewConfirmation, PipelineEvent};

fn decode_row(row: &BufferedEvent) -> Result<LogRecord> {
    row.to_log_record()
        .map_err(|err| InfraError::ConfirmationBufferStore(format!("corrupt buffered row content: {err}")).into())
}

/// Promotes or drops buffered rows for one contract as new heads arrive.
pub struct Confirmator<L, T, B> {
    source: Arc<L>,
    tracker: Arc<BlockTracker<T>>,
    buffer_store: Arc<B>,
    dispatcher: Arc<Dispatcher>,
    contract: Address,
    target_confirmation: u64,
    /// Shared with an [`crate::pipeline::events_emitter::EventsEmitter`]'s
    /// own fetch gate when wired by [`crate::pipeline::auto_events_emitter::AutoEventsEmitter`],
    /// so a promotion pass and a fetch cycle for the same contract never
    /// race the confirmation buffer. `None` when run standalone.
    gate: Option<Arc<Semaphore>>,
}

impl<L, T, B> Confirmator<L, T, B>
where
    L: LogSource,
    T: BlockTrackerStore,
    B: ConfirmationBufferStore,
{
    /// Build a confirmator for one contract.
    pub const fn new(
        source: Arc<L>,
        tracker: Arc<BlockTracker<T>>,
        buffer_store: Arc<B>,
        dispatcher: Arc<Dispatcher>,
        contract: Address,
        target_confirmation: u64,
    ) -> Self {
        Self {
            source,
            tracker,
            buffer_store,
            dispatcher,
            contract,
            target_confirmation,
            gate: None,
        }
    }

    /// Share a fetch gate with this confirmator so
    /// [`Self::run_confirmations_routine`] serializes against concurrent
    /// [`crate::pipeline::events_emitter::EventsEmitter::fetch`] calls on
    /// the same contract.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Run one promotion pass against head `current_block`.
    ///
    /// Lists buffered rows ordered by
    /// `(block_number, transaction_hash, log_index)`, compute depth at the
    /// new head, and either report progress (`newConfirmation`), promote
    /// (`newEvent` + advance `lastProcessed`), or drop on reorg
    /// (`invalidConfirmation`).
    #[instrument(skip(self), fields(contract = %self.contract, head = %current_block.number))]
    pub async fn run_confirmations_routine(&self, current_block: BlockRef) -> Result<()> {
        let _permit = match &self.gate {
            Some(gate) => Some(gate.acquire().await.map_err(|_| AppError::ShutdownRequested)?),
            None => None,
        };

        let rows = self.buffer_store.find_all(self.contract).await?;

        for row in rows {
            let Some(depth) = current_block.number.value().checked_sub(row.block_number.value())
            else {
                // Future block relative to the row: a shallow reorg moved the
                // head backwards since insertion. handleReorg will clean this
                // up on the next fetch cycle.
                continue;
            };

            if depth < self.target_confirmation {
                self.dispatcher.dispatch_parallel(PipelineEvent::NewConfirmation(NewConfirmation {
                    event: decode_row(&row)?,
                    confirmations: depth,
                    target_confirmation: self.target_confirmation,
                }));
                continue;
            }

            if self.transaction_still_present(&row).await? {
                let log = decode_row(&row)?;
                self.dispatcher.dispatch_parallel(PipelineEvent::NewEvent(log));
                self.tracker
                    .set_last_processed_if_higher(BlockRef::new(row.block_number, row.block_hash))
                    .await?;
                debug!(transaction_hash = %row.transaction_hash, "buffered event promoted");
            } else {
                warn!(transaction_hash = %row.transaction_hash, "buffered transaction dropped by reorg");
                self.dispatcher
                    .dispatch_parallel(PipelineEvent::InvalidConfirmation(row.clone()));
            }

            self.buffer_store
                .destroy_one(self.contract, row.transaction_hash, row.log_index)
                .await?;
        }

        Ok(())
    }

    /// Re-query the chain at `row.block_number` to check whether
    /// `row.transaction_hash` is still present, i.e. was not dropped by a
    /// reorg that stayed within the confirmation window.
    async fn transaction_still_present(&self, row: &BufferedEvent) -> Result<bool> {
        let logs = self
            .source
            .get_past_logs(row.block_number, row.block_number, &TopicFilter::default())
            .await?;
        Ok(logs
            .iter()
            .any(|log| log.transaction_hash == row.transaction_hash && log.log_index == row.log_index))
    }
}

//! C2 — NewBlockProducer: a stream of new block headers, by polling or by
//! external push.
//!
//! The polling implementation is grounded on the reference service's
//! `indexer/block_processor.rs::start_polling` loop and on
//! `indexer/realtime_processor.rs`'s cooperative-shutdown idiom
//! (`CancellationToken` + `tokio::select!`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::ports::{BlockTag, LogSource};
use crate::types::{BlockRef, PipelineEvent};

/// Default channel capacity for the broadcast of new headers; lagging
/// subscribers drop the oldest headers rather than block the producer.
const BROADCAST_CAPACITY: usize = 256;

/// A stream of new block headers that emitters subscribe to.
///
/// Deduplication by block number is required: implementations
/// must not emit the same header number twice in a row.
pub trait NewBlockProducer: Send + Sync {
    /// Subscribe to new headers. Each subscriber gets its own receiver; the
    /// emitter must drop it (or call an explicit unsubscribe, if the
    /// implementation offers one) on `stop()`.
    fn subscribe(&self) -> broadcast::Receiver<BlockRef>;

    /// Subscribe to producer-level errors (RPC failures while polling,
    /// etc). These never stop the producer.
    fn subscribe_errors(&self) -> broadcast::Receiver<PipelineEvent>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// POLLING PRODUCER
// ═══════════════════════════════════════════════════════════════════════════════

/// Polls `getBlock("latest")` at a fixed interval and broadcasts new
/// headers, deduplicated by block number.
#[derive(Debug)]
pub struct PollingBlockProducer {
    headers_tx: broadcast::Sender<BlockRef>,
    errors_tx: broadcast::Sender<PipelineEvent>,
    cancellation: CancellationToken,
}

impl PollingBlockProducer {
    /// Start polling `source` every `interval`. The returned producer owns
    /// a background task that runs until [`Self::shutdown`] is called or
    /// the producer is dropped.
    #[must_use]
    pub fn spawn<L>(source: Arc<L>, interval: Duration) -> Self
    where
        L: LogSource + 'static,
    {
        let (headers_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (errors_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let cancellation = CancellationToken::new();

        let task_headers_tx = headers_tx.clone();
        let task_errors_tx = errors_tx.clone();
        let task_cancellation = cancellation.clone();

        tokio::spawn(async move {
            poll_loop(source, interval, task_headers_tx, task_errors_tx, task_cancellation).await;
        });

        Self {
            headers_tx,
            errors_tx,
            cancellation,
        }
    }

    /// Stop the polling task. Cooperative: an in-flight poll completes
    /// before the loop exits.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}

impl Drop for PollingBlockProducer {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

impl NewBlockProducer for PollingBlockProducer {
    fn subscribe(&self) -> broadcast::Receiver<BlockRef> {
        self.headers_tx.subscribe()
    }

    fn subscribe_errors(&self) -> broadcast::Receiver<PipelineEvent> {
        self.errors_tx.subscribe()
    }
}

#[instrument(skip(source, headers_tx, errors_tx, cancellation))]
async fn poll_loop<L>(
    source: Arc<L>,
    interval: Duration,
    headers_tx: broadcast::Sender<BlockRef>,
    errors_tx: broadcast::Sender<PipelineEvent>,
    cancellation: CancellationToken,
) where
    L: LogSource,
{
    let mut last_emitted: Option<u64> = None;
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            () = cancellation.cancelled() => {
                info!("new block producer shutting down");
                break;
            }
            _ = ticker.tick() => {
                match source.get_block(BlockTag::Latest).await {
                    Ok(header) => {
                        if last_emitted != Some(header.number.value()) {
                            debug!(block = %header.number, "new block");
                            last_emitted = Some(header.number.value());
                            let _ = headers_tx.send(header);
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "failed to poll latest block");
                        let _ = errors_tx.send(PipelineEvent::Error(err.to_string()));
                    }
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PUSH PRODUCER
// ═══════════════════════════════════════════════════════════════════════════════

/// A `NewBlockProducer` fed by an external push source (e.g. a websocket
/// subscription maintained outside this crate), satisfying the same
/// [`NewBlockProducer`] interface as [`PollingBlockProducer`] — listening
/// mode is an equivalent interface to polling.
#[derive(Debug)]
pub struct PushBlockProducer {
    headers_tx: broadcast::Sender<BlockRef>,
    errors_tx: broadcast::Sender<PipelineEvent>,
    last_emitted: parking_lot::Mutex<Option<u64>>,
}

impl Default for PushBlockProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl PushBlockProducer {
    /// Create a push producer with no subscribers yet.
    #[must_use]
    pub fn new() -> Self {
        let (headers_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (errors_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            headers_tx,
            errors_tx,
            last_emitted: parking_lot::Mutex::new(None),
        }
    }

    /// Push a new header from outside. Deduplicated by block number.
    pub fn push(&self, header: BlockRef) {
        let mut guard = self.last_emitted.lock();
        if *guard == Some(header.number.value()) {
            return;
        }
        *guard = Some(header.number.value());
        let _ = self.headers_tx.send(header);
    }

    /// Surface an external error on the `error` channel without stopping
    /// the producer.
    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self.errors_tx.send(PipelineEvent::Error(message.into()));
    }
}

impl NewBlockProducer for PushBlockProducer {
    fn subscribe(&self) -> broadcast::Receiver<BlockRef> {
        self.headers_tx.subscribe()
    }

    fn subscribe_errors(&self) -> broadcast::Receiver<PipelineEvent> {
        self.errors_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::log_source::mocks::ScriptedLogSource;
    use crate::types::BlockNumber;
    use alloy::primitives::B256;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn producers_are_send_sync() {
        assert_send_sync::<PollingBlockProducer>();
        assert_send_sync::<PushBlockProducer>();
    }

    #[tokio::test]
    async fn push_producer_dedupes_by_number() {
        let producer = PushBlockProducer::new();
        let mut rx = producer.subscribe();

        let header = BlockRef::new(BlockNumber::new(1), B256::from([1; 32]));
        producer.push(header);
        producer.push(header);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, header);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn polling_producer_emits_new_heads() {
        let source = Arc::new(ScriptedLogSource::new());
        source.advance_head(1, B256::from([1; 32]));

        let producer = PollingBlockProducer::spawn(source.clone(), Duration::from_millis(10));
        let mut rx = producer.subscribe();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.number.value(), 1);

        source.advance_head(2, B256::from([2; 32]));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.number.value(), 2);

        producer.shutdown();
    }

    #[tokio::test]
    async fn polling_producer_surfaces_errors_without_stopping() {
        let source = Arc::new(ScriptedLogSource::new());
        source.advance_head(1, B256::from([1; 32]));
        source.fail_next_call();

        let producer = PollingBlockProducer::spawn(source.clone(), Duration::from_millis(10));
        let mut errors = producer.subscribe_errors();
        let mut headers = producer.subscribe();

        assert!(matches!(errors.recv().await, Ok(PipelineEvent::Error(_))));
        let header = headers.recv().await.unwrap();
        assert_eq!(header.number.value(), 1);

        producer.shutdown();
    }
}

//! C8 — Dispatcher: subscriber registry and emission strategy.
//!
//! No direct teacher analog exists: the reference service's
//! `indexer/event_router.rs` is a 1:1 event-type-to-handler router, not an
//! N-subscriber-per-channel fan-out registry. This component is instead
//! grounded on the reference service's `ports/streaming.rs` `EventPublisher`
//! port shape (subscribe/publish over a typed channel) and the
//! `tokio::sync`-based cooperative-cancellation idiom used throughout
//! `indexer/realtime_processor.rs`, and is documented as an original
//! construction in `DESIGN.md`.
//!
//! Subscription is modeled as an explicit
//! RAII handle ([`Subscription`]) rather than a string-keyed unsubscribe
//! call: dropping the handle unsubscribes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{instrument, warn};

use crate::error::AppError;
use crate::types::{Channel, PipelineEvent};

/// A subscriber callback: given an event payload, returns a future that
/// resolves to `Ok(())` or an error message on listener failure.
pub type Subscriber =
    Arc<dyn Fn(PipelineEvent) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

struct Registry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<Channel, Vec<(u64, Subscriber)>>>,
}

/// Subscriber registry and fan-out strategy.
///
/// Two emission strategies are available, selected by the caller
/// (typically an [`crate::pipeline::events_emitter::EventsEmitter`]) via
/// `serialListeners`:
///
/// - [`Self::dispatch_parallel`] — all listeners invoked; futures are
///   spawned rather than awaited; individual failures route to the `error`
///   channel without blocking other listeners.
/// - [`Self::dispatch_serial`] — listeners invoked in registration order,
///   each awaited before the next; a failure routes to `error` and stops
///   the chain for that event only.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Number of subscribers currently registered on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.registry
            .subscribers
            .read()
            .get(&channel)
            .map_or(0, Vec::len)
    }

    /// Register a callback on `channel`. Dropping the returned
    /// [`Subscription`] unsubscribes it.
    pub fn subscribe(&self, channel: Channel, callback: Subscriber) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .subscribers
            .write()
            .entry(channel)
            .or_default()
            .push((id, callback));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            channel,
            id,
        }
    }

    /// Fan out `event` to every subscriber of its channel without awaiting
    /// their completion; each is driven on its own spawned task so a slow
    /// or failing listener cannot block the others.
    #[instrument(skip(self, event), fields(channel = ?event.channel()))]
    pub fn dispatch_parallel(&self, event: PipelineEvent) {
        let channel = event.channel();
        let Some(subscribers) = self.registry.subscribers.read().get(&channel).cloned() else {
            return;
        };
        for (_, callback) in subscribers {
            let fut = callback(event.clone());
            let dispatcher = self.clone();
            tokio::spawn(async move {
                if let Err(message) = fut.await {
                    warn!(error = %message, "listener failed");
                    dispatcher.route_listener_failure(channel, message);
                }
            });
        }
    }

    /// Invoke every subscriber of `event`'s channel in registration order,
    /// awaiting each before the next. Stops the chain for this event (but
    /// not the pipeline) on the first failure.
    #[instrument(skip(self, event), fields(channel = ?event.channel()))]
    pub async fn dispatch_serial(&self, event: PipelineEvent) {
        let channel = event.channel();
        let Some(subscribers) = self.registry.subscribers.read().get(&channel).cloned() else {
            return;
        };
        for (_, callback) in subscribers {
            let outcome = callback(event.clone()).await;
            if let Err(message) = outcome {
                warn!(error = %message, "listener failed, stopping chain for this event");
                self.route_listener_failure(channel, message);
                break;
            }
        }
    }

    /// Surfaces a failed listener as [`AppError::Listener`] on the `error`
    /// channel, per SPEC_FULL.md §7.1. A listener failure on the `error`
    /// channel itself is logged but not re-dispatched, so a broken error
    /// listener cannot recurse into itself.
    fn route_listener_failure(&self, source_channel: Channel, message: String) {
        if source_channel == Channel::Error {
            warn!(error = %message, "error-channel listener itself failed");
            return;
        }
        let app_error = AppError::Listener(message);
        self.dispatch_parallel(PipelineEvent::Error(app_error.to_string()));
    }
}

/// RAII handle returned by [`Dispatcher::subscribe`]. Dropping it
/// unsubscribes the callback.
#[must_use = "dropping the Subscription immediately unsubscribes the callback"]
pub struct Subscription {
    registry: Weak<Registry>,
    channel: Channel,
    id: u64,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Some(subs) = registry.subscribers.write().get_mut(&self.channel) {
                subs.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn dispatcher_is_send_sync() {
        assert_send_sync::<Dispatcher>();
    }

    #[tokio::test]
    async fn serial_dispatch_invokes_in_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        let _sub1 = dispatcher.subscribe(
            Channel::Reorg,
            Arc::new(move |_event| {
                let o1 = o1.clone();
                Box::pin(async move {
                    o1.lock().unwrap().push(1);
                    Ok(())
                })
            }),
        );
        let o2 = order.clone();
        let _sub2 = dispatcher.subscribe(
            Channel::Reorg,
            Arc::new(move |_event| {
                let o2 = o2.clone();
                Box::pin(async move {
                    o2.lock().unwrap().push(2);
                    Ok(())
                })
            }),
        );

        dispatcher
            .dispatch_serial(PipelineEvent::Reorg(crate::types::BlockNumber::new(1)))
            .await;

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn serial_dispatch_stops_chain_on_failure() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let _sub1 = dispatcher.subscribe(
            Channel::Error,
            Arc::new(|_event| Box::pin(async { Err("boom".to_string()) })),
        );
        let c2 = calls.clone();
        let _sub2 = dispatcher.subscribe(
            Channel::Error,
            Arc::new(move |_event| {
                let c2 = c2.clone();
                Box::pin(async move {
                    c2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        dispatcher
            .dispatch_serial(PipelineEvent::Error("x".into()))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn parallel_dispatch_reaches_all_listeners_despite_failure() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let _sub1 = dispatcher.subscribe(
            Channel::Error,
            Arc::new(|_event| Box::pin(async { Err("boom".to_string()) })),
        );
        let c2 = calls.clone();
        let _sub2 = dispatcher.subscribe(
            Channel::Error,
            Arc::new(move |_event| {
                let c2 = c2.clone();
                Box::pin(async move {
                    c2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        dispatcher.dispatch_parallel(PipelineEvent::Error("x".into()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn serial_dispatch_surfaces_listener_failure_on_error_channel() {
        let dispatcher = Dispatcher::new();
        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));

        let _failing = dispatcher.subscribe(
            Channel::NewEvent,
            Arc::new(|_event| Box::pin(async { Err("handler exploded".to_string()) })),
        );
        let e = errors.clone();
        let _error_sub = dispatcher.subscribe(
            Channel::Error,
            Arc::new(move |event| {
                let e = e.clone();
                Box::pin(async move {
                    if let PipelineEvent::Error(message) = event {
                        e.lock().unwrap().push(message);
                    }
                    Ok(())
                })
            }),
        );

        dispatcher
            .dispatch_serial(PipelineEvent::NewEvent(sample_log_record()))
            .await;

        let seen = errors.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("handler exploded"));
    }

    #[tokio::test]
    async fn parallel_dispatch_surfaces_listener_failure_on_error_channel() {
        let dispatcher = Dispatcher::new();
        let errors = Arc::new(AtomicUsize::new(0));

        let _failing = dispatcher.subscribe(
            Channel::NewEvent,
            Arc::new(|_event| Box::pin(async { Err("handler exploded".to_string()) })),
        );
        let e = errors.clone();
        let _error_sub = dispatcher.subscribe(
            Channel::Error,
            Arc::new(move |_event| {
                let e = e.clone();
                Box::pin(async move {
                    e.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        dispatcher.dispatch_parallel(PipelineEvent::NewEvent(sample_log_record()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_channel_listener_failure_does_not_recurse() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let _error_sub = dispatcher.subscribe(
            Channel::Error,
            Arc::new(move |_event| {
                let c = c.clone();
                Box::pin(async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("error listener itself failed".to_string())
                })
            }),
        );

        dispatcher
            .dispatch_serial(PipelineEvent::Error("original failure".into()))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn sample_log_record() -> crate::types::LogRecord {
        use alloy::primitives::{Address, B256};
        use crate::types::{BlockNumber, LogRecord};

        LogRecord {
            address: Address::from([0x01; 20]),
            block_number: BlockNumber::new(1),
            block_hash: B256::from([1u8; 32]),
            transaction_hash: B256::from([2u8; 32]),
            log_index: 0,
            event_name: "Transfer".into(),
            topics: vec![],
            decoded_payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe(
            Channel::InitFinished,
            Arc::new(|_event| Box::pin(async { Ok(()) })),
        );
        assert_eq!(dispatcher.subscriber_count(Channel::InitFinished), 1);
        drop(sub);
        assert_eq!(dispatcher.subscriber_count(Channel::InitFinished), 0);
    }
}

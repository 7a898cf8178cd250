//! C7 — AutoEventsEmitter: drives [`EventsEmitter`] from a [`NewBlockProducer`].
//!
//! Grounded on the reference service's `indexer/realtime_processor.rs`
//! `start()`/`run_subscription()` reconnect-and-shutdown lifecycle
//! (`CancellationToken` + `tokio::select!`), generalized from a
//! single-pass WebSocket subscription loop to an init-then-run state
//! machine. The auto-start reference-counted lifecycle is built from a
//! plain atomic counter plus a RAII subscription wrapper.

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::ports::{BlockTrackerStore, ConfirmationBufferStore, LogSource};
use crate::pipeline::confirmator::Confirmator;
use crate::pipeline::dispatcher::{Dispatcher, Subscriber, Subscription};
use crate::pipeline::events_emitter::EventsEmitter;
use crate::pipeline::new_block_producer::NewBlockProducer;
use crate::types::{Channel, PipelineEvent};

/// States of the start/stop lifecycle described below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Never started, or returned here after a failed `init()`.
    Created,
    /// Draining historical batches before the first `Running` transition.
    Initializing,
    /// Subscribed to the producer, dispatching `fetch`/`runConfirmationsRoutine`.
    Running,
    /// `stop()` was called; the in-flight cycle is finishing.
    Stopping,
    /// Unsubscribed from the producer; no cycle in flight.
    Stopped,
}

/// Construction-time configuration for an [`AutoEventsEmitter`].
#[derive(Debug, Clone, Copy)]
pub struct AutoEventsEmitterConfig {
    /// When `true`, the first subscription to [`Channel::NewEvent`] via
    /// [`AutoEventsEmitter::subscribe_new_event`] triggers [`AutoEventsEmitter::start`];
    /// the last such subscription being dropped triggers [`AutoEventsEmitter::stop`].
    pub auto_start: bool,
}

impl Default for AutoEventsEmitterConfig {
    fn default() -> Self {
        Self { auto_start: true }
    }
}

/// Drives an [`EventsEmitter`] and, when confirmations are configured, a
/// [`Confirmator`] from a shared [`NewBlockProducer`].
pub struct AutoEventsEmitter<L, T, B> {
    emitter: Arc<EventsEmitter<L, T, B>>,
    confirmator: Option<Arc<Confirmator<L, T, B>>>,
    producer: Arc<dyn NewBlockProducer>,
    dispatcher: Arc<Dispatcher>,
    config: AutoEventsEmitterConfig,
    state: watch::Sender<LifecycleState>,
    task: AsyncMutex<Option<(JoinHandle<()>, CancellationToken)>>,
    failure_count: AtomicU64,
    new_event_subscribers: AtomicU64,
}

impl<L, T, B> std::fmt::Debug for AutoEventsEmitter<L, T, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoEventsEmitter")
            .field("state", &*self.state.borrow())
            .field("failure_count", &self.failure_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<L, T, B> AutoEventsEmitter<L, T, B>
where
    L: LogSource,
    T: BlockTrackerStore,
    B: ConfirmationBufferStore,
{
    /// Build an auto emitter around an already-constructed [`EventsEmitter`]
    /// and an optional [`Confirmator`] (present iff `confirmations > 0`).
    /// The confirmator, when given, should already be wired with
    /// [`Confirmator::with_gate`] against `emitter.gate()` so that
    /// `fetch` and `runConfirmationsRoutine` serialize.
    #[must_use]
    pub fn new(
        emitter: Arc<EventsEmitter<L, T, B>>,
        confirmator: Option<Arc<Confirmator<L, T, B>>>,
        producer: Arc<dyn NewBlockProducer>,
        dispatcher: Arc<Dispatcher>,
        config: AutoEventsEmitterConfig,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            emitter,
            confirmator,
            producer,
            dispatcher,
            config,
            state,
            task: AsyncMutex::new(None),
            failure_count: AtomicU64::new(0),
            new_event_subscribers: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle-state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Number of fetch/confirmation cycles that have failed and been
    /// routed to the `error` channel since construction. Tracked explicitly
    /// rather than only logged, so a persistently failing pipeline is
    /// observable.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    fn set_state(&self, next: LifecycleState) {
        let _ = self.state.send(next);
    }

    /// `start()`: on first call (or after a prior `stop()`), drains
    /// historical batches via `init()` and, on success, subscribes to the
    /// producer and transitions to `Running`. A no-op if already
    /// `Initializing` or `Running`. Init failures are routed to the
    /// `error` channel and the state returns to `Created` rather than
    /// being returned to the caller.
    #[instrument(skip(self), fields(contract = %self.emitter.contract()))]
    pub async fn start(self: &Arc<Self>) {
        match self.state() {
            LifecycleState::Initializing | LifecycleState::Running => return,
            LifecycleState::Stopping => {
                // Let the in-flight stop finish before restarting.
                if let Some((handle, _)) = self.task.lock().await.take() {
                    let _ = handle.await;
                }
            }
            LifecycleState::Created | LifecycleState::Stopped => {}
        }

        self.set_state(LifecycleState::Initializing);

        if let Err(err) = self.run_init().await {
            warn!(error = %err, "init failed, returning to Created");
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            self.dispatcher.dispatch_parallel(PipelineEvent::Error(err.to_string()));
            self.set_state(LifecycleState::Created);
            return;
        }

        self.dispatcher
            .dispatch_parallel(PipelineEvent::InitFinished(self.emitter.contract()));
        self.set_state(LifecycleState::Running);
        let (handle, cancellation) = self.spawn_run_loop();
        *self.task.lock().await = Some((handle, cancellation));
    }

    /// `stop()`: unsubscribes from the producer. Cooperative — an
    /// in-flight fetch/confirmation cycle runs to completion rather than
    /// being cancelled mid-batch, so `lastFetched` is left consistent.
    #[instrument(skip(self), fields(contract = %self.emitter.contract()))]
    pub async fn stop(self: &Arc<Self>) {
        if !matches!(self.state(), LifecycleState::Running) {
            return;
        }
        self.set_state(LifecycleState::Stopping);
        let handle = self.task.lock().await.take();
        if let Some((handle, cancellation)) = handle {
            cancellation.cancel();
            let _ = handle.await;
        }
        self.set_state(LifecycleState::Stopped);
        info!("auto events emitter stopped");
    }

    /// `init()`: if `lastFetched` is absent, drive `fetch()` to drain every
    /// historical batch from `startingBlock` up to the block observed at
    /// call time.
    async fn run_init(&self) -> Result<()> {
        if self.emitter.tracker().last_fetched().await?.is_some() {
            return Ok(());
        }
        let mut stream = pin!(self.emitter.fetch(None, false));
        while let Some(batch) = stream.next().await {
            batch?;
        }
        Ok(())
    }

    /// Spawn the header/error subscription loop and return its handle and
    /// cancellation token for the caller to store. Returning rather than
    /// self-storing closes a race where `stop()` could run between the
    /// spawn and the store and find `self.task` still empty, leaking the
    /// loop task and breaking `stop()`'s cooperative-cancellation contract.
    fn spawn_run_loop(self: &Arc<Self>) -> (JoinHandle<()>, CancellationToken)
    where
        L: 'static,
        T: 'static,
        B: 'static,
    {
        let owner = Arc::clone(self);
        let mut headers = owner.producer.subscribe();
        let mut errors = owner.producer.subscribe_errors();
        let cancellation = CancellationToken::new();
        let loop_cancellation = cancellation.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = loop_cancellation.cancelled() => {
                        break;
                    }
                    header = headers.recv() => {
                        let Ok(header) = header else { continue };
                        owner.run_one_cycle(header).await;
                    }
                    error = errors.recv() => {
                        if let Ok(event) = error {
                            owner.dispatcher.dispatch_parallel(event);
                        }
                    }
                }
            }
        });

        (handle, cancellation)
    }

    #[instrument(skip(self, header), fields(contract = %self.emitter.contract(), block = %header.number))]
    async fn run_one_cycle(&self, header: crate::types::BlockRef) {
        let mut stream = pin!(self.emitter.fetch(Some(header), false));
        while let Some(batch) = stream.next().await {
            if let Err(err) = batch {
                warn!(error = %err, "fetch cycle failed, will retry on next block");
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                self.dispatcher.dispatch_parallel(PipelineEvent::Error(err.to_string()));
                break;
            }
        }

        if let Some(confirmator) = &self.confirmator {
            if let Err(err) = confirmator.run_confirmations_routine(header).await {
                warn!(error = %err, "confirmation routine failed, will retry on next block");
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                self.dispatcher.dispatch_parallel(PipelineEvent::Error(err.to_string()));
            }
        }
    }
}

impl<L, T, B> AutoEventsEmitter<L, T, B>
where
    L: LogSource + 'static,
    T: BlockTrackerStore + 'static,
    B: ConfirmationBufferStore + 'static,
{
    /// Subscribe to [`Channel::NewEvent`] through this emitter's
    /// dispatcher, honoring the `autoStart` contract: the first such
    /// subscription triggers [`Self::start`] when `autoStart` is set; the
    /// last one being dropped triggers [`Self::stop`].
    pub fn subscribe_new_event(self: &Arc<Self>, callback: Subscriber) -> AutoNewEventSubscription<L, T, B> {
        let previous = self.new_event_subscribers.fetch_add(1, Ordering::AcqRel);
        let inner = self.dispatcher.subscribe(Channel::NewEvent, callback);

        if previous == 0 && self.config.auto_start {
            let owner = Arc::clone(self);
            tokio::spawn(async move { owner.start().await });
        }

        AutoNewEventSubscription {
            inner: Some(inner),
            owner: Arc::clone(self),
        }
    }
}

/// RAII handle from [`AutoEventsEmitter::subscribe_new_event`]. Dropping it
/// unsubscribes the callback and, when the reference count reaches zero
/// and `autoStart` is set, stops the emitter.
#[must_use = "dropping this immediately unsubscribes the callback"]
pub struct AutoNewEventSubscription<L, T, B>
where
    L: LogSource + 'static,
    T: BlockTrackerStore + 'static,
    B: ConfirmationBufferStore + 'static,
{
    inner: Option<Subscription>,
    owner: Arc<AutoEventsEmitter<L, T, B>>,
}

impl<L, T, B> Drop for AutoNewEventSubscription<L, T, B>
where
    L: LogSource + 'static,
    T: BlockTrackerStore + 'static,
    B: ConfirmationBufferStore + 'static,
{
    fn drop(&mut self) {
        drop(self.inner.take());
        let remaining = self.owner.new_event_subscribers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.owner.config.auto_start {
            let owner = Arc::clone(&self.owner);
            tokio::spawn(async move { owner.stop().await });
        }
    }
}

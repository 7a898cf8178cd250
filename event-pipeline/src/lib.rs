//! Reorg-aware confirmation pipeline for Ethereum-family contract event logs.
//!
//! Ingests contract-log events, reconciles them against block
//! reorganizations, and delivers them to consumers only after a
//! configurable confirmation depth. The hard engineering lives in the
//! *event pipeline*: batched historical catch-up from a persisted
//! checkpoint, continuous polling that interleaves reorg detection and
//! forward progress, a two-stage confirmation buffer that stores
//! unconfirmed events durably and promotes them as the chain advances, and
//! ordering between a single fetcher and multiple consumer callbacks.
//!
//! # Architecture
//!
//! ```text
//! NewBlockProducer ──► AutoEventsEmitter ──► EventsEmitter.fetch
//!                            │                    │   │
//!                            │                    │   └─► ConfirmationBufferStore (insert unconfirmed)
//!                            │                    └─────► Dispatcher (emit confirmed)
//!                            │
//!                            └─► Confirmator.run_confirmations_routine
//!                                      │           │
//!                                      │           └─► Dispatcher (promote / drop)
//!                                      └─► BlockTracker (advance lastProcessed)
//! ```
//!
//! `EventsEmitter` and `Confirmator` share a single-permit fetch gate per
//! contract so a promotion pass never races a fetch cycle's buffer writes.
//!
//! # Modules
//!
//! - [`types`] - domain types: block refs, log records, buffered rows, channel payloads.
//! - [`error`] - layered error types (`DomainError`, `InfraError`, `AppError`).
//! - [`ports`] - traits for the out-of-scope external collaborators: `LogSource`,
//!   `BlockTrackerStore`, `ConfirmationBufferStore`.
//! - [`store`] - in-memory reference implementations of the persistence ports.
//! - [`adapters`] - production `LogSource` adapter over an `alloy` provider.
//! - [`pipeline`] - the C1-C8 pipeline core: `BlockTracker`, `NewBlockProducer`,
//!   `Confirmator`, `EventsEmitter`, `AutoEventsEmitter`, `Dispatcher` (the
//!   confirmation buffer's rows are owned directly through
//!   [`ports::ConfirmationBufferStore`], with no separate wrapper type).
//! - [`config`] - configuration loading and validation for the CLI binary.
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use event_pipeline::pipeline::{BlockTracker, Dispatcher, EmitterConfig, EventsEmitter, StartingBlock};
//! use event_pipeline::store::{InMemoryBlockTrackerStore, InMemoryConfirmationBufferStore};
//!
//! let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
//! let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
//! let dispatcher = Arc::new(Dispatcher::new());
//! let config = EmitterConfig {
//!     events: Some(vec!["Transfer".into()]),
//!     starting_block: StartingBlock::Genesis,
//!     ..EmitterConfig::default()
//! };
//! // let emitter = EventsEmitter::new(source, tracker, buffer_store, dispatcher, contract, config)?;
//! ```

#![doc(html_root_url = "https://docs.rs/event-pipeline")]

pub mod adapters;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod store;
pub mod types;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string.
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().starts_with("0."));
    }
}

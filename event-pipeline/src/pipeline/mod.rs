//! The pipeline core: C1-C8 of the confirmed-event pipeline.
//!
//! Submodules map directly onto the component table: [`block_tracker`] (C1),
//! [`new_block_producer`] (C2). C4's confirmation-buffer rows have no
//! separate wrapper type — they are owned and mutated directly through
//! [`crate::ports::ConfirmationBufferStore`] by [`events_emitter`] and
//! [`confirmator`] (C5). [`events_emitter`] (C6, which also plays the role of
//! C3's `LogSource` caller), [`auto_events_emitter`] (C7), and [`dispatcher`]
//! (C8).

pub mod auto_events_emitter;
pub mod block_tracker;
pub mod confirmator;
pub mod dispatcher;
pub mod events_emitter;
pub mod new_block_producer;

pub use auto_events_emitter::{AutoEventsEmitter, AutoEventsEmitterConfig, LifecycleState};
pub use block_tracker::BlockTracker;
pub use confirmator::Confirmator;
pub use dispatcher::{Dispatcher, Subscriber, Subscription};
pub use events_emitter::{EmitterConfig, EventsEmitter, StartingBlock};
pub use new_block_producer::{NewBlockProducer, PollingBlockProducer, PushBlockProducer};

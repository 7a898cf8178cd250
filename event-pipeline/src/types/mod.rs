//! Domain types for the event pipeline: block refs, log records, buffered
//! rows, and channel payloads.

pub mod buffered_event;
pub mod events;
pub mod log;
pub mod primitives;

pub use buffered_event::BufferedEvent;
pub use events::{Batch, Channel, NewConfirmation, PipelineEvent, ProgressInfo};
pub use log::LogRecord;
pub use primitives::{BlockNumber, BlockRef};

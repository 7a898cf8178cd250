//! Persistence adapters for the block-tracker and confirmation-buffer ports.
//!
//! [`memory`] provides in-process reference implementations suitable for
//! tests and single-process deployments. A `postgres` adapter following the
//! same shape as the reference service's `store/postgres.rs` can be added
//! behind a `postgres` feature without changing the port traits.

pub mod memory;

pub use memory::{InMemoryBlockTrackerStore, InMemoryConfirmationBufferStore};

//! Port over the confirmation buffer's relational persistence.
//!
//! A table keyed by `(contract_address, transaction_hash, log_index)`.
//! Grounded on the reference service's store ports (`ports/store.rs`),
//! which expose the same insert/list/destroy shape for a different row
//! type.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

use crate::error::InfraError;
use crate::types::BufferedEvent;

/// Durable storage for rows awaiting confirmation.
#[async_trait]
pub trait ConfirmationBufferStore: Send + Sync {
    /// Insert `rows` atomically. Fails the whole call, without partial
    /// application, if any row's identity already exists — surfaced by the
    /// caller as [`crate::error::DomainError::DuplicateEvent`].
    async fn bulk_insert(&self, rows: &[BufferedEvent]) -> Result<(), InfraError>;

    /// All buffered rows for `contract`, ordered by
    /// `(block_number, transaction_hash, log_index)`.
    async fn find_all(&self, contract: Address) -> Result<Vec<BufferedEvent>, InfraError>;

    /// Delete every buffered row for `contract`.
    async fn destroy_all(&self, contract: Address) -> Result<(), InfraError>;

    /// Delete exactly one row by its full identity.
    async fn destroy_one(
        &self,
        contract: Address,
        transaction_hash: B256,
        log_index: u64,
    ) -> Result<(), InfraError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryConfirmationBufferStore;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn store_is_send_sync() {
        assert_send_sync::<InMemoryConfirmationBufferStore>();
    }
}

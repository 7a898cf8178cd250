//! In-process reference implementations of the persistence ports.
//!
//! These generalize the mock stores the reference service keeps inside
//! `#[cfg(test)]` blocks (e.g. `checkpoint.rs`'s `MockStateStore`) into
//! non-test code, since the pipeline core needs a usable default for
//! single-process deployments and not just a test double.

use std::collections::HashMap;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::InfraError;
use crate::ports::{BlockTrackerStore, ConfirmationBufferStore};
use crate::types::{BlockRef, BufferedEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK TRACKER STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// An in-memory [`BlockTrackerStore`], backed by a mutex-guarded pair of
/// slots. Durable only for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryBlockTrackerStore {
    last_fetched: Mutex<Option<BlockRef>>,
    last_processed: Mutex<Option<BlockRef>>,
}

impl InMemoryBlockTrackerStore {
    /// Create an empty store (no cursors set).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockTrackerStore for InMemoryBlockTrackerStore {
    async fn get_last_fetched(&self) -> Result<Option<BlockRef>, InfraError> {
        Ok(*self.last_fetched.lock())
    }

    async fn set_last_fetched(&self, block: BlockRef) -> Result<(), InfraError> {
        *self.last_fetched.lock() = Some(block);
        Ok(())
    }

    async fn get_last_processed(&self) -> Result<Option<BlockRef>, InfraError> {
        Ok(*self.last_processed.lock())
    }

    async fn set_last_processed(&self, block: BlockRef) -> Result<(), InfraError> {
        *self.last_processed.lock() = Some(block);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIRMATION BUFFER STORE
// ═══════════════════════════════════════════════════════════════════════════════

type RowKey = (Address, B256, u64);

/// An in-memory [`ConfirmationBufferStore`], keyed by the same
/// `(contract_address, transaction_hash, log_index)` identity the real
/// relational schema would use.
#[derive(Debug, Default)]
pub struct InMemoryConfirmationBufferStore {
    rows: Mutex<HashMap<RowKey, BufferedEvent>>,
}

impl InMemoryConfirmationBufferStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(row: &BufferedEvent) -> RowKey {
        (row.contract_address, row.transaction_hash, row.log_index)
    }
}

#[async_trait]
impl ConfirmationBufferStore for InMemoryConfirmationBufferStore {
    async fn bulk_insert(&self, rows: &[BufferedEvent]) -> Result<(), InfraError> {
        let mut guard = self.rows.lock();
        for row in rows {
            let key = Self::key(row);
            if guard.contains_key(&key) {
                return Err(InfraError::ConfirmationBufferStore(format!(
                    "duplicate row for contract {} tx {} log_index {}",
                    key.0, key.1, key.2
                )));
            }
        }
        for row in rows {
            guard.insert(Self::key(row), row.clone());
        }
        Ok(())
    }

    async fn find_all(&self, contract: Address) -> Result<Vec<BufferedEvent>, InfraError> {
        let guard = self.rows.lock();
        let mut rows: Vec<BufferedEvent> = guard
            .values()
            .filter(|row| row.contract_address == contract)
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.block_number, row.transaction_hash, row.log_index));
        Ok(rows)
    }

    async fn destroy_all(&self, contract: Address) -> Result<(), InfraError> {
        self.rows.lock().retain(|_, row| row.contract_address != contract);
        Ok(())
    }

    async fn destroy_one(
        &self,
        contract: Address,
        transaction_hash: B256,
        log_index: u64,
    ) -> Result<(), InfraError> {
        self.rows.lock().remove(&(contract, transaction_hash, log_index));
        Ok(())
    }
}

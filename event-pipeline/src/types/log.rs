//! Log records as produced by the (out-of-scope) ABI registry / decoder.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use super::primitives::BlockNumber;

/// A single decoded contract event, as handed to the pipeline by the log
/// decoder.
///
/// Identity of a log is `(transaction_hash, log_index)`;
/// `(block_number, transaction_hash, log_index)` is also unique, which is
/// the key the confirmation buffer persists rows under alongside the
/// contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Contract that emitted the log.
    pub address: Address,
    /// Block the log was included in.
    pub block_number: BlockNumber,
    /// Hash of that block.
    pub block_hash: B256,
    /// Hash of the transaction that emitted the log.
    pub transaction_hash: B256,
    /// Index of the log within its block.
    pub log_index: u64,
    /// Name of the event, as resolved by the ABI registry.
    pub event_name: String,
    /// Raw indexed topics, including the event signature at index 0.
    pub topics: Vec<B256>,
    /// Decoded event payload. Opaque to the pipeline core; the ABI decoder
    /// is an out-of-scope external collaborator.
    pub decoded_payload: serde_json::Value,
}

impl LogRecord {
    /// The `(transaction_hash, log_index)` identity pair.
    #[must_use]
    pub const fn identity(&self) -> (B256, u64) {
        (self.transaction_hash, self.log_index)
    }

    /// Confirmation depth of this log relative to a head block number.
    ///
    /// Returns `None` if the log is from a block at or after `head` would
    /// make the depth negative (the log is not yet part of history from the
    /// caller's perspective).
    #[must_use]
    pub fn depth_at(&self, head: BlockNumber) -> Option<u64> {
        head.value().checked_sub(self.block_number.value())
    }
}

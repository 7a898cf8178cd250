//! The confirmation buffer's persisted row type.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use super::log::LogRecord;
use super::primitives::BlockNumber;

/// An event awaiting sufficient confirmation depth before it is safe to
/// deliver to consumers.
///
/// Primary key: `(contract_address, transaction_hash, log_index)`. A row
/// exists only while the event's depth is below `target_confirmation`, or
/// until a reorg discards it via [`crate::pipeline::events_emitter`]'s
/// reorg remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedEvent {
    /// Contract this row belongs to; buffer operations are always scoped to
    /// one contract address so that cross-contract cleanup cannot happen.
    pub contract_address: Address,
    /// Block the underlying log was included in.
    pub block_number: BlockNumber,
    /// Hash of that block, used to detect a later reorg at promotion time.
    pub block_hash: B256,
    /// Transaction hash component of the row's identity.
    pub transaction_hash: B256,
    /// Log index component of the row's identity.
    pub log_index: u64,
    /// Event name, carried for observability without deserializing content.
    pub event_name: String,
    /// Confirmations required before this row may be promoted to `newEvent`.
    pub target_confirmation: u64,
    /// Whether this row has already been emitted. Defaults to `false`;
    /// rows are deleted on promotion, so in practice this is only ever
    /// observed as `false`, but it is kept to mirror the persisted-row
    /// shape described in the data model.
    pub emitted: bool,
    /// Opaque serialized [`LogRecord`] content, deserialized back into a
    /// `LogRecord` at promotion time.
    pub content: Vec<u8>,
}

impl BufferedEvent {
    /// Build a buffered row from a freshly fetched log record.
    ///
    /// # Errors
    ///
    /// Returns an error if `log` cannot be serialized to JSON bytes.
    pub fn from_log(
        log: &LogRecord,
        target_confirmation: u64,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            contract_address: log.address,
            block_number: log.block_number,
            block_hash: log.block_hash,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            event_name: log.event_name.clone(),
            target_confirmation,
            emitted: false,
            content: serde_json::to_vec(log)?,
        })
    }

    /// Deserialize the row's content back into a [`LogRecord`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stored content is not a valid serialized
    /// `LogRecord`.
    pub fn to_log_record(&self) -> Result<LogRecord, serde_json::Error> {
        serde_json::from_slice(&self.content)
    }

    /// The `(transaction_hash, log_index)` identity pair.
    #[must_use]
    pub const fn identity(&self) -> (B256, u64) {
        (self.transaction_hash, self.log_index)
    }

    /// Confirmation depth relative to a head block number.
    ///
    /// Mirrors [`LogRecord::depth_at`]; returns `None` when the head is
    /// behind the row's block (a shallow reorg that has not yet been
    /// remediated).
    #[must_use]
    pub fn depth_at(&self, head: BlockNumber) -> Option<u64> {
        head.value().checked_sub(self.block_number.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> LogRecord {
        LogRecord {
            address: Address::ZERO,
            block_number: BlockNumber::new(500),
            block_hash: B256::from([0x11; 32]),
            transaction_hash: B256::from([0x22; 32]),
            log_index: 1,
            event_name: "Transfer".into(),
            topics: vec![],
            decoded_payload: serde_json::json!({"amount": "1000"}),
        }
    }

    #[test]
    fn round_trips_through_content() {
        let log = sample_log();
        let row = BufferedEvent::from_log(&log, 6).unwrap();
        let restored = row.to_log_record().unwrap();
        assert_eq!(restored, log);
    }

    #[test]
    fn identity_matches_log() {
        let log = sample_log();
        let row = BufferedEvent::from_log(&log, 6).unwrap();
        assert_eq!(row.identity(), log.identity());
    }

    #[test]
    fn depth_at_before_block_is_none() {
        let log = sample_log();
        let row = BufferedEvent::from_log(&log, 6).unwrap();
        assert_eq!(row.depth_at(BlockNumber::new(499)), None);
        assert_eq!(row.depth_at(BlockNumber::new(506)), Some(6));
    }
}

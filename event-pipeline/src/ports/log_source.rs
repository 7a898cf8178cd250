//! Port over the chain RPC client.
//!
//! `LogSource` is the thin adapter the core consumes for everything it
//! needs from the chain: range-fetching logs, and resolving a block number
//! or the `"latest"` tag to a header. The contract ABI registry and log
//! decoder that populate [`crate::types::LogRecord::decoded_payload`] sit
//! behind this port too, as an external collaborator — `LogSource`
//! implementations are expected to return fully decoded records.

use alloy::primitives::{keccak256, B256};
use async_trait::async_trait;

use crate::error::InfraError;
use crate::types::{BlockNumber, BlockRef, LogRecord};

/// A block tag accepted by [`LogSource::get_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// A specific block height.
    Number(BlockNumber),
    /// The chain head at call time.
    Latest,
}

/// A topic filter passed to [`LogSource::get_past_logs`].
///
/// Each position is an OR-of-topics; `topics[0]` is typically the event
/// signature hash(es), `topics[1..]` the indexed arguments. An empty inner
/// list at a position means "match anything" for that position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilter(pub Vec<Vec<B256>>);

impl TopicFilter {
    /// Resolve one configured topic entry into a 32-byte hash:
    /// already-hashed `0x`-prefixed 32-byte hex is used verbatim; anything
    /// else is treated as a raw event signature (e.g.
    /// `"Transfer(address,address,uint256)"`) and keccak-256-hashed at
    /// construction time.
    #[must_use]
    pub fn resolve_topic_entry(raw: &str) -> B256 {
        use std::str::FromStr;
        if let Ok(hash) = B256::from_str(raw) {
            return hash;
        }
        keccak256(raw.as_bytes())
    }
}

/// Adapter over the chain RPC client.
///
/// # Required methods
///
/// Implementations must provide [`Self::get_past_logs`], [`Self::get_block`],
/// and [`Self::get_block_number`] — these are the three calls the core
/// issues directly.
///
/// Errors bubble as [`InfraError::LogSource`]; the emitter, not this trait,
/// owns retry policy.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch logs over the closed interval `[from_block, to_block]`,
    /// filtered server-side by `topics` when non-empty.
    async fn get_past_logs(
        &self,
        from_block: BlockNumber,
        to_block: BlockNumber,
        topics: &TopicFilter,
    ) -> Result<Vec<LogRecord>, InfraError>;

    /// Resolve a block tag to its `(number, hash)` pair.
    async fn get_block(&self, tag: BlockTag) -> Result<BlockRef, InfraError>;

    /// The current chain head height.
    async fn get_block_number(&self) -> Result<BlockNumber, InfraError>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! Scripted `LogSource` double for deterministic pipeline tests.

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use alloy::primitives::B256;

    use super::{BlockTag, LogSource, TopicFilter};
    use crate::error::InfraError;
    use crate::types::{BlockNumber, BlockRef, LogRecord};

    /// A `LogSource` whose chain state is entirely scripted by the test.
    ///
    /// Headers are keyed by block number; logs are stored unfiltered and
    /// `get_past_logs` performs the range/topic filtering itself, mirroring
    /// what a real RPC node would do server-side.
    #[derive(Debug, Default)]
    pub struct ScriptedLogSource {
        headers: Mutex<BTreeMap<u64, B256>>,
        logs: Mutex<Vec<LogRecord>>,
        head: Mutex<u64>,
        fail_next: Mutex<bool>,
    }

    impl ScriptedLogSource {
        /// Create an empty scripted source.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Set (or overwrite) the canonical hash for a block number.
        pub fn set_header(&self, number: u64, hash: B256) {
            self.headers.lock().unwrap().insert(number, hash);
        }

        /// Advance the chain head, also setting its header.
        pub fn advance_head(&self, number: u64, hash: B256) {
            self.set_header(number, hash);
            *self.head.lock().unwrap() = number;
        }

        /// Append a log record to the scripted chain state.
        pub fn push_log(&self, log: LogRecord) {
            self.logs.lock().unwrap().push(log);
        }

        /// Remove all logs matching a predicate, simulating a reorg that
        /// dropped a transaction.
        pub fn retain_logs(&self, mut keep: impl FnMut(&LogRecord) -> bool) {
            self.logs.lock().unwrap().retain(|log| keep(log));
        }

        /// Make the next `LogSource` call fail once.
        pub fn fail_next_call(&self) {
            *self.fail_next.lock().unwrap() = true;
        }

        fn maybe_fail(&self) -> Result<(), InfraError> {
            let mut guard = self.fail_next.lock().unwrap();
            if *guard {
                *guard = false;
                return Err(InfraError::LogSource("scripted failure".into()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl LogSource for ScriptedLogSource {
        async fn get_past_logs(
            &self,
            from_block: BlockNumber,
            to_block: BlockNumber,
            topics: &TopicFilter,
        ) -> Result<Vec<LogRecord>, InfraError> {
            self.maybe_fail()?;
            let logs = self.logs.lock().unwrap();
            Ok(logs
                .iter()
                .filter(|log| {
                    log.block_number >= from_block
                        && log.block_number <= to_block
                        && topic_matches(topics, &log.topics)
                })
                .cloned()
                .collect())
        }

        async fn get_block(&self, tag: BlockTag) -> Result<BlockRef, InfraError> {
            self.maybe_fail()?;
            let number = match tag {
                BlockTag::Number(n) => n.value(),
                BlockTag::Latest => *self.head.lock().unwrap(),
            };
            let headers = self.headers.lock().unwrap();
            let hash = headers
                .get(&number)
                .copied()
                .ok_or_else(|| InfraError::LogSource(format!("no header for block {number}").into()))?;
            Ok(BlockRef::new(BlockNumber::new(number), hash))
        }

        async fn get_block_number(&self) -> Result<BlockNumber, InfraError> {
            self.maybe_fail()?;
            Ok(BlockNumber::new(*self.head.lock().unwrap()))
        }
    }

    fn topic_matches(filter: &TopicFilter, topics: &[B256]) -> bool {
        if filter.0.is_empty() {
            return true;
        }
        filter
            .0
            .iter()
            .enumerate()
            .all(|(i, options)| options.is_empty() || topics.get(i).is_some_and(|t| options.contains(t)))
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::ScriptedLogSource;
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn log_source_is_send_sync() {
        assert_send_sync::<ScriptedLogSource>();
    }

    #[test]
    fn resolve_topic_entry_keeps_already_hashed_topics_verbatim() {
        let hash = B256::from([0xAB; 32]);
        assert_eq!(TopicFilter::resolve_topic_entry(&hash.to_string()), hash);
    }

    #[test]
    fn resolve_topic_entry_hashes_raw_event_signatures() {
        let expected = alloy::primitives::keccak256(b"Transfer(address,address,uint256)");
        assert_eq!(
            TopicFilter::resolve_topic_entry("Transfer(address,address,uint256)"),
            expected
        );
    }

    #[tokio::test]
    async fn scripted_source_reports_head() {
        let source = ScriptedLogSource::new();
        source.advance_head(10, B256::from([0x01; 32]));
        assert_eq!(source.get_block_number().await.unwrap().value(), 10);
    }

    #[tokio::test]
    async fn scripted_source_fails_once() {
        let source = ScriptedLogSource::new();
        source.advance_head(1, B256::from([0x01; 32]));
        source.fail_next_call();
        assert!(source.get_block_number().await.is_err());
        assert!(source.get_block_number().await.is_ok());
    }
}

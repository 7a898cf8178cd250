//! [`LogSource`] backed by an [`alloy::providers::Provider`].
//!
//! Grounded on `indexer/block_processor.rs`'s `fetch_logs_concurrent`
//! (`Filter::new().address(...).from_block(...).to_block(...)`, then
//! `provider.get_logs`) and `build_metadata` (`provider.get_block_by_number`
//! for the header at a log's block). The ABI registry/decoder that produced
//! `EventMetadata` there is out of this crate's scope; in its place this
//! adapter takes a pluggable [`LogDecoder`],
//! defaulting to [`RawLogDecoder`] when the caller has no ABI to decode
//! against.

use std::sync::Arc;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use tracing::instrument;

use crate::error::InfraError;
use crate::ports::{BlockTag, LogSource, TopicFilter};
use crate::types::{BlockNumber, BlockRef, LogRecord};

/// Decodes a raw chain log into an event name and a JSON payload.
///
/// This is the contract ABI registry and log decoder, an out-of-scope
/// external collaborator: implement it against whatever ABI
/// bindings the embedding application already has.
pub trait LogDecoder: Send + Sync {
    /// Produce `(event_name, decoded_payload)` for `log`.
    fn decode(&self, log: &Log) -> (String, serde_json::Value);
}

/// A [`LogDecoder`] that performs no ABI decoding: `event_name` is the hex
/// string of `topics[0]` (or empty if anonymous), and `decoded_payload` is
/// the raw topics and data, unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLogDecoder;

impl LogDecoder for RawLogDecoder {
    fn decode(&self, log: &Log) -> (String, serde_json::Value) {
        let event_name = log
            .topics()
            .first()
            .map(std::string::ToString::to_string)
            .unwrap_or_default();
        let payload = serde_json::json!({
            "topics": log.topics().iter().map(std::string::ToString::to_string).collect::<Vec<_>>(),
            "data": log.data().data.to_string(),
        });
        (event_name, payload)
    }
}

/// [`LogSource`] for one contract address against a live `alloy` provider.
#[derive(Clone)]
pub struct AlloyLogSource<P> {
    provider: Arc<P>,
    contract: Address,
    decoder: Arc<dyn LogDecoder>,
}

impl<P> std::fmt::Debug for AlloyLogSource<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyLogSource")
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}

impl<P> AlloyLogSource<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    /// Build a log source for `contract` against `provider`, with no ABI
    /// decoding ([`RawLogDecoder`]).
    #[must_use]
    pub fn new(provider: Arc<P>, contract: Address) -> Self {
        Self {
            provider,
            contract,
            decoder: Arc::new(RawLogDecoder),
        }
    }

    /// Attach an ABI-aware [`LogDecoder`].
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn LogDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    fn build_filter(&self, from_block: BlockNumber, to_block: BlockNumber, topics: &TopicFilter) -> Filter {
        let mut filter = Filter::new()
            .address(self.contract)
            .from_block(from_block.value())
            .to_block(to_block.value());
        for (position, options) in topics.0.iter().enumerate() {
            if options.is_empty() {
                continue;
            }
            filter = match position {
                0 => filter.event_signature(options.clone()),
                1 => filter.topic1(options.clone()),
                2 => filter.topic2(options.clone()),
                3 => filter.topic3(options.clone()),
                _ => filter,
            };
        }
        filter
    }

    fn to_log_record(&self, log: &Log) -> Result<LogRecord, InfraError> {
        let block_number = log
            .block_number
            .ok_or_else(|| InfraError::LogSource(Box::from("log missing block_number")))?;
        let block_hash = log
            .block_hash
            .ok_or_else(|| InfraError::LogSource(Box::from("log missing block_hash")))?;
        let transaction_hash = log
            .transaction_hash
            .ok_or_else(|| InfraError::LogSource(Box::from("log missing transaction_hash")))?;
        let log_index = log
            .log_index
            .ok_or_else(|| InfraError::LogSource(Box::from("log missing log_index")))?;

        let (event_name, decoded_payload) = self.decoder.decode(log);

        Ok(LogRecord {
            address: self.contract,
            block_number: BlockNumber::new(block_number),
            block_hash,
            transaction_hash,
            log_index,
            event_name,
            topics: log.topics().to_vec(),
            decoded_payload,
        })
    }
}

#[async_trait]
impl<P> LogSource for AlloyLogSource<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    #[instrument(skip(self, topics), fields(contract = %self.contract))]
    async fn get_past_logs(
        &self,
        from_block: BlockNumber,
        to_block: BlockNumber,
        topics: &TopicFilter,
    ) -> Result<Vec<LogRecord>, InfraError> {
        let filter = self.build_filter(from_block, to_block, topics);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|err| InfraError::LogSource(Box::new(err)))?;

        let mut records = logs
            .iter()
            .map(|log| self.to_log_record(log))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|record| (record.block_number, record.log_index));
        Ok(records)
    }

    #[instrument(skip(self), fields(contract = %self.contract))]
    async fn get_block(&self, tag: BlockTag) -> Result<BlockRef, InfraError> {
        let number_or_tag = match tag {
            BlockTag::Number(n) => BlockNumberOrTag::Number(n.value()),
            BlockTag::Latest => BlockNumberOrTag::Latest,
        };
        let block = self
            .provider
            .get_block_by_number(number_or_tag)
            .await
            .map_err(|err| InfraError::LogSource(Box::new(err)))?
            .ok_or_else(|| InfraError::LogSource(Box::from(format!("block not found: {number_or_tag}"))))?;

        Ok(BlockRef::new(
            BlockNumber::new(block.header.number),
            block.header.hash,
        ))
    }

    #[instrument(skip(self), fields(contract = %self.contract))]
    async fn get_block_number(&self) -> Result<BlockNumber, InfraError> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|err| InfraError::LogSource(Box::new(err)))?;
        Ok(BlockNumber::new(number))
    }
}

// No unit tests here: exercising `get_past_logs`/`get_block` needs a live
// or mocked `Provider`, which the `ScriptedLogSource` double used by the
// pipeline's own test suite already stands in for. See `events_emitter.rs`
// and the integration tests under `tests/` for coverage of this port's
// contract.

//! Production adapters over external infrastructure.
//!
//! `store::memory` is the only persistence adapter this crate ships; a
//! relational one can be added behind a feature the same way. `alloy_log_source`
//! is the one chain-RPC adapter, implementing [`crate::ports::LogSource`]
//! against any [`alloy::providers::Provider`].

pub mod alloy_log_source;

pub use alloy_log_source::{AlloyLogSource, LogDecoder, RawLogDecoder};

//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files. The shape here mirrors
//! the reference service's `config::settings` module, trimmed to the
//! surfaces the pipeline core's out-of-scope collaborators need:
//! the chain RPC client, the two persistence ports, and the CLI's
//! logging sink. The reference service's API/websocket/cache/streaming
//! settings are not part of this crate's scope and are not carried here.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::pipeline::events_emitter::StartingBlock;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Ethereum RPC configuration.
    pub rpc: RpcSettings,
    /// Database configuration, used only when the `postgres`-backed store
    /// adapters are selected over the in-memory reference implementations.
    pub database: DatabaseSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Per-emitter pipeline configuration.
    pub pipeline: PipelineSettings,
    /// Contracts this instance tracks, one [`EventsEmitter`](crate::pipeline::events_emitter::EventsEmitter)
    /// per entry.
    pub contracts: Vec<ContractSettings>,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with `PIPELINE_` prefix
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            .set_default("rpc.url", "http://localhost:8545")?
            .set_default("rpc.chain_id", 1)?
            .set_default("rpc.max_retries", 3)?
            .set_default("rpc.retry_delay_ms", 1000)?
            .set_default("rpc.request_timeout_ms", 30000)?
            .set_default("database.url", "postgres://localhost/event_pipeline")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout_ms", 5000)?
            .set_default("database.idle_timeout_ms", 600_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.file_path", Option::<String>::None)?
            .set_default("pipeline.batch_size", 120)?
            .set_default("pipeline.confirmations", 0)?
            .set_default("pipeline.starting_block", "genesis")?
            .set_default("pipeline.serial_listeners", false)?
            .set_default("pipeline.serial_processing", false)?
            .set_default("pipeline.auto_start", true)?
            .set_default("pipeline.polling_interval_ms", 5000)?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("PIPELINE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path, bypassing environment
    /// layering. Useful for tests and one-off tooling.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// This is a CLI-facing pre-check; the pipeline's own construction
    /// (`EmitterConfig::validate`, invoked from `EventsEmitter::new`) is
    /// the authoritative check for `batch_size`/`topics`/`events`, per
    /// a `ConfigurationError`.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.rpc.url.is_empty() {
            errors.push("rpc.url cannot be empty".into());
        }
        if self.rpc.chain_id == 0 {
            errors.push("rpc.chain_id must be non-zero".into());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be non-zero".into());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push("database.min_connections cannot exceed max_connections".into());
        }
        if self.pipeline.batch_size == 0 {
            errors.push("pipeline.batch_size must be non-zero".into());
        }
        if self.contracts.is_empty() {
            errors.push("at least one entry under contracts is required".into());
        }
        for contract in &self.contracts {
            if contract.topics.is_none() && contract.events.is_none() {
                errors.push(format!(
                    "contracts.{}: at least one of topics/events must be configured",
                    contract.address
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Ethereum RPC configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSettings {
    /// HTTP RPC endpoint URL, used to build the [`crate::adapters::AlloyLogSource`]
    /// provider.
    pub url: String,
    /// Chain ID (for validation against the configured provider).
    pub chain_id: u64,
    /// Maximum retry attempts for failed `LogSource` calls.
    pub max_retries: u32,
    /// Delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl RpcSettings {
    /// Get the retry delay as a `Duration`.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Database configuration for the optional `postgres`-backed store
/// adapters. Unused when the in-memory reference stores are selected.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// Minimum connections to maintain.
    pub min_connections: u32,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle connection timeout in milliseconds.
    pub idle_timeout_ms: u64,
}

impl DatabaseSettings {
    /// Get the connection timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
    /// Optional file path for log output.
    pub file_path: Option<String>,
}

/// Per-emitter pipeline configuration, applied uniformly to every entry
/// in [`Settings::contracts`];
/// a future revision could let individual contracts override these.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Maximum block span per fetched batch. Must be positive.
    pub batch_size: u64,
    /// Confirmation depth required before an event is emitted directly.
    pub confirmations: u64,
    /// `"genesis"`, `"latest"`, or a block number as a string.
    pub starting_block: String,
    /// Whether subscriber dispatch is serial (awaited) rather than
    /// parallel fan-out.
    pub serial_listeners: bool,
    /// Whether `fetch` awaits full dispatch of one event before
    /// dispatching the next.
    pub serial_processing: bool,
    /// Whether the first `newEvent` subscription starts the
    /// [`crate::pipeline::auto_events_emitter::AutoEventsEmitter`] automatically.
    pub auto_start: bool,
    /// Polling interval for [`crate::pipeline::new_block_producer::PollingBlockProducer`],
    /// in milliseconds.
    pub polling_interval_ms: u64,
}

impl PipelineSettings {
    /// Parse [`Self::starting_block`] into a [`StartingBlock`].
    ///
    /// # Errors
    /// Returns an error string if the value is neither `"genesis"`,
    /// `"latest"`, nor a valid `u64`.
    pub fn starting_block(&self) -> Result<StartingBlock, String> {
        match self.starting_block.as_str() {
            "genesis" => Ok(StartingBlock::Genesis),
            "latest" => Ok(StartingBlock::Latest),
            other => other
                .parse::<u64>()
                .map(StartingBlock::Number)
                .map_err(|_| format!("invalid startingBlock: {other}")),
        }
    }

    /// The polling interval as a `Duration`.
    #[must_use]
    pub const fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

/// One tracked contract: its address plus the event-name or topic filter
/// an [`crate::pipeline::events_emitter::EventsEmitter`] is built from.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractSettings {
    /// Checksummed contract address.
    pub address: String,
    /// Client-side event-name filter. At least one of `events`/`topics`
    /// must be set.
    pub events: Option<Vec<String>>,
    /// Server-side topic filter (one inner list per topic position; each
    /// entry is OR'd). Each entry is either a `0x`-prefixed 32-byte topic
    /// hash, used verbatim, or a raw event signature (e.g.
    /// `"Transfer(address,address,uint256)"`), keccak-256-hashed at
    /// construction time — see [`event_pipeline::ports::TopicFilter::resolve_topic_entry`].
    pub topics: Option<Vec<Vec<String>>>,
}

impl ContractSettings {
    /// Parse [`Self::address`] into an [`alloy::primitives::Address`].
    ///
    /// # Errors
    /// Returns an error if the address is not valid hex.
    pub fn parsed_address(&self) -> Result<alloy::primitives::Address, String> {
        use std::str::FromStr;
        alloy::primitives::Address::from_str(&self.address)
            .map_err(|err| format!("invalid address '{}': {err}", self.address))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

//! Layered error types for the event pipeline.
//!
//! - [`DomainError`] - construction/business-rule violations (`ConfigurationError`,
//!   `DuplicateEvent`, invalid starting block).
//! - [`InfraError`] - failures from the out-of-scope collaborators the core
//!   consumes: the `LogSource`, the block-tracker store, the confirmation
//!   buffer store.
//! - [`AppError`] - combines the two plus listener-callback failures; this
//!   is the type carried on the `error` channel.
//!
//! # Error philosophy
//!
//! The core never throws across its public
//! boundary: every failure except construction-time configuration errors
//! becomes an `error`-channel [`crate::types::PipelineEvent::Error`] payload
//! instead of an `Err` returned to a caller that isn't expecting one.
//! `ReorgOutOfRange` is deliberately not a variant here — it is "not an
//! error but a notification", so it travels as a channel payload
//! ([`crate::types::PipelineEvent::ReorgOutOfRange`]) instead.

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors representing a violation of the pipeline's own business rules.
///
/// `ConfigurationError` and `InvalidStartingBlock` are fatal at
/// construction time; `DuplicateEvent` is fatal for the fetch cycle that
/// raised it (recoverable on the next cycle, see [`crate::pipeline::events_emitter`]).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomainError {
    /// Neither `topics` nor `events` was configured, or `batchSize` was
    /// non-positive.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `startingBlock` was neither a valid block number, `"genesis"`, nor
    /// `"latest"`.
    #[error("invalid starting block: {0}")]
    InvalidStartingBlock(String),

    /// Unique-constraint violation on a confirmation-buffer insert under
    /// normal (non-recovery) operation.
    #[error(
        "duplicate event for contract {contract}: tx={transaction_hash} log_index={log_index}"
    )]
    DuplicateEvent {
        /// Contract the row belongs to.
        contract: String,
        /// Transaction hash component of the row's identity.
        transaction_hash: String,
        /// Log index component of the row's identity.
        log_index: u64,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors from the out-of-scope collaborators the pipeline consumes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// `LogSource` call failed (`getPastLogs`, `getBlock`, `getBlockNumber`).
    ///
    /// A transient RPC failure: logged, routed to `error`,
    /// the cycle is aborted, cursors are left unchanged, and the next new
    /// block retries.
    #[error("log source error: {0}")]
    LogSource(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// BlockTracker store read/write failed.
    ///
    /// A storage-layer failure.
    #[error("block tracker store error: {0}")]
    BlockTrackerStore(String),

    /// ConfirmationBuffer store read/write failed.
    ///
    /// A storage-layer failure.
    #[error("confirmation buffer store error: {0}")]
    ConfirmationBufferStore(String),

    /// Failed to load configuration.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type carried on the pipeline's `error` channel, and returned
/// from the handful of calls (construction, explicit `fetch` driving) that
/// are allowed to fail synchronously.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Business-rule violation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure failure.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// A subscriber callback failed.
    ///
    /// A subscriber callback failure: routed to `error`, never fatal
    /// to the pipeline.
    #[error("listener error: {0}")]
    Listener(String),

    /// Graceful shutdown was requested mid-operation.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for pipeline results.
pub type Result<T> = std::result::Result<T, AppError>;

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

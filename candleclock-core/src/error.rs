//! Structured error types shared by the engine and its collaborators.
//!
//! None of these are fatal: each is absorbed at the boundary where it occurs
//! and surfaced to the operator as a notification.

use crate::ledger::TradeId;
use thiserror::Error;

/// Failures at the capture and decision boundaries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("no capture source attached")]
    NoCaptureSource,

    #[error("capture source has no frame available yet")]
    FrameUnavailable,

    #[error("decision source failed: {0}")]
    DecisionFailure(String),

    #[error("decision payload malformed: {0}")]
    MalformedDecision(String),
}

/// Operator commands rejected by the scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("attach a capture source before activating")]
    NoCaptureSource,

    #[error("risk breaker tripped; reset required before reactivating")]
    BreakerTripped,
}

/// Ledger misuse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("WAIT signals are not recorded")]
    NotActionable,

    #[error("no trade with id {0}")]
    UnknownTrade(TradeId),

    #[error("trade {0} is already resolved")]
    AlreadyResolved(TradeId),
}

/// Configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

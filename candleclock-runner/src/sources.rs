//! External collaborators consumed by the engine.
//!
//! Capture, decision and outcome sampling are all injected, so the engine
//! itself holds no randomness and no I/O.

use async_trait::async_trait;
use candleclock_core::{EncodedFrame, Signal, SignalError, TradeOutcome, TradeRecord};

/// Supplies still frames of the chart being watched.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    fn name(&self) -> &str;

    /// Acquire the stream. Fails with `PermissionDenied` when refused.
    async fn attach(&self) -> Result<(), SignalError>;

    /// Release the stream.
    fn detach(&self);

    /// The latest frame, downscaled and lossy-encoded. `None` until the stream
    /// reports dimensions.
    async fn grab_frame(&self) -> Option<EncodedFrame>;
}

/// Turns a frame plus instructions into a decision.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, frame: &EncodedFrame, instructions: &str) -> Result<Signal, SignalError>;
}

/// Decides how a pending trade ended once its resolution delay has elapsed.
pub trait OutcomeOracle: Send + Sync {
    fn sample(&self, record: &TradeRecord) -> TradeOutcome;
}

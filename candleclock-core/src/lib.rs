//! candleclock core — candle-synchronized trigger scheduling, signal
//! bookkeeping and the loss-streak circuit breaker.
//!
//! This crate is synchronous and clock-free; the async runtime lives in
//! `candleclock-runner`.
//! - Timeframes and candle-close arithmetic
//! - Per-tick trigger evaluation with at-most-once firing per candle
//! - Signals and their JSON wire format
//! - Trade ledger with pending → won/lost lifecycle and statistics
//! - Risk governor that halts the scheduler after consecutive losses
//! - `TradingSession`, the owned context combining all of the above

pub mod config;
pub mod error;
pub mod frame;
pub mod ledger;
pub mod risk;
pub mod schedule;
pub mod scheduler;
pub mod session;
pub mod signal;
pub mod timeframe;

pub use config::{CaptureConfig, EngineConfig, ResolutionDelay};
pub use error::{ConfigError, LedgerError, SchedulerError, SignalError};
pub use frame::EncodedFrame;
pub use ledger::{LedgerStats, TradeId, TradeLedger, TradeOutcome, TradeRecord, TradeStatus};
pub use risk::{RiskGovernor, RiskVerdict};
pub use schedule::Countdown;
pub use scheduler::{RunState, TickOutcome, Trigger, TriggerScheduler, TriggerState};
pub use session::{AnalysisStart, Published, Settlement, Snapshot, TradingSession};
pub use signal::{Action, RiskLevel, Signal, TradeSide};
pub use timeframe::Timeframe;

#[cfg(test)]
mod tests {
    use super::*;

    /// The session moves into the engine task; everything it owns must be Send.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<TradingSession>();
        require_sync::<TradingSession>();
        require_send::<Snapshot>();
        require_sync::<Snapshot>();
        require_send::<Signal>();
        require_sync::<Signal>();
        require_send::<SignalError>();
        require_sync::<SignalError>();
        require_send::<EncodedFrame>();
        require_sync::<EncodedFrame>();
    }
}

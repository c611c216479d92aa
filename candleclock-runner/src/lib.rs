//! candleclock runner — drives a [`candleclock_core::TradingSession`] on tokio.
//!
//! - `ClockTimer` ticking at a fixed period against a pluggable wall clock
//! - Capture, decision and outcome collaborators as traits
//! - The `Engine` task: single-flight analysis, cancellable resolution timers,
//!   snapshot and event publication
//! - Demo and scripted collaborators

pub mod clock;
pub mod demo;
pub mod engine;
pub mod scripted;
pub mod sources;
pub mod timer;

pub use clock::{ClockTick, ClockTimer, SystemClock, TokioClock, WallClock};
pub use engine::{Collaborators, Engine, EngineError, EngineEvent, EngineHandle};
pub use sources::{CaptureSource, OutcomeOracle, SignalSource};
pub use timer::{ResolutionTimers, TimerGuard};

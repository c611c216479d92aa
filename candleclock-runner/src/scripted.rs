//! Deterministic collaborators that replay a prepared script. Used by the
//! engine tests.

use crate::sources::{OutcomeOracle, SignalSource};
use async_trait::async_trait;
use candleclock_core::{EncodedFrame, Signal, SignalError, TradeOutcome, TradeRecord};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Replays queued decisions, each after `latency`. Once the queue runs dry
/// every call fails with `DecisionFailure`.
#[derive(Debug)]
pub struct ScriptedSignalSource {
    script: Mutex<VecDeque<Result<Signal, SignalError>>>,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedSignalSource {
    pub fn new(script: impl IntoIterator<Item = Result<Signal, SignalError>>, latency: Duration) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            latency,
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `evaluate` has been entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl SignalSource for ScriptedSignalSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn evaluate(&self, _frame: &EncodedFrame, _instructions: &str) -> Result<Signal, SignalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| Err(SignalError::DecisionFailure("script exhausted".into())))
    }
}

/// Replays queued outcomes, then repeats `fallback`.
#[derive(Debug)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<TradeOutcome>>,
    fallback: TradeOutcome,
}

impl ScriptedOracle {
    pub fn new(script: impl IntoIterator<Item = TradeOutcome>, fallback: TradeOutcome) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
        }
    }

    pub fn always(outcome: TradeOutcome) -> Self {
        Self::new([], outcome)
    }
}

impl OutcomeOracle for ScriptedOracle {
    fn sample(&self, record: &TradeRecord) -> TradeOutcome {
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback);
        log::debug!("trade {} scripted as {:?}", record.id, outcome);
        outcome
    }
}

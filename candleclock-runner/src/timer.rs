//! Cancellable one-shot timers owned by the engine.

use candleclock_core::TradeId;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Aborts the wrapped task when dropped.
#[derive(Debug)]
pub struct TimerGuard(AbortHandle);

impl TimerGuard {
    /// Run `fire` after `delay` on a detached task.
    pub fn arm<F>(delay: Duration, fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        })
    }

    /// Run `task` right away, tied to the guard's lifetime.
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(task).abort_handle())
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Pending resolution timers, one per open trade.
#[derive(Debug, Default)]
pub struct ResolutionTimers {
    guards: HashMap<TradeId, TimerGuard>,
}

impl ResolutionTimers {
    pub fn insert(&mut self, id: TradeId, guard: TimerGuard) {
        if self.guards.insert(id, guard).is_some() {
            log::warn!("resolution timer for trade {id} replaced");
        }
    }

    /// Forget a timer that has fired.
    pub fn complete(&mut self, id: TradeId) -> bool {
        self.guards.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Abort every outstanding timer.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.guards.len();
        self.guards.clear();
        n
    }
}

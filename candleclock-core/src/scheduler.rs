//! TriggerScheduler — per-tick evaluation of the pre-close trigger.
//!
//! The scheduler is clock-agnostic: callers feed it the current time once per
//! tick and act on the returned [`TickOutcome`].

use crate::error::SchedulerError;
use crate::schedule::{delay_with_buffer, in_trigger_window, Countdown};
use crate::timeframe::Timeframe;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Scheduler run state as seen by the operator.
///
/// `Idle → Active` on activation (capture required), `Active → Paused` only
/// through a breaker trip, `Paused → Idle` only through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Active,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerState {
    pub timeframe: Timeframe,
    /// Operator switch.
    pub active: bool,
    /// Set by the risk governor only; cleared only by a reset.
    pub paused: bool,
    pub last_trigger_at: Option<DateTime<Utc>>,
    /// Candle close the last trigger was aimed at.
    pub last_target: Option<DateTime<Utc>>,
}

impl TriggerState {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            active: false,
            paused: false,
            last_trigger_at: None,
            last_target: None,
        }
    }

    pub fn run_state(&self) -> RunState {
        if self.paused {
            RunState::Paused
        } else if self.active {
            RunState::Active
        } else {
            RunState::Idle
        }
    }
}

/// A fired trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub timeframe: Timeframe,
    pub fired_at: DateTime<Utc>,
    pub target_close: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub countdown: Countdown,
    pub trigger: Option<Trigger>,
}

#[derive(Debug, Clone)]
pub struct TriggerScheduler {
    state: TriggerState,
    buffer_ms: i64,
    window_ms: i64,
}

impl TriggerScheduler {
    pub fn new(timeframe: Timeframe, buffer_ms: i64, window_ms: i64) -> Self {
        Self {
            state: TriggerState::new(timeframe),
            buffer_ms,
            window_ms,
        }
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut TriggerState {
        &mut self.state
    }

    pub fn timeframe(&self) -> Timeframe {
        self.state.timeframe
    }

    pub fn run_state(&self) -> RunState {
        self.state.run_state()
    }

    pub fn activate(&mut self, capture_attached: bool) -> Result<(), SchedulerError> {
        if self.state.paused {
            return Err(SchedulerError::BreakerTripped);
        }
        if !capture_attached {
            return Err(SchedulerError::NoCaptureSource);
        }
        if !self.state.active {
            log::info!("scheduler activated on {}", self.state.timeframe);
        }
        self.state.active = true;
        Ok(())
    }

    pub fn deactivate(&mut self) {
        if self.state.active {
            log::info!("scheduler deactivated");
        }
        self.state.active = false;
    }

    /// Switch timeframe. The countdown is recomputed from scratch on the next tick.
    pub fn set_timeframe(&mut self, timeframe: Timeframe) -> bool {
        if self.state.timeframe == timeframe {
            return false;
        }
        log::info!("timeframe {} -> {}", self.state.timeframe, timeframe);
        self.state.timeframe = timeframe;
        true
    }

    /// Evaluate one clock tick.
    ///
    /// Fires when the delay to the next trigger point falls inside the window,
    /// at most once per targeted candle close.
    pub fn on_tick(&mut self, now: DateTime<Utc>, capture_attached: bool) -> TickOutcome {
        if !self.state.active {
            return TickOutcome {
                countdown: Countdown::Idle,
                trigger: None,
            };
        }
        if self.state.paused || !capture_attached {
            return TickOutcome {
                countdown: Countdown::Syncing,
                trigger: None,
            };
        }

        let now = now.trunc_subsecs(3);
        let timeframe = self.state.timeframe;
        let delay = delay_with_buffer(timeframe, &now, self.buffer_ms);
        let countdown = Countdown::Remaining(delay);

        if !in_trigger_window(delay, self.window_ms) {
            return TickOutcome {
                countdown,
                trigger: None,
            };
        }

        let target_close = now + Duration::milliseconds(delay + self.buffer_ms);
        if self.state.last_target == Some(target_close) {
            log::debug!("trigger for {} close already fired", target_close);
            return TickOutcome {
                countdown,
                trigger: None,
            };
        }

        self.state.last_target = Some(target_close);
        self.state.last_trigger_at = Some(now);
        log::info!(
            "pre-close trigger on {} at {} (candle closes {})",
            timeframe,
            now.format("%H:%M:%S%.3f"),
            target_close.format("%H:%M:%S")
        );

        TickOutcome {
            countdown,
            trigger: Some(Trigger {
                timeframe,
                fired_at: now,
                target_close,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{PRE_CLOSE_BUFFER_MS, TRIGGER_WINDOW_MS};
    use chrono::TimeZone;

    fn at(m: u32, s: u32, ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, m, s).unwrap() + Duration::milliseconds(ms)
    }

    fn scheduler() -> TriggerScheduler {
        TriggerScheduler::new(Timeframe::OneMinute, PRE_CLOSE_BUFFER_MS, TRIGGER_WINDOW_MS)
    }

    #[test]
    fn inactive_is_idle() {
        let mut s = scheduler();
        let out = s.on_tick(at(0, 49, 500), true);
        assert_eq!(out.countdown, Countdown::Idle);
        assert!(out.trigger.is_none());
    }

    #[test]
    fn activation_requires_capture() {
        let mut s = scheduler();
        assert_eq!(s.activate(false), Err(SchedulerError::NoCaptureSource));
        assert_eq!(s.run_state(), RunState::Idle);
        s.activate(true).unwrap();
        assert_eq!(s.run_state(), RunState::Active);
    }

    #[test]
    fn active_without_capture_is_syncing() {
        let mut s = scheduler();
        s.activate(true).unwrap();
        let out = s.on_tick(at(0, 49, 500), false);
        assert_eq!(out.countdown, Countdown::Syncing);
        assert!(out.trigger.is_none());
    }

    #[test]
    fn fires_inside_window_with_target_close() {
        let mut s = scheduler();
        s.activate(true).unwrap();
        let out = s.on_tick(at(0, 49, 300), true);
        let trigger = out.trigger.expect("should fire");
        assert_eq!(trigger.target_close, at(1, 0, 0));
        assert_eq!(s.state().last_trigger_at, Some(at(0, 49, 300)));
    }

    #[test]
    fn burst_ticks_in_same_window_fire_once() {
        let mut s = scheduler();
        s.activate(true).unwrap();
        assert!(s.on_tick(at(0, 49, 100), true).trigger.is_some());
        assert!(s.on_tick(at(0, 49, 900), true).trigger.is_none());
        // Next candle fires again.
        assert!(s.on_tick(at(1, 49, 100), true).trigger.is_some());
    }

    #[test]
    fn paused_blocks_activation_and_firing() {
        let mut s = scheduler();
        s.activate(true).unwrap();
        s.state_mut().paused = true;
        s.state_mut().active = false;
        assert_eq!(s.activate(true), Err(SchedulerError::BreakerTripped));
        assert_eq!(s.run_state(), RunState::Paused);
        assert_eq!(s.on_tick(at(0, 49, 500), true).countdown, Countdown::Idle);
    }

    #[test]
    fn timeframe_switch_recomputes_countdown() {
        let mut s = scheduler();
        s.activate(true).unwrap();
        assert_eq!(s.on_tick(at(2, 0, 0), true).countdown, Countdown::Remaining(50_000));
        assert!(s.set_timeframe(Timeframe::FiveMinutes));
        assert!(!s.set_timeframe(Timeframe::FiveMinutes));
        assert_eq!(s.on_tick(at(2, 1, 0), true).countdown, Countdown::Remaining(169_000));
    }
}

//! Consecutive-loss circuit breaker.
//!
//! Unlike a cooldown breaker, a trip here is terminal: the scheduler is paused
//! and switched off, and stays that way until an operator reset.

use crate::ledger::TradeOutcome;
use crate::scheduler::TriggerState;
use serde::{Deserialize, Serialize};

/// Default number of consecutive losses that trips the breaker.
pub const DEFAULT_LOSS_STREAK_LIMIT: u32 = 3;

/// What the governor concluded from a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskVerdict {
    /// A win cleared the streak.
    Cleared,
    /// A loss below the limit.
    Counting { streak: u32 },
    /// This loss reached the limit; the scheduler was paused and deactivated.
    Tripped { streak: u32 },
    /// A late loss arrived while already tripped.
    StillTripped { streak: u32 },
}

#[derive(Debug, Clone)]
pub struct RiskGovernor {
    streak: u32,
    limit: u32,
    trips: u32,
}

impl Default for RiskGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_LOSS_STREAK_LIMIT)
    }
}

impl RiskGovernor {
    pub fn new(limit: u32) -> Self {
        Self {
            streak: 0,
            limit: limit.max(1),
            trips: 0,
        }
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of trips since construction.
    pub fn trips(&self) -> u32 {
        self.trips
    }

    /// Observe a resolved trade. The only code path that sets `paused`.
    pub fn on_resolved(&mut self, outcome: TradeOutcome, state: &mut TriggerState) -> RiskVerdict {
        match outcome {
            TradeOutcome::Won => {
                self.streak = 0;
                RiskVerdict::Cleared
            }
            TradeOutcome::Lost => {
                self.streak += 1;
                if self.streak < self.limit {
                    return RiskVerdict::Counting {
                        streak: self.streak,
                    };
                }
                if state.paused {
                    return RiskVerdict::StillTripped {
                        streak: self.streak,
                    };
                }
                state.paused = true;
                state.active = false;
                self.trips += 1;
                log::warn!(
                    "risk breaker tripped: {} consecutive losses, scheduler halted",
                    self.streak
                );
                RiskVerdict::Tripped {
                    streak: self.streak,
                }
            }
        }
    }

    /// Operator reset: clears the pause, zeroes the streak and leaves the
    /// scheduler switched off.
    pub fn reset(&mut self, state: &mut TriggerState) {
        self.streak = 0;
        state.paused = false;
        state.active = false;
        log::info!("risk breaker reset; scheduler must be re-activated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunState;
    use crate::timeframe::Timeframe;
    use TradeOutcome::{Lost, Won};

    fn active_state() -> TriggerState {
        let mut state = TriggerState::new(Timeframe::OneMinute);
        state.active = true;
        state
    }

    #[test]
    fn three_losses_trip() {
        let mut gov = RiskGovernor::default();
        let mut state = active_state();
        assert_eq!(gov.on_resolved(Lost, &mut state), RiskVerdict::Counting { streak: 1 });
        assert_eq!(gov.on_resolved(Lost, &mut state), RiskVerdict::Counting { streak: 2 });
        assert_eq!(gov.on_resolved(Lost, &mut state), RiskVerdict::Tripped { streak: 3 });
        assert!(state.paused);
        assert!(!state.active);
        assert_eq!(state.run_state(), RunState::Paused);
        assert_eq!(gov.trips(), 1);
    }

    #[test]
    fn interleaved_win_prevents_trip() {
        let mut gov = RiskGovernor::default();
        let mut state = active_state();
        for outcome in [Lost, Lost, Won, Lost, Lost] {
            gov.on_resolved(outcome, &mut state);
        }
        assert_eq!(gov.streak(), 2);
        assert!(!state.paused);
        assert!(state.active);
    }

    #[test]
    fn late_losses_after_trip_do_not_retrip() {
        let mut gov = RiskGovernor::default();
        let mut state = active_state();
        for _ in 0..3 {
            gov.on_resolved(Lost, &mut state);
        }
        assert_eq!(gov.on_resolved(Lost, &mut state), RiskVerdict::StillTripped { streak: 4 });
        assert_eq!(gov.trips(), 1);
    }

    #[test]
    fn win_while_tripped_keeps_pause() {
        let mut gov = RiskGovernor::default();
        let mut state = active_state();
        for _ in 0..3 {
            gov.on_resolved(Lost, &mut state);
        }
        assert_eq!(gov.on_resolved(Won, &mut state), RiskVerdict::Cleared);
        assert!(state.paused);
    }

    #[test]
    fn reset_always_yields_idle_and_zero_streak() {
        let mut gov = RiskGovernor::default();
        let mut state = active_state();
        gov.on_resolved(Lost, &mut state);
        gov.reset(&mut state);
        assert_eq!((state.paused, state.active, gov.streak()), (false, false, 0));

        for _ in 0..3 {
            gov.on_resolved(Lost, &mut state);
        }
        gov.reset(&mut state);
        assert_eq!((state.paused, state.active, gov.streak()), (false, false, 0));
        assert_eq!(state.run_state(), RunState::Idle);
    }

    #[test]
    fn limit_of_one_trips_immediately() {
        let mut gov = RiskGovernor::new(1);
        let mut state = active_state();
        assert_eq!(gov.on_resolved(Lost, &mut state), RiskVerdict::Tripped { streak: 1 });
    }
}

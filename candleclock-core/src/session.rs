//! TradingSession — the explicitly owned context tying scheduler, ledger and
//! risk governor together.
//!
//! The session is synchronous and clock-free: every operation takes `now` from
//! the caller. The async engine owns exactly one session and is the only code
//! that mutates it, so no locking is involved.

use crate::config::EngineConfig;
use crate::error::{LedgerError, SchedulerError, SignalError};
use crate::ledger::{LedgerStats, TradeId, TradeLedger, TradeOutcome, TradeRecord};
use crate::risk::{RiskGovernor, RiskVerdict};
use crate::schedule::Countdown;
use crate::scheduler::{RunState, TickOutcome, TriggerScheduler, TriggerState};
use crate::signal::Signal;
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of asking for an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStart {
    Started,
    /// Another run is in flight; this request was dropped.
    AlreadyRunning,
}

/// A signal that made it through the decision source.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub signal: Signal,
    /// Present when the signal was actionable.
    pub trade: Option<TradeRecord>,
}

/// A resolved trade and the governor's reaction to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub record: TradeRecord,
    pub verdict: RiskVerdict,
}

/// Read-only projection of the session for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub countdown: Countdown,
    pub state: TriggerState,
    pub run_state: RunState,
    pub capture_attached: bool,
    pub analyzing: bool,
    pub loss_streak: u32,
    pub signal: Option<Signal>,
    /// Most recent first.
    pub trades: Vec<TradeRecord>,
    pub stats: LedgerStats,
}

#[derive(Debug, Clone)]
pub struct TradingSession {
    config: EngineConfig,
    scheduler: TriggerScheduler,
    ledger: TradeLedger,
    governor: RiskGovernor,
    capture_attached: bool,
    analyzing: bool,
    last_signal: Option<Signal>,
    countdown: Countdown,
}

impl TradingSession {
    pub fn new(config: EngineConfig) -> Self {
        let scheduler = TriggerScheduler::new(
            config.timeframe,
            config.pre_close_buffer_ms,
            config.trigger_window_ms(),
        );
        let ledger = TradeLedger::new(config.stake);
        let governor = RiskGovernor::new(config.loss_streak_limit);
        Self {
            config,
            scheduler,
            ledger,
            governor,
            capture_attached: false,
            analyzing: false,
            last_signal: None,
            countdown: Countdown::Idle,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &TriggerState {
        self.scheduler.state()
    }

    pub fn run_state(&self) -> RunState {
        self.scheduler.run_state()
    }

    pub fn timeframe(&self) -> Timeframe {
        self.scheduler.timeframe()
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    pub fn loss_streak(&self) -> u32 {
        self.governor.streak()
    }

    pub fn last_signal(&self) -> Option<&Signal> {
        self.last_signal.as_ref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn capture_attached(&self) -> bool {
        self.capture_attached
    }

    pub fn countdown(&self) -> Countdown {
        self.countdown
    }

    // ── Operator commands ──

    pub fn activate(&mut self) -> Result<(), SchedulerError> {
        self.scheduler.activate(self.capture_attached)
    }

    pub fn deactivate(&mut self) {
        self.scheduler.deactivate();
        self.countdown = Countdown::Idle;
    }

    pub fn set_timeframe(&mut self, timeframe: Timeframe) -> bool {
        self.scheduler.set_timeframe(timeframe)
    }

    pub fn capture_did_attach(&mut self) {
        self.capture_attached = true;
    }

    /// Losing capture also switches the scheduler off.
    pub fn capture_did_detach(&mut self) {
        self.capture_attached = false;
        self.deactivate();
    }

    pub fn reset_risk(&mut self) {
        self.governor.reset(self.scheduler.state_mut());
        self.countdown = Countdown::Idle;
    }

    // ── Clock ──

    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let outcome = self.scheduler.on_tick(now, self.capture_attached);
        self.countdown = outcome.countdown;
        outcome
    }

    // ── Analysis (single-flight) ──

    /// Claim the analysis slot. Requests made while a run is in flight are dropped.
    pub fn begin_analysis(&mut self) -> Result<AnalysisStart, SignalError> {
        if !self.capture_attached {
            return Err(SignalError::NoCaptureSource);
        }
        if self.analyzing {
            log::debug!("analysis already in flight; request dropped");
            return Ok(AnalysisStart::AlreadyRunning);
        }
        self.analyzing = true;
        Ok(AnalysisStart::Started)
    }

    /// Release the analysis slot and publish the outcome. The slot is freed on
    /// every path; only an actionable signal opens a trade.
    pub fn finish_analysis(
        &mut self,
        result: Result<Signal, SignalError>,
        now: DateTime<Utc>,
    ) -> Result<Published, SignalError> {
        self.analyzing = false;
        let signal = result?;

        log::info!(
            "signal {} ({}%, risk {:?}): {}",
            signal.action,
            signal.confidence,
            signal.risk_level,
            signal.rationale.lines().next().unwrap_or_default()
        );
        self.last_signal = Some(signal.clone());

        let trade = match self.ledger.open(&signal, self.timeframe(), now) {
            Ok(record) => Some(record),
            Err(LedgerError::NotActionable) => None,
            Err(e) => {
                log::error!("failed to record trade: {e}");
                None
            }
        };
        Ok(Published { signal, trade })
    }

    // ── Trade resolution ──

    pub fn resolution_delay(&self, record: &TradeRecord) -> Duration {
        self.config.resolution.for_timeframe(record.timeframe)
    }

    pub fn resolve_trade(
        &mut self,
        id: TradeId,
        outcome: TradeOutcome,
        now: DateTime<Utc>,
    ) -> Result<Settlement, LedgerError> {
        let record = self.ledger.resolve(id, outcome, now)?;
        let verdict = self.governor.on_resolved(outcome, self.scheduler.state_mut());
        if matches!(verdict, RiskVerdict::Tripped { .. }) {
            self.countdown = Countdown::Idle;
        }
        Ok(Settlement { record, verdict })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            countdown: self.countdown,
            state: self.state().clone(),
            run_state: self.run_state(),
            capture_attached: self.capture_attached,
            analyzing: self.analyzing,
            loss_streak: self.governor.streak(),
            signal: self.last_signal.clone(),
            trades: self.ledger.records().cloned().collect(),
            stats: self.ledger.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Action;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 49).unwrap()
    }

    fn armed() -> TradingSession {
        let mut session = TradingSession::new(EngineConfig::default());
        session.capture_did_attach();
        session.activate().unwrap();
        session
    }

    fn buy() -> Signal {
        Signal::new(Action::Buy, 90, "engulfing at support", t0()).unwrap()
    }

    #[test]
    fn analysis_requires_capture() {
        let mut session = TradingSession::new(EngineConfig::default());
        assert_eq!(session.begin_analysis(), Err(SignalError::NoCaptureSource));
        assert!(!session.is_analyzing());
    }

    #[test]
    fn single_flight_drops_second_request() {
        let mut session = armed();
        assert_eq!(session.begin_analysis(), Ok(AnalysisStart::Started));
        assert_eq!(session.begin_analysis(), Ok(AnalysisStart::AlreadyRunning));
        session.finish_analysis(Ok(buy()), t0()).unwrap();
        assert_eq!(session.begin_analysis(), Ok(AnalysisStart::Started));
    }

    #[test]
    fn failure_clears_busy_and_opens_nothing() {
        let mut session = armed();
        session.begin_analysis().unwrap();
        let err = session
            .finish_analysis(Err(SignalError::DecisionFailure("timeout".into())), t0())
            .unwrap_err();
        assert!(matches!(err, SignalError::DecisionFailure(_)));
        assert!(!session.is_analyzing());
        assert!(session.ledger().is_empty());
        assert!(session.last_signal().is_none());
    }

    #[test]
    fn wait_is_published_but_not_recorded() {
        let mut session = armed();
        session.begin_analysis().unwrap();
        let wait = Signal::new(Action::Wait, 80, "ranging", t0()).unwrap();
        let published = session.finish_analysis(Ok(wait), t0()).unwrap();
        assert!(published.trade.is_none());
        assert_eq!(session.last_signal().map(|s| s.action), Some(Action::Wait));
        assert!(session.ledger().is_empty());
    }

    #[test]
    fn actionable_signal_opens_pending_trade_on_current_timeframe() {
        let mut session = armed();
        session.set_timeframe(Timeframe::FiveMinutes);
        session.begin_analysis().unwrap();
        let published = session.finish_analysis(Ok(buy()), t0()).unwrap();
        let trade = published.trade.unwrap();
        assert!(trade.is_pending());
        assert_eq!(trade.timeframe, Timeframe::FiveMinutes);
        assert_eq!(session.resolution_delay(&trade), Duration::from_secs(300));
    }

    #[test]
    fn three_losses_pause_and_reset_rearms_manually() {
        let mut session = armed();
        for i in 0..3 {
            session.begin_analysis().unwrap();
            let trade = session
                .finish_analysis(Ok(buy()), t0() + chrono::Duration::seconds(i))
                .unwrap()
                .trade
                .unwrap();
            session.resolve_trade(trade.id, TradeOutcome::Lost, t0()).unwrap();
        }
        assert_eq!(session.run_state(), RunState::Paused);
        assert!(!session.state().active);
        assert_eq!(session.activate(), Err(SchedulerError::BreakerTripped));
        assert_eq!(session.tick(t0()).countdown, Countdown::Idle);

        session.reset_risk();
        assert_eq!(session.run_state(), RunState::Idle);
        assert_eq!(session.loss_streak(), 0);
        session.activate().unwrap();
        assert_eq!(session.run_state(), RunState::Active);
    }

    #[test]
    fn detach_switches_scheduler_off() {
        let mut session = armed();
        session.capture_did_detach();
        assert_eq!(session.run_state(), RunState::Idle);
        assert_eq!(session.activate(), Err(SchedulerError::NoCaptureSource));
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut session = armed();
        let out = session.tick(t0());
        assert!(out.trigger.is_some());
        let snap = session.snapshot();
        assert_eq!(snap.countdown, Countdown::Remaining(1_000));
        assert_eq!(snap.run_state, RunState::Active);
        assert!(snap.capture_attached);
        assert!(snap.trades.is_empty());
    }
}

//! TradeLedger: acted-upon signals and their pending → resolved lifecycle.

use crate::error::LedgerError;
use crate::signal::{Signal, TradeSide};
use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default profit magnitude of a resolved trade.
pub const DEFAULT_STAKE: f64 = 50.0;

/// Trade identifier: creation time in epoch milliseconds, bumped to stay unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    Won,
    Lost,
}

/// Result delivered by the outcome oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Won,
    Lost,
}

impl TradeOutcome {
    pub fn from_win(won: bool) -> Self {
        if won {
            TradeOutcome::Won
        } else {
            TradeOutcome::Lost
        }
    }
}

impl From<TradeOutcome> for TradeStatus {
    fn from(outcome: TradeOutcome) -> Self {
        match outcome {
            TradeOutcome::Won => TradeStatus::Won,
            TradeOutcome::Lost => TradeStatus::Lost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: TradeId,
    pub opened_at: DateTime<Utc>,
    pub side: TradeSide,
    pub confidence: u8,
    /// Timeframe active when the trade was opened; drives its resolution delay.
    pub timeframe: Timeframe,
    pub status: TradeStatus,
    pub profit: f64,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    pub fn is_pending(&self) -> bool {
        self.status == TradeStatus::Pending
    }
}

/// Aggregate over resolved trades.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percentage in 0..=100; 0 when nothing is resolved.
    pub win_rate: f64,
    pub net_profit: f64,
}

impl LedgerStats {
    /// Win rate with one decimal place, e.g. `66.7`.
    pub fn win_rate_display(&self) -> String {
        format!("{:.1}", self.win_rate)
    }
}

/// Append-only, most-recent-first record of acted-upon signals.
#[derive(Debug, Clone)]
pub struct TradeLedger {
    records: VecDeque<TradeRecord>,
    last_id: u64,
    stake: f64,
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new(DEFAULT_STAKE)
    }
}

impl TradeLedger {
    pub fn new(stake: f64) -> Self {
        Self {
            records: VecDeque::new(),
            last_id: 0,
            stake,
        }
    }

    /// Open a PENDING trade for an actionable signal and place it at the head.
    pub fn open(
        &mut self,
        signal: &Signal,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord, LedgerError> {
        let side = signal.trade_side().ok_or(LedgerError::NotActionable)?;

        let stamp = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let id = stamp.max(self.last_id + 1);
        self.last_id = id;

        let record = TradeRecord {
            id: TradeId(id),
            opened_at: now,
            side,
            confidence: signal.confidence,
            timeframe,
            status: TradeStatus::Pending,
            profit: 0.0,
            resolved_at: None,
        };
        self.records.push_front(record.clone());
        log::info!(
            "trade {} opened: {} @ {}% on {}",
            record.id,
            record.side,
            record.confidence,
            record.timeframe
        );
        Ok(record)
    }

    /// Settle a PENDING trade in place. Every other record is left untouched.
    pub fn resolve(
        &mut self,
        id: TradeId,
        outcome: TradeOutcome,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord, LedgerError> {
        let stake = self.stake;
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(LedgerError::UnknownTrade(id))?;

        if !record.is_pending() {
            return Err(LedgerError::AlreadyResolved(id));
        }

        record.status = outcome.into();
        record.profit = match outcome {
            TradeOutcome::Won => stake,
            TradeOutcome::Lost => -stake,
        };
        record.resolved_at = Some(now);
        log::info!("trade {} resolved: {:?} ({:+.2})", id, record.status, record.profit);
        Ok(record.clone())
    }

    pub fn get(&self, id: TradeId) -> Option<&TradeRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records, most recent first.
    pub fn records(&self) -> impl DoubleEndedIterator<Item = &TradeRecord> {
        self.records.iter()
    }

    pub fn pending(&self) -> impl Iterator<Item = &TradeRecord> {
        self.records.iter().filter(|r| r.is_pending())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stake(&self) -> f64 {
        self.stake
    }

    pub fn stats(&self) -> LedgerStats {
        stats_of(self.records.iter())
    }
}

/// Order-independent fold over any set of records; PENDING entries are skipped.
pub fn stats_of<'a>(records: impl IntoIterator<Item = &'a TradeRecord>) -> LedgerStats {
    let mut stats = LedgerStats::default();
    for record in records {
        match record.status {
            TradeStatus::Pending => continue,
            TradeStatus::Won => stats.wins += 1,
            TradeStatus::Lost => stats.losses += 1,
        }
        stats.net_profit += record.profit;
    }
    stats.total = stats.wins + stats.losses;
    if stats.total > 0 {
        stats.win_rate = stats.wins as f64 / stats.total as f64 * 100.0;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Action;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 50).unwrap()
    }

    fn signal(action: Action) -> Signal {
        Signal::new(action, 91, "test", t0()).unwrap()
    }

    #[test]
    fn empty_stats_are_zero() {
        let ledger = TradeLedger::default();
        let stats = ledger.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.wins, 0);
        assert_eq!(stats.losses, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.win_rate_display(), "0.0");
    }

    #[test]
    fn wait_is_rejected() {
        let mut ledger = TradeLedger::default();
        assert_eq!(
            ledger.open(&signal(Action::Wait), Timeframe::OneMinute, t0()),
            Err(LedgerError::NotActionable)
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn newest_first_and_ids_unique_within_same_millisecond() {
        let mut ledger = TradeLedger::default();
        let a = ledger.open(&signal(Action::Buy), Timeframe::OneMinute, t0()).unwrap();
        let b = ledger.open(&signal(Action::Sell), Timeframe::OneMinute, t0()).unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.id > a.id);
        let order: Vec<TradeId> = ledger.records().map(|r| r.id).collect();
        assert_eq!(order, vec![b.id, a.id]);
    }

    #[test]
    fn resolve_once_only_and_in_place() {
        let mut ledger = TradeLedger::default();
        let a = ledger.open(&signal(Action::Buy), Timeframe::OneMinute, t0()).unwrap();
        let b = ledger
            .open(&signal(Action::Sell), Timeframe::OneMinute, t0() + Duration::seconds(60))
            .unwrap();

        let resolved = ledger.resolve(a.id, TradeOutcome::Won, t0() + Duration::seconds(3)).unwrap();
        assert_eq!(resolved.status, TradeStatus::Won);
        assert_eq!(resolved.profit, 50.0);
        assert_eq!(ledger.get(b.id).unwrap().status, TradeStatus::Pending);

        assert_eq!(
            ledger.resolve(a.id, TradeOutcome::Lost, t0()),
            Err(LedgerError::AlreadyResolved(a.id))
        );
        assert_eq!(ledger.get(a.id).unwrap().profit, 50.0);
        assert_eq!(
            ledger.resolve(TradeId(1), TradeOutcome::Lost, t0()),
            Err(LedgerError::UnknownTrade(TradeId(1)))
        );
    }

    #[test]
    fn stats_two_wins_one_loss() {
        let mut ledger = TradeLedger::default();
        let mut ids = Vec::new();
        for i in 0..4 {
            let r = ledger
                .open(&signal(Action::Buy), Timeframe::OneMinute, t0() + Duration::seconds(i))
                .unwrap();
            ids.push(r.id);
        }
        ledger.resolve(ids[0], TradeOutcome::Won, t0()).unwrap();
        ledger.resolve(ids[1], TradeOutcome::Won, t0()).unwrap();
        ledger.resolve(ids[2], TradeOutcome::Lost, t0()).unwrap();
        // ids[3] stays pending and is excluded

        let stats = ledger.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert!((stats.win_rate - 66.666_666).abs() < 1e-3);
        assert_eq!(stats.win_rate_display(), "66.7");
        assert_eq!(stats.net_profit, 50.0);
    }
}

//! Wall clock and the 1 Hz ClockTimer.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

/// Source of absolute time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system's real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time derived from tokio's clock, anchored at a chosen instant.
///
/// Follows tokio's paused/auto-advanced time, so engine tests run in
/// simulated time without sleeping.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    anchor: Instant,
}

impl TokioClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            anchor: Instant::now(),
        }
    }
}

impl WallClock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}

/// One tick of the [`ClockTimer`].
#[derive(Debug, Clone, Copy)]
pub struct ClockTick {
    pub seq: u64,
    pub now: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Fixed-period ticking source. Ticks are strictly serialized; ticks missed
/// while the owner was busy are skipped rather than replayed in a burst.
pub struct ClockTimer {
    interval: Interval,
    clock: Arc<dyn WallClock>,
    started: Instant,
    seq: u64,
}

impl ClockTimer {
    pub fn new(period: Duration, clock: Arc<dyn WallClock>) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            clock,
            started: Instant::now(),
            seq: 0,
        }
    }

    pub async fn tick(&mut self) -> ClockTick {
        self.interval.tick().await;
        self.seq += 1;
        ClockTick {
            seq: self.seq,
            now: self.clock.now(),
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_follow_tokio_time() {
        let origin = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let clock: Arc<dyn WallClock> = Arc::new(TokioClock::starting_at(origin));
        let mut timer = ClockTimer::new(Duration::from_secs(1), clock);

        let first = timer.tick().await;
        assert_eq!(first.seq, 1);
        assert_eq!(first.now, origin);

        let third = {
            timer.tick().await;
            timer.tick().await
        };
        assert_eq!(third.seq, 3);
        assert_eq!(third.now, origin + chrono::Duration::seconds(2));
        assert_eq!(third.elapsed, Duration::from_secs(2));
    }
}

//! Candle-close arithmetic.
//!
//! All functions are pure over an absolute timestamp. Candle boundaries are
//! aligned to minute-of-hour multiples of the timeframe (`:00`, `:05`, `:15`...),
//! so the result is the same in any timezone whose offset is a whole number of
//! quarter hours.

use crate::timeframe::Timeframe;
use chrono::{DateTime, Duration, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset before candle close at which analysis is triggered.
pub const PRE_CLOSE_BUFFER_MS: i64 = 10_000;

/// Width of the firing window; equals the clock tick period.
pub const TRIGGER_WINDOW_MS: i64 = 1_000;

/// Milliseconds until the current candle of `timeframe` closes, in `[1, period]`.
pub fn time_to_close<Tz: TimeZone>(timeframe: Timeframe, now: &DateTime<Tz>) -> i64 {
    let minute = now.minute();
    let second = i64::from(now.second());
    // Leap seconds report nanosecond() >= 1e9.
    let millis = i64::from((now.nanosecond() / 1_000_000).min(999));

    let modulus = timeframe.minutes();
    let minutes_to_next = i64::from(modulus - minute % modulus);

    (minutes_to_next * 60 - second) * 1_000 - millis
}

/// Milliseconds until the next pre-close trigger point, using the default buffer.
pub fn delay_to_next_trigger<Tz: TimeZone>(timeframe: Timeframe, now: &DateTime<Tz>) -> i64 {
    delay_with_buffer(timeframe, now, PRE_CLOSE_BUFFER_MS)
}

/// Milliseconds until `buffer_ms` before the next candle close.
///
/// Always in `(0, period]`. When `now` is already inside the buffer (or exactly
/// on the trigger point) the next candle is targeted, so successive values
/// re-enter the trigger window once per period.
pub fn delay_with_buffer<Tz: TimeZone>(
    timeframe: Timeframe,
    now: &DateTime<Tz>,
    buffer_ms: i64,
) -> i64 {
    let mut delay = time_to_close(timeframe, now) - buffer_ms;
    if delay <= 0 {
        delay += timeframe.period_ms();
    }
    delay
}

/// Absolute close time of the current candle.
pub fn current_close<Tz: TimeZone>(timeframe: Timeframe, now: &DateTime<Tz>) -> DateTime<Tz> {
    now.clone() + Duration::milliseconds(time_to_close(timeframe, now))
}

/// Close time of the candle the next trigger is aimed at.
pub fn trigger_target<Tz: TimeZone>(
    timeframe: Timeframe,
    now: &DateTime<Tz>,
    buffer_ms: i64,
) -> DateTime<Tz> {
    let delay = delay_with_buffer(timeframe, now, buffer_ms);
    now.clone() + Duration::milliseconds(delay + buffer_ms)
}

/// Whether a tick observing `delay` falls inside the firing window.
pub fn in_trigger_window(delay_ms: i64, window_ms: i64) -> bool {
    delay_ms > 0 && delay_ms <= window_ms
}

/// The next `count` trigger instants strictly after `now`.
pub fn upcoming_triggers<Tz: TimeZone>(
    timeframe: Timeframe,
    now: &DateTime<Tz>,
    buffer_ms: i64,
    count: usize,
) -> Vec<DateTime<Tz>> {
    let first = now.clone() + Duration::milliseconds(delay_with_buffer(timeframe, now, buffer_ms));
    (0..count)
        .map(|i| first.clone() + Duration::milliseconds(timeframe.period_ms() * i as i64))
        .collect()
}

/// Countdown shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Countdown {
    /// Scheduler is switched off.
    Idle,
    /// Switched on but blocked: paused by the breaker or no capture attached.
    Syncing,
    /// Milliseconds until the next trigger.
    Remaining(i64),
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Countdown::Idle => f.write_str("idle"),
            Countdown::Syncing => f.write_str("syncing"),
            Countdown::Remaining(ms) => {
                let total_secs = (*ms).max(0) / 1_000;
                write!(f, "{:02}:{:02}", total_secs / 60, total_secs % 60)
            }
        }
    }
}

//! Self-contained collaborators for running a session without a screen or a
//! decision service: a synthetic frame source, a random decision source and
//! a random outcome oracle. All randomness is seedable.

use crate::clock::WallClock;
use crate::sources::{CaptureSource, OutcomeOracle, SignalSource};
use async_trait::async_trait;
use candleclock_core::frame::scaled_dimensions;
use candleclock_core::signal::{AuxiliaryFlags, CandleDirection, MacroTrend};
use candleclock_core::{
    Action, CaptureConfig, EncodedFrame, RiskLevel, Signal, SignalError, TradeOutcome, TradeRecord,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const DEMO_DECISION_LATENCY: Duration = Duration::from_millis(1_500);
pub const DEMO_WIN_PROBABILITY: f64 = 0.8;

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// ── Capture ──────────────────────────────────────────────────────────

/// Pretends to share a screen of fixed native size.
#[derive(Debug)]
pub struct SyntheticCapture {
    native: (u32, u32),
    settings: CaptureConfig,
    attached: AtomicBool,
    deny: bool,
    prompt: Duration,
    attach_calls: AtomicUsize,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32, settings: CaptureConfig) -> Self {
        Self {
            native: (width, height),
            settings,
            attached: AtomicBool::new(false),
            deny: false,
            prompt: Duration::ZERO,
            attach_calls: AtomicUsize::new(0),
        }
    }

    /// A source whose permission prompt is always refused.
    pub fn denied(settings: CaptureConfig) -> Self {
        Self {
            deny: true,
            ..Self::new(1920, 1080, settings)
        }
    }

    /// Hold every attach for `prompt`, like a user reading a share dialog.
    pub fn with_attach_latency(mut self, prompt: Duration) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// How many times `attach` has been entered.
    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureSource for SyntheticCapture {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn attach(&self) -> Result<(), SignalError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if !self.prompt.is_zero() {
            tokio::time::sleep(self.prompt).await;
        }
        if self.deny {
            return Err(SignalError::PermissionDenied(
                "screen share was declined".into(),
            ));
        }
        self.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    async fn grab_frame(&self) -> Option<EncodedFrame> {
        if !self.is_attached() {
            return None;
        }
        let (w, h) = scaled_dimensions(self.native.0, self.native.1, self.settings.max_width)?;
        // Stand-in payload roughly the size a lossy encoder would produce.
        let len = ((w as f32 * h as f32 * self.settings.quality) / 10.0) as usize;
        Some(EncodedFrame::jpeg(w, h, self.settings.quality, vec![0u8; len.max(1)]))
    }
}

// ── Decisions ────────────────────────────────────────────────────────

/// Draws BUY/SELL/WAIT at 40/30/30 with confidence in 80..=98 after a fixed
/// latency.
pub struct RandomSignalSource {
    rng: Mutex<StdRng>,
    latency: Duration,
    clock: Arc<dyn WallClock>,
}

impl RandomSignalSource {
    pub fn new(seed: Option<u64>, clock: Arc<dyn WallClock>) -> Self {
        Self {
            rng: Mutex::new(rng_from(seed)),
            latency: DEMO_DECISION_LATENCY,
            clock,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn draw(&self) -> Result<Signal, SignalError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let roll: f64 = rng.gen();
        let confidence: u8 = rng.gen_range(80..99);
        drop(rng);

        let action = if roll > 0.6 {
            Action::Buy
        } else if roll > 0.3 {
            Action::Sell
        } else {
            Action::Wait
        };
        let flags = AuxiliaryFlags {
            exhaustion_detected: roll < 0.2,
            rest_identified: roll > 0.8,
            favorable_wicks: true,
            flow_confirmed: roll > 0.5,
            macro_trend: MacroTrend::With,
            ..AuxiliaryFlags::default()
        };
        let next_candle = match action {
            Action::Buy => CandleDirection::Up,
            Action::Sell => CandleDirection::Down,
            Action::Wait => CandleDirection::Undetermined,
        };

        Ok(Signal::new(
            action,
            confidence,
            "Synthetic read captured 10s before close.\nChecked flow and exhaustion patterns.",
            self.clock.now(),
        )?
        .with_risk(RiskLevel::Low)
        .with_flags(flags)
        .with_next_candle(next_candle)
        .with_notes("demo decision source"))
    }
}

#[async_trait]
impl SignalSource for RandomSignalSource {
    fn name(&self) -> &str {
        "random"
    }

    async fn evaluate(&self, frame: &EncodedFrame, _instructions: &str) -> Result<Signal, SignalError> {
        if frame.is_empty() {
            return Err(SignalError::FrameUnavailable);
        }
        tokio::time::sleep(self.latency).await;
        self.draw()
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────

/// Wins with a fixed probability.
pub struct RandomOracle {
    rng: Mutex<StdRng>,
    win_probability: f64,
}

impl RandomOracle {
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_probability(seed, DEMO_WIN_PROBABILITY)
    }

    pub fn with_probability(seed: Option<u64>, win_probability: f64) -> Self {
        Self {
            rng: Mutex::new(rng_from(seed)),
            win_probability: win_probability.clamp(0.0, 1.0),
        }
    }
}

impl OutcomeOracle for RandomOracle {
    fn sample(&self, _record: &TradeRecord) -> TradeOutcome {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        TradeOutcome::from_win(rng.gen_bool(self.win_probability))
    }
}

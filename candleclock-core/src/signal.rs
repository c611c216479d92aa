//! Signals produced by the decision source, and their JSON wire format.

use crate::error::SignalError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed instruction payload submitted with every captured frame.
pub const ANALYSIS_INSTRUCTIONS: &str = r#"
PRICE-ACTION ANALYST FOR SHORT-EXPIRY BINARY OPTIONS
Read the chart in the attached frame and decide the direction of the NEXT candle.

MANDATORY CHECKLIST:
1. EXHAUSTION / REST: body >50% larger than average (exhaustion) or a small candle right after a breakout (rest)?
2. LAST 5 CANDLES: long upper wicks (favours SELL) or long lower wicks (favours BUY)?
3. SWING FAILURE PATTERN: false break of a recent high or low?
4. CANDLE FLOW: strong command candle with no wick against it?
5. RANGING: sequence of dojis? If yes the signal MUST be WAIT.
6. SUPPORT / RESISTANCE: engulfing, hammer or shooting star at a zone?

ANSWER WITH JSON ONLY:
{
  "signal": "BUY" | "SELL" | "WAIT",
  "confidence": "85-100",
  "reason": "technical description",
  "filters_status": {
    "exhaustion_detected": bool, "rest_identified": bool, "favorable_wicks": bool,
    "sfp_present": bool, "flow_confirmed": bool, "ranging": bool,
    "support_resistance": "SUPPORT" | "RESISTANCE" | "NEUTRAL",
    "macro_trend": "WITH" | "AGAINST" | "SIDEWAYS"
  },
  "next_candle_prediction": "UP" | "DOWN" | "UNDETERMINED",
  "risk_level": "LOW" | "MEDIUM" | "HIGH",
  "notes": "optional"
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Wait,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => f.write_str("BUY"),
            Action::Sell => f.write_str("SELL"),
            Action::Wait => f.write_str("WAIT"),
        }
    }
}

/// Direction of an acted-upon signal. WAIT has no side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => f.write_str("BUY"),
            TradeSide::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneContext {
    Support,
    Resistance,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MacroTrend {
    With,
    Against,
    #[default]
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandleDirection {
    Up,
    Down,
    #[default]
    Undetermined,
}

/// Checklist results reported alongside a decision. Opaque to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxiliaryFlags {
    pub exhaustion_detected: bool,
    pub rest_identified: bool,
    pub favorable_wicks: bool,
    pub sfp_present: bool,
    pub flow_confirmed: bool,
    pub ranging: bool,
    pub support_resistance: ZoneContext,
    pub macro_trend: MacroTrend,
}

/// An immutable decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: Action,
    /// 0..=100
    pub confidence: u8,
    pub rationale: String,
    pub risk_level: RiskLevel,
    pub produced_at: DateTime<Utc>,
    pub next_candle: CandleDirection,
    pub flags: AuxiliaryFlags,
    pub notes: String,
}

impl Signal {
    pub fn new(
        action: Action,
        confidence: u8,
        rationale: impl Into<String>,
        produced_at: DateTime<Utc>,
    ) -> Result<Self, SignalError> {
        if confidence > 100 {
            return Err(SignalError::MalformedDecision(format!(
                "confidence {confidence} outside 0..=100"
            )));
        }
        Ok(Self {
            action,
            confidence,
            rationale: rationale.into(),
            risk_level: RiskLevel::default(),
            produced_at,
            next_candle: CandleDirection::default(),
            flags: AuxiliaryFlags::default(),
            notes: String::new(),
        })
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_flags(mut self, flags: AuxiliaryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_next_candle(mut self, next_candle: CandleDirection) -> Self {
        self.next_candle = next_candle;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Anything other than WAIT.
    pub fn is_actionable(&self) -> bool {
        self.trade_side().is_some()
    }

    pub fn trade_side(&self) -> Option<TradeSide> {
        match self.action {
            Action::Buy => Some(TradeSide::Buy),
            Action::Sell => Some(TradeSide::Sell),
            Action::Wait => None,
        }
    }
}

// ── Wire format ──────────────────────────────────────────────────────

/// Confidence as sent by the decision source: a number or a range like `"85-100"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ConfidenceField {
    Number(f64),
    Text(String),
}

impl ConfidenceField {
    fn resolve(&self) -> Result<u8, SignalError> {
        let value = match self {
            ConfidenceField::Number(n) => *n,
            ConfidenceField::Text(text) => {
                // A range reports its lower bound.
                let head = text.split('-').next().unwrap_or_default();
                let head = head.trim().trim_end_matches('%').trim();
                head.parse::<f64>().map_err(|_| {
                    SignalError::MalformedDecision(format!("confidence '{text}' is not numeric"))
                })?
            }
        };
        if !(0.0..=100.0).contains(&value) {
            return Err(SignalError::MalformedDecision(format!(
                "confidence {value} outside 0..=100"
            )));
        }
        Ok(value.round() as u8)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DecisionPayload {
    signal: Action,
    confidence: ConfidenceField,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    filters_status: AuxiliaryFlags,
    #[serde(default)]
    next_candle_prediction: CandleDirection,
    #[serde(default)]
    risk_level: RiskLevel,
    #[serde(default)]
    notes: String,
}

/// Parse the decision source's JSON answer into a [`Signal`].
///
/// Text surrounding the JSON object (e.g. a fenced code block) is ignored.
pub fn parse_decision(text: &str, produced_at: DateTime<Utc>) -> Result<Signal, SignalError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => {
            return Err(SignalError::MalformedDecision(
                "no JSON object in decision".into(),
            ))
        }
    };

    let payload: DecisionPayload = serde_json::from_str(body)
        .map_err(|e| SignalError::MalformedDecision(e.to_string()))?;

    let confidence = payload.confidence.resolve()?;
    Ok(Signal::new(payload.signal, confidence, payload.reason, produced_at)?
        .with_risk(payload.risk_level)
        .with_flags(payload.filters_status)
        .with_next_candle(payload.next_candle_prediction)
        .with_notes(payload.notes))
}

//! The candle period the scheduler synchronizes to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Candle period selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "1M")]
    OneMinute,
    #[serde(rename = "5M")]
    FiveMinutes,
    #[serde(rename = "15M")]
    FifteenMinutes,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown timeframe '{0}' (expected 1M, 5M or 15M)")]
pub struct ParseTimeframeError(pub String);

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [
        Timeframe::OneMinute,
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
    ];

    /// Candle length in minutes. Also the modulus applied to minute-of-hour.
    pub fn minutes(self) -> u32 {
        match self {
            Timeframe::OneMinute => 1,
            Timeframe::FiveMinutes => 5,
            Timeframe::FifteenMinutes => 15,
        }
    }

    /// Candle length in milliseconds.
    pub fn period_ms(self) -> i64 {
        i64::from(self.minutes()) * 60_000
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1M",
            Timeframe::FiveMinutes => "5M",
            Timeframe::FifteenMinutes => "15M",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1M" | "1" | "M1" => Ok(Timeframe::OneMinute),
            "5M" | "5" | "M5" => Ok(Timeframe::FiveMinutes),
            "15M" | "15" | "M15" => Ok(Timeframe::FifteenMinutes),
            _ => Err(ParseTimeframeError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periods() {
        assert_eq!(Timeframe::OneMinute.period_ms(), 60_000);
        assert_eq!(Timeframe::FiveMinutes.period_ms(), 300_000);
        assert_eq!(Timeframe::FifteenMinutes.period_ms(), 900_000);
    }

    #[test]
    fn parse_accepts_labels_case_insensitively() {
        assert_eq!("1M".parse::<Timeframe>().unwrap(), Timeframe::OneMinute);
        assert_eq!("5m".parse::<Timeframe>().unwrap(), Timeframe::FiveMinutes);
        assert_eq!(" 15M ".parse::<Timeframe>().unwrap(), Timeframe::FifteenMinutes);
        assert!("30M".parse::<Timeframe>().is_err());
    }

    #[test]
    fn serde_uses_labels() {
        let json = serde_json::to_string(&Timeframe::FifteenMinutes).unwrap();
        assert_eq!(json, "\"15M\"");
        let tf: Timeframe = serde_json::from_str("\"5M\"").unwrap();
        assert_eq!(tf, Timeframe::FiveMinutes);
    }
}

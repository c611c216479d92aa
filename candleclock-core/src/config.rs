//! Engine configuration, loadable from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid config.

use crate::error::ConfigError;
use crate::frame::{FRAME_QUALITY, MAX_FRAME_WIDTH};
use crate::ledger::DEFAULT_STAKE;
use crate::risk::DEFAULT_LOSS_STREAK_LIMIT;
use crate::schedule::{PRE_CLOSE_BUFFER_MS, TRIGGER_WINDOW_MS};
use crate::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How long a trade stays PENDING before its outcome is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResolutionDelay {
    /// Wait one full candle of the trade's timeframe.
    #[default]
    CandlePeriod,
    /// Fixed delays: one for 1-minute trades, one for longer timeframes.
    Fixed { one_minute_ms: u64, longer_ms: u64 },
}

impl ResolutionDelay {
    /// Short delays suitable for demos.
    pub fn demo() -> Self {
        ResolutionDelay::Fixed {
            one_minute_ms: 3_000,
            longer_ms: 5_000,
        }
    }

    pub fn for_timeframe(&self, timeframe: Timeframe) -> Duration {
        match *self {
            ResolutionDelay::CandlePeriod => Duration::from_millis(timeframe.period_ms() as u64),
            ResolutionDelay::Fixed {
                one_minute_ms,
                longer_ms,
            } => match timeframe {
                Timeframe::OneMinute => Duration::from_millis(one_minute_ms),
                _ => Duration::from_millis(longer_ms),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub max_width: u32,
    /// Lossy encode quality in (0, 1].
    pub quality: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_width: MAX_FRAME_WIDTH,
            quality: FRAME_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeframe: Timeframe,
    pub pre_close_buffer_ms: i64,
    /// Clock tick period; also the width of the trigger window.
    pub tick_interval_ms: u64,
    pub loss_streak_limit: u32,
    /// Profit magnitude of a resolved trade.
    pub stake: f64,
    pub decision_timeout_ms: u64,
    pub resolution: ResolutionDelay,
    pub capture: CaptureConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::default(),
            pre_close_buffer_ms: PRE_CLOSE_BUFFER_MS,
            tick_interval_ms: TRIGGER_WINDOW_MS as u64,
            loss_streak_limit: DEFAULT_LOSS_STREAK_LIMIT,
            stake: DEFAULT_STAKE,
            decision_timeout_ms: 30_000,
            resolution: ResolutionDelay::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let period = Timeframe::OneMinute.period_ms();
        let tick_fits = i64::try_from(self.tick_interval_ms).is_ok_and(|t| t > 0 && t < period);
        if !tick_fits {
            return Err(ConfigError::Invalid(format!(
                "tick_interval_ms must be in (0, {period}), got {}",
                self.tick_interval_ms
            )));
        }
        if self.pre_close_buffer_ms < 0
            || self.pre_close_buffer_ms >= Timeframe::OneMinute.period_ms()
        {
            return Err(ConfigError::Invalid(format!(
                "pre_close_buffer_ms must be in [0, 60000), got {}",
                self.pre_close_buffer_ms
            )));
        }
        if self.loss_streak_limit == 0 {
            return Err(ConfigError::Invalid("loss_streak_limit must be >= 1".into()));
        }
        if !(self.stake > 0.0) {
            return Err(ConfigError::Invalid(format!("stake must be > 0, got {}", self.stake)));
        }
        if self.decision_timeout_ms == 0 {
            return Err(ConfigError::Invalid("decision_timeout_ms must be > 0".into()));
        }
        if self.capture.max_width == 0 {
            return Err(ConfigError::Invalid("capture.max_width must be > 0".into()));
        }
        if !(self.capture.quality > 0.0 && self.capture.quality <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "capture.quality must be in (0, 1], got {}",
                self.capture.quality
            )));
        }
        Ok(())
    }

    /// Width of the firing window in milliseconds. Always shorter than the
    /// shortest candle, even for a config that skipped validation.
    pub fn trigger_window_ms(&self) -> i64 {
        i64::try_from(self.tick_interval_ms)
            .unwrap_or(i64::MAX)
            .clamp(1, Timeframe::OneMinute.period_ms() - 1)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_is_default() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.pre_close_buffer_ms, 10_000);
        assert_eq!(config.loss_streak_limit, 3);
        assert_eq!(config.resolution, ResolutionDelay::CandlePeriod);
    }

    #[test]
    fn parses_fixed_resolution_and_timeframe() {
        let config = EngineConfig::from_toml(
            r#"
            timeframe = "5M"
            stake = 25.0

            [resolution]
            mode = "fixed"
            one_minute_ms = 3000
            longer_ms = 8000

            [capture]
            max_width = 960
            "#,
        )
        .unwrap();
        assert_eq!(config.timeframe, Timeframe::FiveMinutes);
        assert_eq!(config.stake, 25.0);
        assert_eq!(config.capture.max_width, 960);
        assert_eq!(config.capture.quality, FRAME_QUALITY);
        assert_eq!(
            config.resolution.for_timeframe(Timeframe::OneMinute),
            Duration::from_millis(3_000)
        );
        assert_eq!(
            config.resolution.for_timeframe(Timeframe::FifteenMinutes),
            Duration::from_millis(8_000)
        );
    }

    #[test]
    fn candle_period_resolution_matches_timeframe() {
        let delay = ResolutionDelay::CandlePeriod;
        assert_eq!(delay.for_timeframe(Timeframe::FiveMinutes), Duration::from_secs(300));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            EngineConfig::from_toml("loss_streak_limit = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("pre_close_buffer_ms = 60000"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("tick_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("tick_interval_ms = 60000"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("[capture]\nquality = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("timeframe = \"30M\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn oversized_tick_interval_is_rejected_and_window_stays_inside_a_candle() {
        let config = EngineConfig {
            tick_interval_ms: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.trigger_window_ms(), 59_999);

        let config = EngineConfig {
            tick_interval_ms: 59_999,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(EngineConfig::default().trigger_window_ms(), TRIGGER_WINDOW_MS);
    }

    #[test]
    fn loads_from_file_and_round_trips_through_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeframe = \"15M\"\ntick_interval_ms = 500").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.timeframe, Timeframe::FifteenMinutes);
        assert_eq!(config.tick_interval(), Duration::from_millis(500));

        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/candleclock.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

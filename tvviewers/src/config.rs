//! Configuration of the viewer engine (`viewers:` section).
//!
//! Every field has a serde default equal to the reference tuning so a partial
//! `config.yaml` only needs to name what it changes. The configuration is
//! read once at startup and never mutated afterwards; [`ViewersConfig::validate`]
//! rejects tunings the generator cannot honour.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;
use tvconfig::Config;

/// Invalid `viewers` configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("viewers.channels must not be empty")]
    NoChannels,

    #[error("baseline_min ({min}) is greater than baseline_max ({max})")]
    InvalidBaseline { min: u32, max: u32 },

    #[error("smooth_alpha must be in (0, 1], got {0}")]
    InvalidAlpha(f64),

    #[error("per_tick_cap_min ({min}) is greater than per_tick_cap_max ({max})")]
    InvalidCapRange { min: u32, max: u32 },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("invalid hour band [{start}, {end}) x {multiplier}")]
    InvalidHourBand { start: u32, end: u32, multiplier: f64 },

    #[error("invalid multiplier {multiplier} for keyword {keyword:?}")]
    InvalidMultiplier { keyword: String, multiplier: f64 },

    #[error("cannot parse viewers section: {0}")]
    Parse(String),
}

/// Hour-of-day multiplier applied when `start <= hour < end`.
///
/// Written in YAML as a `[start, end, multiplier]` triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(u32, u32, f64)", into = "(u32, u32, f64)")]
pub struct HourBand {
    pub start: u32,
    pub end: u32,
    pub multiplier: f64,
}

impl HourBand {
    pub const fn new(start: u32, end: u32, multiplier: f64) -> Self {
        Self {
            start,
            end,
            multiplier,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour < self.end
    }
}

impl From<(u32, u32, f64)> for HourBand {
    fn from((start, end, multiplier): (u32, u32, f64)) -> Self {
        Self::new(start, end, multiplier)
    }
}

impl From<HourBand> for (u32, u32, f64) {
    fn from(band: HourBand) -> Self {
        (band.start, band.end, band.multiplier)
    }
}

/// Typed view of the `viewers:` configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewersConfig {
    /// Display names, in snapshot order
    #[serde(default = "ViewersConfig::default_channels")]
    pub channels: Vec<String>,
    #[serde(default = "ViewersConfig::default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "ViewersConfig::default_baseline_min")]
    pub baseline_min: u32,
    #[serde(default = "ViewersConfig::default_baseline_max")]
    pub baseline_max: u32,
    #[serde(default = "ViewersConfig::default_smooth_alpha")]
    pub smooth_alpha: f64,
    /// 0 disables the `: ping` comment
    #[serde(default)]
    pub sse_keepalive_secs: u64,
    #[serde(default = "ViewersConfig::default_per_tick_cap_min")]
    pub per_tick_cap_min: u32,
    #[serde(default = "ViewersConfig::default_per_tick_cap_max")]
    pub per_tick_cap_max: u32,
    #[serde(default = "ViewersConfig::default_stream_queue_capacity")]
    pub stream_queue_capacity: usize,
    #[serde(default = "ViewersConfig::default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    /// First matching band wins
    #[serde(default = "ViewersConfig::default_hour_bands")]
    pub hour_bands: Vec<HourBand>,
    #[serde(default = "ViewersConfig::default_boosters")]
    pub boosters: BTreeMap<String, f64>,
    #[serde(default = "ViewersConfig::default_dampers")]
    pub dampers: BTreeMap<String, f64>,
}

impl ViewersConfig {
    fn default_channels() -> Vec<String> {
        vec![
            "Discovery Channel".to_string(),
            "BBC Earth".to_string(),
            "National Geographic".to_string(),
        ]
    }

    const fn default_tick_interval_secs() -> u64 {
        15
    }

    const fn default_baseline_min() -> u32 {
        2000
    }

    const fn default_baseline_max() -> u32 {
        5000
    }

    const fn default_smooth_alpha() -> f64 {
        0.35
    }

    const fn default_per_tick_cap_min() -> u32 {
        25
    }

    const fn default_per_tick_cap_max() -> u32 {
        50
    }

    const fn default_stream_queue_capacity() -> usize {
        10
    }

    const fn default_webhook_timeout_secs() -> u64 {
        5
    }

    fn default_hour_bands() -> Vec<HourBand> {
        vec![
            HourBand::new(20, 22, 1.85),
            HourBand::new(18, 20, 1.55),
            HourBand::new(22, 24, 1.30),
            HourBand::new(8, 18, 1.15),
            HourBand::new(6, 8, 1.00),
            HourBand::new(0, 2, 0.75),
            HourBand::new(2, 4, 0.55),
            HourBand::new(4, 6, 0.70),
        ]
    }

    fn default_boosters() -> BTreeMap<String, f64> {
        [
            ("avengers", 1.35),
            ("planet earth", 1.30),
            ("frozen planet", 1.28),
            ("shark week", 1.30),
            ("apollo", 1.25),
            ("cosmos", 1.25),
            ("premiere", 1.20),
            ("finale", 1.22),
            ("live", 1.18),
            ("special", 1.15),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn default_dampers() -> BTreeMap<String, f64> {
        [
            ("rerun", 0.88),
            ("repeat", 0.90),
            ("marathon", 0.92),
            ("behind the scenes", 0.92),
            ("recap", 0.90),
            ("infomercial", 0.80),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Reads and validates the `viewers` section of the configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let viewers: Self = match config.get_value(&["viewers"]) {
            Ok(value) => {
                serde_yaml::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            Err(_) => Self::default(),
        };
        viewers.validate()?;
        Ok(viewers)
    }

    /// Checks the invariants the generator relies on.
    ///
    /// An hour table that leaves some hours uncovered is accepted (those
    /// hours use a 1.0 multiplier) but logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.baseline_min > self.baseline_max {
            return Err(ConfigError::InvalidBaseline {
                min: self.baseline_min,
                max: self.baseline_max,
            });
        }
        if !(self.smooth_alpha > 0.0 && self.smooth_alpha <= 1.0) {
            return Err(ConfigError::InvalidAlpha(self.smooth_alpha));
        }
        if self.per_tick_cap_min > self.per_tick_cap_max {
            return Err(ConfigError::InvalidCapRange {
                min: self.per_tick_cap_min,
                max: self.per_tick_cap_max,
            });
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::ZeroValue("tick_interval_secs"));
        }
        if self.stream_queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("stream_queue_capacity"));
        }
        if self.webhook_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("webhook_timeout_secs"));
        }

        for band in &self.hour_bands {
            if band.start >= band.end || band.end > 24 || !valid_multiplier(band.multiplier) {
                return Err(ConfigError::InvalidHourBand {
                    start: band.start,
                    end: band.end,
                    multiplier: band.multiplier,
                });
            }
        }

        for (keyword, multiplier) in self.boosters.iter().chain(self.dampers.iter()) {
            if !valid_multiplier(*multiplier) {
                return Err(ConfigError::InvalidMultiplier {
                    keyword: keyword.clone(),
                    multiplier: *multiplier,
                });
            }
        }

        let uncovered = self.uncovered_hours();
        if !uncovered.is_empty() {
            warn!(hours = ?uncovered, "hour bands do not cover every hour, using 1.0 there");
        }

        Ok(())
    }

    /// Hours of the day matched by no band.
    pub fn uncovered_hours(&self) -> Vec<u32> {
        (0..24)
            .filter(|h| !self.hour_bands.iter().any(|band| band.contains(*h)))
            .collect()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// `None` when keepalive is disabled
    pub fn keepalive(&self) -> Option<Duration> {
        (self.sse_keepalive_secs > 0).then(|| Duration::from_secs(self.sse_keepalive_secs))
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

fn valid_multiplier(m: f64) -> bool {
    m.is_finite() && m > 0.0
}

impl Default for ViewersConfig {
    fn default() -> Self {
        Self {
            channels: Self::default_channels(),
            tick_interval_secs: Self::default_tick_interval_secs(),
            baseline_min: Self::default_baseline_min(),
            baseline_max: Self::default_baseline_max(),
            smooth_alpha: Self::default_smooth_alpha(),
            sse_keepalive_secs: 0,
            per_tick_cap_min: Self::default_per_tick_cap_min(),
            per_tick_cap_max: Self::default_per_tick_cap_max(),
            stream_queue_capacity: Self::default_stream_queue_capacity(),
            webhook_timeout_secs: Self::default_webhook_timeout_secs(),
            hour_bands: Self::default_hour_bands(),
            boosters: Self::default_boosters(),
            dampers: Self::default_dampers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(yaml: &str) -> Config {
        Config::from_yaml(".", Some(yaml)).unwrap()
    }

    #[test]
    fn test_embedded_defaults_match_reference() {
        let config = Config::from_yaml(".", None).unwrap();
        let viewers = ViewersConfig::from_config(&config).unwrap();
        let reference = ViewersConfig::default();

        assert_eq!(viewers.channels, reference.channels);
        assert_eq!(viewers.tick_interval(), Duration::from_secs(15));
        assert_eq!(viewers.baseline_min, 2000);
        assert_eq!(viewers.baseline_max, 5000);
        assert_eq!(viewers.smooth_alpha, 0.35);
        assert_eq!(viewers.keepalive(), None);
        assert_eq!(viewers.hour_bands, reference.hour_bands);
        assert_eq!(viewers.boosters, reference.boosters);
        assert_eq!(viewers.dampers, reference.dampers);
        assert!(viewers.uncovered_hours().is_empty());
    }

    #[test]
    fn test_partial_override() {
        let config = config_with("viewers:\n  sse_keepalive_secs: 20\n  baseline_max: 6000\n");
        let viewers = ViewersConfig::from_config(&config).unwrap();
        assert_eq!(viewers.keepalive(), Some(Duration::from_secs(20)));
        assert_eq!(viewers.baseline_max, 6000);
        assert_eq!(viewers.baseline_min, 2000);
    }

    #[test]
    fn test_rejects_inverted_baseline() {
        let config = config_with("viewers:\n  baseline_min: 6000\n");
        assert_eq!(
            ViewersConfig::from_config(&config).unwrap_err(),
            ConfigError::InvalidBaseline {
                min: 6000,
                max: 5000
            }
        );
    }

    #[test]
    fn test_rejects_bad_alpha_and_caps() {
        let mut viewers = ViewersConfig {
            smooth_alpha: 0.0,
            ..Default::default()
        };
        assert_eq!(viewers.validate(), Err(ConfigError::InvalidAlpha(0.0)));

        viewers.smooth_alpha = 1.0;
        viewers.per_tick_cap_min = 60;
        assert!(matches!(
            viewers.validate(),
            Err(ConfigError::InvalidCapRange { .. })
        ));

        viewers.per_tick_cap_min = 25;
        viewers.tick_interval_secs = 0;
        assert_eq!(
            viewers.validate(),
            Err(ConfigError::ZeroValue("tick_interval_secs"))
        );
    }

    #[test]
    fn test_rejects_empty_channels() {
        let viewers = ViewersConfig {
            channels: Vec::new(),
            ..Default::default()
        };
        assert_eq!(viewers.validate(), Err(ConfigError::NoChannels));
    }

    #[test]
    fn test_partial_hour_table_is_accepted() {
        let config = config_with("viewers:\n  hour_bands:\n    - [20, 22, 1.85]\n");
        let viewers = ViewersConfig::from_config(&config).unwrap();
        assert_eq!(viewers.hour_bands.len(), 1);
        assert_eq!(viewers.uncovered_hours().len(), 22);
    }

    #[test]
    fn test_rejects_inverted_hour_band() {
        let viewers = ViewersConfig {
            hour_bands: vec![HourBand::new(22, 20, 1.2)],
            ..Default::default()
        };
        assert!(matches!(
            viewers.validate(),
            Err(ConfigError::InvalidHourBand { .. })
        ));
    }
}

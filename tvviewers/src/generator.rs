//! Synthetic viewer-count generator.
//!
//! Each tick produces one value per configured channel:
//!
//! 1. hour-of-day multiplier (first matching band, 1.0 otherwise)
//! 2. popularity multiplier from the title currently airing
//! 3. random baseline in `[baseline_min, baseline_max]`, modulated, clamped
//! 4. ±3 % jitter, clamped again → target
//! 5. exponential smoothing against the previous value
//! 6. per-tick rate limit scaled by the elapsed time
//! 7. hard clamp into the baseline range
//!
//! The generator never performs I/O and never fails: a non-finite result is
//! logged and the channel keeps its previous value.

use crate::config::{HourBand, ViewersConfig};
use crate::snapshot::ChannelViewers;
use chrono::{DateTime, Local, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Smoothed value of one channel, carried from tick to tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelViewerState {
    pub channel: String,
    pub smoothed_value: f64,
    pub last_update: DateTime<Local>,
}

/// First band containing `hour`, 1.0 when none does.
pub fn hour_factor(bands: &[HourBand], hour: u32) -> f64 {
    bands
        .iter()
        .find(|band| band.contains(hour))
        .map(|band| band.multiplier)
        .unwrap_or(1.0)
}

/// Popularity multiplier of a program title.
///
/// Keywords match as case-insensitive substrings. The strongest matching
/// booster and the strongest matching damper are multiplied together, so a
/// "special" rerun still beats a plain rerun.
pub fn popularity_factor(config: &ViewersConfig, title: Option<&str>) -> f64 {
    let Some(title) = title.filter(|t| !t.trim().is_empty()) else {
        return 1.0;
    };
    let title = title.to_lowercase();

    let booster = config
        .boosters
        .iter()
        .filter(|(keyword, _)| title.contains(keyword.to_lowercase().as_str()))
        .map(|(_, m)| *m)
        .fold(1.0_f64, f64::max);

    let damper = config
        .dampers
        .iter()
        .filter(|(keyword, _)| title.contains(keyword.to_lowercase().as_str()))
        .map(|(_, m)| *m)
        .fold(1.0_f64, f64::min);

    booster * damper
}

/// Exponential moving average; the target itself when there is no history.
pub fn smooth(prior: Option<f64>, target: f64, alpha: f64) -> f64 {
    match prior {
        Some(prior) => alpha * target + (1.0 - alpha) * prior,
        None => target,
    }
}

/// Limits `value - prior` to `±cap · dt / tick_interval`, with `dt` at least
/// one second.
pub fn clamp_rate(prior: f64, elapsed_secs: f64, value: f64, cap: f64, tick_secs: f64) -> f64 {
    let dt = elapsed_secs.max(1.0);
    let scaled_cap = cap * (dt / tick_secs);
    let delta = value - prior;

    if delta > scaled_cap {
        prior + scaled_cap
    } else if delta < -scaled_cap {
        prior - scaled_cap
    } else {
        value
    }
}

/// Owns the per-channel state and the random source.
///
/// Only the viewer tick loop calls [`ViewerGenerator::generate`]; the
/// context keeps the generator behind a mutex.
pub struct ViewerGenerator {
    config: Arc<ViewersConfig>,
    states: HashMap<String, ChannelViewerState>,
    rng: StdRng,
}

impl ViewerGenerator {
    pub fn new(config: Arc<ViewersConfig>) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic generator, for tests and replays
    pub fn with_seed(config: Arc<ViewersConfig>, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: Arc<ViewersConfig>, rng: StdRng) -> Self {
        Self {
            config,
            states: HashMap::new(),
            rng,
        }
    }

    pub fn config(&self) -> &ViewersConfig {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<ViewersConfig> {
        self.config.clone()
    }

    pub fn state(&self, channel: &str) -> Option<&ChannelViewerState> {
        self.states.get(channel)
    }

    /// Overrides the state of a channel (replays, tests).
    pub fn set_state(&mut self, channel: &str, value: f64, at: DateTime<Local>) {
        self.states.insert(
            channel.to_string(),
            ChannelViewerState {
                channel: channel.to_string(),
                smoothed_value: value,
                last_update: at,
            },
        );
    }

    /// Gives every channel a random in-range starting value so the first
    /// requests are not empty.
    pub fn seed(&mut self, now: DateTime<Local>) -> Vec<ChannelViewers> {
        let (min, max) = (self.config.baseline_min, self.config.baseline_max);
        let channels = self.config.channels.clone();

        channels
            .into_iter()
            .map(|channel| {
                let base = self.rng.random_range(min..=max);
                self.set_state(&channel, f64::from(base), now);
                ChannelViewers::new(channel, base)
            })
            .collect()
    }

    /// Computes the next value of every channel, in configuration order.
    ///
    /// `titles` maps a channel display name to the title currently airing.
    pub fn generate(
        &mut self,
        now: DateTime<Local>,
        titles: &HashMap<String, String>,
    ) -> Vec<ChannelViewers> {
        let config = self.config.clone();
        let hour = hour_factor(&config.hour_bands, now.hour());

        config
            .channels
            .iter()
            .map(|channel| {
                let popularity =
                    popularity_factor(&config, titles.get(channel).map(String::as_str));
                let value = self.next_value(channel, now, hour, popularity);
                ChannelViewers::new(channel.clone(), value.round() as u32)
            })
            .collect()
    }

    fn next_value(&mut self, channel: &str, now: DateTime<Local>, hour: f64, popularity: f64) -> f64 {
        let min = f64::from(self.config.baseline_min);
        let max = f64::from(self.config.baseline_max);

        let baseline = f64::from(
            self.rng
                .random_range(self.config.baseline_min..=self.config.baseline_max),
        );
        let raw = (baseline * hour * popularity).clamp(min, max);
        let jitter: f64 = self.rng.random_range(0.97..=1.03);
        let target = (raw * jitter).clamp(min, max);

        let prior = self.states.get(channel).cloned();
        let ema = smooth(prior.as_ref().map(|s| s.smoothed_value), target, self.config.smooth_alpha);

        let limited = match &prior {
            Some(state) => {
                let cap = f64::from(
                    self.rng
                        .random_range(self.config.per_tick_cap_min..=self.config.per_tick_cap_max),
                );
                let elapsed = (now - state.last_update).num_milliseconds() as f64 / 1000.0;
                clamp_rate(
                    state.smoothed_value,
                    elapsed,
                    ema,
                    cap,
                    self.config.tick_interval_secs as f64,
                )
            }
            None => ema,
        };
        let value = limited.clamp(min, max);

        if !value.is_finite() {
            // clamp() laisse passer NaN
            let fallback = prior.map(|s| s.smoothed_value).unwrap_or((min + max) / 2.0);
            error!(channel, hour, popularity, "non-finite viewer value, keeping previous one");
            return fallback;
        }

        debug!(channel, target, value, "viewer value updated");
        self.set_state(channel, value, now);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config() -> Arc<ViewersConfig> {
        Arc::new(ViewersConfig::default())
    }

    fn evening() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 20, 30, 0).unwrap()
    }

    #[test]
    fn test_hour_factor() {
        let bands = ViewersConfig::default().hour_bands;
        assert_eq!(hour_factor(&bands, 21), 1.85);
        assert_eq!(hour_factor(&bands, 3), 0.55);
        assert_eq!(hour_factor(&bands, 23), 1.30);
        assert_eq!(hour_factor(&[], 12), 1.0);
        assert_eq!(hour_factor(&[HourBand::new(20, 22, 2.0)], 22), 1.0);
    }

    #[test]
    fn test_popularity_factor() {
        let cfg = ViewersConfig::default();
        assert!(popularity_factor(&cfg, Some("THE AVENGERS SPECIAL")) >= 1.35);
        assert!(popularity_factor(&cfg, Some("Gold Rush rerun")) <= 0.88);
        assert!(
            popularity_factor(&cfg, Some("Planet Earth rerun"))
                > popularity_factor(&cfg, Some("rerun"))
        );
        assert_eq!(popularity_factor(&cfg, Some("Gold Rush")), 1.0);
        assert_eq!(popularity_factor(&cfg, None), 1.0);
        assert_eq!(popularity_factor(&cfg, Some("")), 1.0);
    }

    #[test]
    fn test_smoothing_and_rate_limit_scenario() {
        let ema = smooth(Some(3000.0), 4800.0, 0.35);
        assert!((ema - 3630.0).abs() < 1e-9);
        assert_eq!(clamp_rate(3000.0, 15.0, ema, 30.0, 15.0), 3030.0);
        assert_eq!(clamp_rate(3000.0, 15.0, 2000.0, 30.0, 15.0), 2970.0);
        // dt < 1 s compte pour 1 s
        assert_eq!(clamp_rate(3000.0, 0.0, 3630.0, 30.0, 15.0), 3002.0);
        assert_eq!(smooth(None, 4800.0, 0.35), 4800.0);
    }

    #[test]
    fn test_values_stay_in_bounds_and_rate_limited() {
        let cfg = config();
        let mut generator = ViewerGenerator::with_seed(cfg.clone(), 42);
        let mut now = evening();
        let mut previous = generator.seed(now);
        let titles = HashMap::from([
            ("BBC Earth".to_string(), "Planet Earth Live Special".to_string()),
            ("Discovery Channel".to_string(), "Infomercial rerun".to_string()),
        ]);

        for _ in 0..500 {
            now += Duration::seconds(15);
            let current = generator.generate(now, &titles);
            assert_eq!(current.len(), cfg.channels.len());

            for (prev, cur) in previous.iter().zip(&current) {
                assert_eq!(prev.channel, cur.channel);
                assert!(cur.viewers >= cfg.baseline_min && cur.viewers <= cfg.baseline_max);
                let delta = (i64::from(cur.viewers) - i64::from(prev.viewers)).abs();
                // 50 viewers par tick, +1 pour l'arrondi
                assert!(delta <= 51, "delta {delta} too large");
            }
            previous = current;
        }
    }

    #[test]
    fn test_rate_limit_scales_with_elapsed_time() {
        let cfg = config();
        let mut generator = ViewerGenerator::with_seed(cfg, 7);
        let start = evening();
        generator.set_state("BBC Earth", 2000.0, start);

        let later = start + Duration::seconds(150);
        let out = generator.generate(later, &HashMap::new());
        let bbc = out.iter().find(|c| c.channel == "BBC Earth").unwrap();
        assert!(bbc.viewers <= 2000 + 500);
    }

    #[test]
    fn test_first_value_without_history_is_in_bounds() {
        let cfg = config();
        let mut generator = ViewerGenerator::with_seed(cfg.clone(), 1);
        let out = generator.generate(evening(), &HashMap::new());
        assert_eq!(out.len(), 3);
        for entry in out {
            assert!(entry.viewers >= cfg.baseline_min && entry.viewers <= cfg.baseline_max);
        }
        assert!(generator.state("National Geographic").is_some());
    }

    #[test]
    fn test_same_seed_same_series() {
        let now = evening();
        let mut a = ViewerGenerator::with_seed(config(), 99);
        let mut b = ViewerGenerator::with_seed(config(), 99);
        assert_eq!(a.seed(now), b.seed(now));
        let next = now + Duration::seconds(15);
        assert_eq!(
            a.generate(next, &HashMap::new()),
            b.generate(next, &HashMap::new())
        );
    }

    #[test]
    fn test_non_finite_value_keeps_previous() {
        let config = ViewersConfig {
            hour_bands: vec![HourBand::new(0, 24, f64::NAN)],
            ..ViewersConfig::default()
        };
        let mut generator = ViewerGenerator::with_seed(Arc::new(config), 5);
        let seeded_at = evening();
        let seeded = generator.seed(seeded_at);

        let next = seeded_at + Duration::seconds(15);
        let values = generator.generate(next, &HashMap::new());
        assert_eq!(values, seeded);

        for entry in &seeded {
            let state = generator.state(&entry.channel).unwrap();
            assert_eq!(state.smoothed_value, f64::from(entry.viewers));
            assert_eq!(state.last_update, seeded_at);
        }
    }
}

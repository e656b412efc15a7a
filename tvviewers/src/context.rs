//! Shared state of the viewer engine.
//!
//! One [`ViewersContext`] is built at startup and shared (`Arc`) by the tick
//! loops and the HTTP handlers.

use crate::config::ViewersConfig;
use crate::error::Result;
use crate::generator::ViewerGenerator;
use crate::registry::{BroadcastReport, StreamSubscription, SubscriberRegistry};
use crate::snapshot::{LatestSnapshot, ViewersSnapshot};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};
use tvconfig::Config;
use tvguide::{GuideConfig, NowPlaying, ProgramSource, SqliteProgramSource};

/// Last "now playing" projection, swapped whole on change.
#[derive(Debug, Default)]
pub struct NowPlayingCell {
    inner: RwLock<Arc<Vec<NowPlaying>>>,
}

impl NowPlayingCell {
    pub fn get(&self) -> Arc<Vec<NowPlaying>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the projection when `programs` differs by value.
    ///
    /// Returns `true` when a replacement happened.
    pub fn replace_if_changed(&self, programs: Vec<NowPlaying>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if **guard == programs {
            return false;
        }
        *guard = Arc::new(programs);
        true
    }

    /// Channel display name → title currently airing
    pub fn titles(&self) -> HashMap<String, String> {
        self.get()
            .iter()
            .map(|p| (p.channel.clone(), p.title.clone()))
            .collect()
    }
}

pub struct ViewersContext {
    config: Arc<ViewersConfig>,
    generator: Mutex<ViewerGenerator>,
    latest: LatestSnapshot,
    registry: Arc<SubscriberRegistry>,
    now_playing: NowPlayingCell,
    programs: Arc<dyn ProgramSource>,
    refresh_interval: Duration,
}

impl ViewersContext {
    /// Builds the context and seeds every channel with a random value,
    /// published as snapshot 0.
    pub fn new(
        config: ViewersConfig,
        programs: Arc<dyn ProgramSource>,
        refresh_interval: Duration,
    ) -> Result<Self> {
        Self::with_generator(
            ViewerGenerator::new(Arc::new(config)),
            programs,
            refresh_interval,
        )
    }

    /// Context wired from the `viewers` and `guide` configuration sections,
    /// reading programs from the configured SQLite database.
    pub fn from_config(config: &Config) -> Result<Self> {
        let viewers = ViewersConfig::from_config(config)?;
        let guide = GuideConfig::from_config(config)?;
        info!(database = %guide.database_path.display(), "program guide database");

        let programs: Arc<dyn ProgramSource> =
            Arc::new(SqliteProgramSource::new(&guide.database_path));
        Self::new(viewers, programs, guide.refresh_interval())
    }

    /// Same as [`ViewersContext::new`] with a caller-provided generator
    /// (seeded RNG in tests).
    ///
    /// The generator's configuration is validated before seeding.
    pub fn with_generator(
        mut generator: ViewerGenerator,
        programs: Arc<dyn ProgramSource>,
        refresh_interval: Duration,
    ) -> Result<Self> {
        generator.config().validate()?;
        let config = generator.shared_config();
        let now = Local::now();
        let seeded = generator.seed(now);
        let initial = ViewersSnapshot::new(0, now, seeded)?;

        let registry = Arc::new(SubscriberRegistry::new(
            config.stream_queue_capacity,
            config.webhook_timeout(),
        ));

        info!(
            channels = config.channels.len(),
            tick_secs = config.tick_interval_secs,
            "viewer engine initialised"
        );

        Ok(Self {
            config,
            generator: Mutex::new(generator),
            latest: LatestSnapshot::new(initial),
            registry,
            now_playing: NowPlayingCell::default(),
            programs,
            refresh_interval,
        })
    }

    pub fn config(&self) -> &ViewersConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn programs(&self) -> &Arc<dyn ProgramSource> {
        &self.programs
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn latest(&self) -> Arc<ViewersSnapshot> {
        self.latest.get()
    }

    pub fn now_playing(&self) -> Arc<Vec<NowPlaying>> {
        self.now_playing.get()
    }

    /// Registers a stream and returns it with the snapshot it must send
    /// first.
    ///
    /// Registration happens before reading the latest snapshot, so a tick
    /// racing the connection is either already in the latest snapshot or
    /// queued with a higher sequence number.
    pub fn subscribe_stream(&self) -> (StreamSubscription, Arc<ViewersSnapshot>) {
        let subscription = self.registry.register_stream();
        let initial = self.latest.get();
        (subscription, initial)
    }

    /// One viewer tick: generate, publish as latest, fan out.
    pub fn tick(&self, now: DateTime<Local>) -> Result<BroadcastReport> {
        let titles = self.now_playing.titles();
        let entries = self
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate(now, &titles);

        let snapshot = self.latest.publish(now, entries)?;
        Ok(self.registry.broadcast(&snapshot.message()))
    }

    /// Queries the program source and replaces the projection when it
    /// changed. On error the previous projection stays in place.
    ///
    /// Returns the projection in force afterwards.
    pub async fn refresh_programs(&self, now: DateTime<Local>) -> Result<Arc<Vec<NowPlaying>>> {
        match self.programs.current_or_next(now.naive_local()).await {
            Ok(programs) => {
                let count = programs.len();
                if self.now_playing.replace_if_changed(programs) {
                    info!(count, "now-playing projection updated");
                }
                Ok(self.now_playing.get())
            }
            Err(e) => {
                warn!(error = %e, "program refresh failed, keeping previous projection");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::error::Error;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use tvguide::{MemoryProgramSource, ScheduleEntry};

    fn program(channel: &str, title: &str) -> NowPlaying {
        NowPlaying {
            channel: channel.into(),
            title: title.into(),
            start: "20:00:00".into(),
            date: "2025-03-14".into(),
            csfd_id: String::new(),
        }
    }

    #[test]
    fn test_now_playing_replaced_only_on_change() {
        let cell = NowPlayingCell::default();
        assert!(cell.replace_if_changed(vec![program("BBC Earth", "Planet Earth")]));
        let before = cell.get();
        assert!(!cell.replace_if_changed(vec![program("BBC Earth", "Planet Earth")]));
        assert!(Arc::ptr_eq(&before, &cell.get()));
        assert_eq!(cell.titles()["BBC Earth"], "Planet Earth");
    }

    #[tokio::test]
    async fn test_refresh_keeps_projection_on_error() {
        let source = Arc::new(MemoryProgramSource::new());
        source
            .set_entries(vec![ScheduleEntry {
                channel: "BBC Earth".into(),
                title: "Planet Earth".into(),
                air_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
                start: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(21, 0, 0),
            }])
            .await;

        let ctx = ViewersContext::with_generator(
            ViewerGenerator::with_seed(Arc::new(ViewersConfig::default()), 3),
            source.clone(),
            Duration::from_secs(30),
        )
        .unwrap();

        let now = Local.with_ymd_and_hms(2025, 3, 14, 20, 30, 0).unwrap();
        let programs = ctx.refresh_programs(now).await.unwrap();
        assert_eq!(*programs, vec![program("BBC Earth", "Planet Earth")]);

        source.set_unavailable(Some("offline".into())).await;
        let before = ctx.now_playing();
        assert!(ctx.refresh_programs(now).await.is_err());
        assert!(Arc::ptr_eq(&before, &ctx.now_playing()));
        assert_eq!(ctx.now_playing()[0].title, "Planet Earth");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ViewersConfig {
            baseline_min: 5000,
            baseline_max: 2000,
            ..ViewersConfig::default()
        };
        let result = ViewersContext::new(
            config,
            Arc::new(MemoryProgramSource::new()),
            Duration::from_secs(30),
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::InvalidBaseline { min: 5000, max: 2000 }))
        ));
    }

    #[tokio::test]
    async fn test_tick_publishes_and_broadcasts() {
        let ctx = ViewersContext::with_generator(
            ViewerGenerator::with_seed(Arc::new(ViewersConfig::default()), 11),
            Arc::new(MemoryProgramSource::new()),
            Duration::from_secs(30),
        )
        .unwrap();

        let (mut sub, initial) = ctx.subscribe_stream();
        assert_eq!(initial.seq(), 0);
        assert_eq!(initial.entries().len(), 3);

        let report = ctx.tick(Local::now()).unwrap();
        assert_eq!(report.queued, 1);
        assert_eq!(ctx.latest().seq(), 1);
        assert_eq!(sub.recv().await.unwrap().seq, 1);
    }
}

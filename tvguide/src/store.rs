//! Program guide storage.
//!
//! Two halves share the same SQLite file:
//!
//! - [`ProgramStore`] owns a writable connection; it creates the schema and
//!   upserts parsed records (used by the flat-file loader).
//! - [`ProgramSource`] is the read side consumed by the server. The SQLite
//!   implementation opens the database read-only for each query inside
//!   `spawn_blocking`, so a loader run in another process never blocks it.
//!
//! [`MemoryProgramSource`] implements the same trait without any file and is
//! used by tests.

use crate::error::{Error, Result};
use crate::models::{GuideStats, NowPlaying, ProgramRecord};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS program_info (
  id            INTEGER PRIMARY KEY AUTOINCREMENT,
  title         TEXT,
  original_name TEXT,
  prod_year     INTEGER,
  description   TEXT,
  score_pct     INTEGER,
  duration_min  INTEGER,
  channel       TEXT,
  link          TEXT,
  genre         TEXT,
  source_file   TEXT,
  UNIQUE(title, channel)
);

CREATE TABLE IF NOT EXISTS program_schedule (
  id            INTEGER PRIMARY KEY AUTOINCREMENT,
  program_id    INTEGER,
  day_name      TEXT,
  air_date      TEXT,
  start_time    TEXT,
  end_time      TEXT,
  viewer_count  INTEGER,
  timestamp     TEXT DEFAULT CURRENT_TIMESTAMP,
  FOREIGN KEY(program_id) REFERENCES program_info(id)
);

CREATE INDEX IF NOT EXISTS idx_schedule_day ON program_schedule(air_date, start_time);
";

const UPSERT_INFO: &str = "
INSERT INTO program_info
  (title, original_name, prod_year, description, score_pct,
   duration_min, channel, link, genre, source_file)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(title, channel) DO UPDATE SET
  original_name = excluded.original_name,
  prod_year     = excluded.prod_year,
  description   = excluded.description,
  score_pct     = excluded.score_pct,
  duration_min  = excluded.duration_min,
  link          = excluded.link,
  genre         = excluded.genre,
  source_file   = excluded.source_file";

const INSERT_SCHEDULE: &str = "
INSERT INTO program_schedule
  (program_id, day_name, air_date, start_time, end_time, viewer_count)
VALUES (?1, ?2, ?3, ?4, ?5, NULL)";

const CURRENT_QUERY: &str = "
SELECT pi.title, ps.start_time
FROM program_info pi
JOIN program_schedule ps ON pi.id = ps.program_id
WHERE ps.air_date = ?1
  AND pi.channel = ?2
  AND ps.start_time <= ?3
  AND ps.end_time > ?3
ORDER BY ps.start_time
LIMIT 1";

const NEXT_QUERY: &str = "
SELECT pi.title, ps.start_time
FROM program_info pi
JOIN program_schedule ps ON pi.id = ps.program_id
WHERE ps.air_date = ?1
  AND pi.channel = ?2
  AND ps.start_time > ?3
ORDER BY ps.start_time
LIMIT 1";

/// Read access to the program guide.
#[async_trait]
pub trait ProgramSource: Send + Sync {
    /// For each channel, the program airing at `now` (`start ≤ now < end`)
    /// or, failing that, the first program starting later the same day.
    /// Channels with neither are omitted.
    async fn current_or_next(&self, now: NaiveDateTime) -> Result<Vec<NowPlaying>>;

    /// Table counters for `/status`.
    async fn stats(&self) -> Result<GuideStats>;
}

/// [`ProgramSource`] backed by the SQLite file written by the loader.
#[derive(Debug, Clone)]
pub struct SqliteProgramSource {
    path: PathBuf,
}

impl SqliteProgramSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_read_only(path: &Path) -> Result<Connection> {
        if !path.exists() {
            return Err(Error::DatabaseMissing(path.display().to_string()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }
}

#[async_trait]
impl ProgramSource for SqliteProgramSource {
    async fn current_or_next(&self, now: NaiveDateTime) -> Result<Vec<NowPlaying>> {
        let path = self.path.clone();
        spawn_blocking(move || -> Result<Vec<NowPlaying>> {
            let conn = Self::open_read_only(&path)?;
            let today = now.format("%Y-%m-%d").to_string();
            let clock = now.format("%H:%M:%S").to_string();

            let mut stmt = conn.prepare(
                "SELECT DISTINCT channel FROM program_info WHERE channel IS NOT NULL ORDER BY channel",
            )?;
            let channels = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut current = conn.prepare(CURRENT_QUERY)?;
            let mut next = conn.prepare(NEXT_QUERY)?;
            let mut programs = Vec::with_capacity(channels.len());

            for channel in channels {
                let found = match current
                    .query_row(params![today, channel, clock], |row| {
                        Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?))
                    })
                    .optional()?
                {
                    Some(hit) => Some(hit),
                    None => next
                        .query_row(params![today, channel, clock], |row| {
                            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?))
                        })
                        .optional()?,
                };

                if let Some((title, start)) = found {
                    programs.push(NowPlaying {
                        channel,
                        title: title.unwrap_or_default(),
                        start,
                        date: today.clone(),
                        csfd_id: String::new(),
                    });
                }
            }

            debug!(count = programs.len(), "current-or-next query done");
            Ok(programs)
        })
        .await?
    }

    async fn stats(&self) -> Result<GuideStats> {
        let path = self.path.clone();
        spawn_blocking(move || -> Result<GuideStats> {
            let conn = Self::open_read_only(&path)?;
            let programs: i64 =
                conn.query_row("SELECT COUNT(*) FROM program_info", [], |row| row.get(0))?;
            let schedules: i64 =
                conn.query_row("SELECT COUNT(*) FROM program_schedule", [], |row| row.get(0))?;
            let last_update: Option<String> = conn.query_row(
                "SELECT MAX(timestamp) FROM program_schedule",
                [],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT DISTINCT channel FROM program_info WHERE channel IS NOT NULL ORDER BY channel",
            )?;
            let channels = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(GuideStats {
                programs: programs.max(0) as u64,
                schedules: schedules.max(0) as u64,
                channels,
                last_update,
            })
        })
        .await?
    }
}

/// Writable handle on the guide database.
pub struct ProgramStore {
    conn: Connection,
}

impl ProgramStore {
    /// Opens (or creates) the database and makes sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn })
    }

    /// Upserts the static program info of each record, then appends one
    /// schedule row per record. Runs in a single transaction.
    ///
    /// Records without a title or a channel are skipped.
    ///
    /// Returns `(programs_upserted, schedules_inserted)`.
    pub fn insert_records(&mut self, records: &[ProgramRecord]) -> Result<(usize, usize)> {
        let tx = self.conn.transaction()?;
        let mut upserted = 0;
        let mut scheduled = 0;

        {
            let mut upsert = tx.prepare(UPSERT_INFO)?;
            let mut lookup =
                tx.prepare("SELECT id FROM program_info WHERE title = ?1 AND channel = ?2")?;
            let mut schedule = tx.prepare(INSERT_SCHEDULE)?;

            for record in records {
                // NULL ne respecte pas UNIQUE(title, channel)
                if record.title.is_none() || record.channel.is_none() {
                    warn!(source = %record.source_file, "record without title or channel, skipping");
                    continue;
                }

                upsert.execute(params![
                    record.title,
                    record.original_name,
                    record.prod_year,
                    record.description,
                    record.score_pct,
                    record.duration_min,
                    record.channel,
                    record.link,
                    record.genre,
                    record.source_file,
                ])?;
                upserted += 1;

                let program_id: Option<i64> = lookup
                    .query_row(params![record.title, record.channel], |row| row.get(0))
                    .optional()?;
                let Some(program_id) = program_id else {
                    warn!(title = ?record.title, "missing program id after upsert");
                    continue;
                };

                schedule.execute(params![
                    program_id,
                    record.day_name,
                    record.air_date,
                    record.start_time,
                    record.end_time,
                ])?;
                scheduled += 1;
            }
        }

        tx.commit()?;
        Ok((upserted, scheduled))
    }
}

/// One scheduled airing held by [`MemoryProgramSource`].
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub channel: String,
    pub title: String,
    pub air_date: NaiveDate,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

/// In-memory [`ProgramSource`] for tests.
#[derive(Default)]
pub struct MemoryProgramSource {
    entries: Mutex<Vec<ScheduleEntry>>,
    unavailable: Mutex<Option<String>>,
}

impl MemoryProgramSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_entries(&self, entries: Vec<ScheduleEntry>) {
        *self.entries.lock().await = entries;
    }

    /// Makes every call fail with [`Error::Unavailable`] (`None` restores it).
    pub async fn set_unavailable(&self, reason: Option<String>) {
        *self.unavailable.lock().await = reason;
    }

    async fn check_available(&self) -> Result<()> {
        match self.unavailable.lock().await.as_ref() {
            Some(reason) => Err(Error::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProgramSource for MemoryProgramSource {
    async fn current_or_next(&self, now: NaiveDateTime) -> Result<Vec<NowPlaying>> {
        self.check_available().await?;

        let entries = self.entries.lock().await;
        let today = now.date();
        let clock = now.time();

        let mut channels: Vec<&str> = entries.iter().map(|e| e.channel.as_str()).collect();
        channels.sort_unstable();
        channels.dedup();

        let mut programs = Vec::new();
        for channel in channels {
            let mut todays: Vec<&ScheduleEntry> = entries
                .iter()
                .filter(|e| e.channel == channel && e.air_date == today)
                .collect();
            todays.sort_by_key(|e| e.start);

            let current = todays
                .iter()
                .find(|e| e.start <= clock && e.end.is_some_and(|end| end > clock));
            let found = current.or_else(|| todays.iter().find(|e| e.start > clock));

            if let Some(entry) = found {
                programs.push(NowPlaying {
                    channel: entry.channel.clone(),
                    title: entry.title.clone(),
                    start: entry.start.format("%H:%M:%S").to_string(),
                    date: today.format("%Y-%m-%d").to_string(),
                    csfd_id: String::new(),
                });
            }
        }
        Ok(programs)
    }

    async fn stats(&self) -> Result<GuideStats> {
        self.check_available().await?;

        let entries = self.entries.lock().await;
        let mut channels: Vec<String> = entries.iter().map(|e| e.channel.clone()).collect();
        channels.sort();
        channels.dedup();

        let mut titles: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.title.as_str(), e.channel.as_str()))
            .collect();
        titles.sort_unstable();
        titles.dedup();

        Ok(GuideStats {
            programs: titles.len() as u64,
            schedules: entries.len() as u64,
            channels,
            last_update: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn entry(channel: &str, title: &str, start: &str, end: Option<&str>) -> ScheduleEntry {
        ScheduleEntry {
            channel: channel.to_string(),
            title: title.to_string(),
            air_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            start: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end: end.map(|e| NaiveTime::parse_from_str(e, "%H:%M").unwrap()),
        }
    }

    #[tokio::test]
    async fn test_memory_current_then_next() {
        let source = MemoryProgramSource::new();
        source
            .set_entries(vec![
                entry("BBC Earth", "Planet Earth", "20:00", Some("21:00")),
                entry("BBC Earth", "Blue Planet", "21:00", Some("22:00")),
                entry("Discovery Channel", "Gold Rush", "22:00", Some("23:00")),
                entry("National Geographic", "Air Crash", "10:00", Some("11:00")),
            ])
            .await;

        let now = source
            .current_or_next(at("2025-03-14", "20:30:00"))
            .await
            .unwrap();

        assert_eq!(now.len(), 2);
        assert_eq!(now[0].channel, "BBC Earth");
        assert_eq!(now[0].title, "Planet Earth");
        assert_eq!(now[0].start, "20:00:00");
        assert_eq!(now[0].date, "2025-03-14");
        assert_eq!(now[1].title, "Gold Rush");
    }

    #[tokio::test]
    async fn test_memory_end_is_exclusive() {
        let source = MemoryProgramSource::new();
        source
            .set_entries(vec![
                entry("BBC Earth", "Planet Earth", "20:00", Some("21:00")),
                entry("BBC Earth", "Blue Planet", "21:00", Some("22:00")),
            ])
            .await;

        let now = source
            .current_or_next(at("2025-03-14", "21:00:00"))
            .await
            .unwrap();
        assert_eq!(now[0].title, "Blue Planet");
    }

    #[tokio::test]
    async fn test_memory_unavailable() {
        let source = MemoryProgramSource::new();
        source.set_unavailable(Some("offline".into())).await;
        let err = source
            .current_or_next(at("2025-03-14", "12:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    fn record(title: Option<&str>, start: &str) -> ProgramRecord {
        ProgramRecord {
            title: title.map(str::to_string),
            air_date: Some("2025-03-14".into()),
            start_time: Some(start.into()),
            end_time: None,
            channel: Some("BBC Earth".into()),
            source_file: "tv_programs_BBC.txt".into(),
            ..ProgramRecord::default()
        }
    }

    #[tokio::test]
    async fn test_untitled_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tvguide.db");
        let records = vec![
            record(None, "19:00:00"),
            record(Some("Planet Earth"), "20:00:00"),
            record(None, "21:00:00"),
        ];

        let mut store = ProgramStore::open(&db).unwrap();
        assert_eq!(store.insert_records(&records).unwrap(), (1, 1));
        assert_eq!(store.insert_records(&records).unwrap(), (1, 1));
        drop(store);

        let stats = SqliteProgramSource::new(&db).stats().await.unwrap();
        assert_eq!(stats.programs, 1);
        assert_eq!(stats.schedules, 2);
    }

    #[tokio::test]
    async fn test_sqlite_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteProgramSource::new(dir.path().join("absent.db"));
        let err = source
            .current_or_next(at("2025-03-14", "12:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DatabaseMissing(_)));
        assert!(matches!(source.stats().await, Err(Error::DatabaseMissing(_))));
    }
}

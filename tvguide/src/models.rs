//! Data structures of the program guide.

use serde::{Deserialize, Serialize};
#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Program currently airing (or next to air) on a channel.
///
/// This is the "now playing" projection served by `/now-playing` and used
/// by the viewer generator to look up the current title of each channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct NowPlaying {
    #[cfg_attr(feature = "openapi", schema(example = "BBC Earth"))]
    pub channel: String,
    #[cfg_attr(feature = "openapi", schema(example = "Planet Earth"))]
    pub title: String,
    /// Start time, `HH:MM:SS`
    #[cfg_attr(feature = "openapi", schema(example = "20:00:00"))]
    pub start: String,
    /// Air date, `YYYY-MM-DD`
    #[cfg_attr(feature = "openapi", schema(example = "2025-03-14"))]
    pub date: String,
    pub csfd_id: String,
}

/// One parsed record of a scraped program file.
///
/// Every field is optional: scrapers emit whatever the listing page had.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramRecord {
    pub title: Option<String>,
    pub day_name: Option<String>,
    /// ISO date `YYYY-MM-DD`
    pub air_date: Option<String>,
    /// `HH:MM:SS`
    pub start_time: Option<String>,
    /// `HH:MM:SS`
    pub end_time: Option<String>,
    pub duration_min: Option<i64>,
    pub channel: Option<String>,
    pub link: Option<String>,
    pub original_name: Option<String>,
    pub prod_year: Option<i64>,
    pub description: Option<String>,
    pub score_pct: Option<i64>,
    pub genre: Option<String>,
    pub source_file: String,
}

/// Counters exposed by `/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct GuideStats {
    pub programs: u64,
    pub schedules: u64,
    pub channels: Vec<String>,
    /// Most recent `program_schedule.timestamp`
    pub last_update: Option<String>,
}

/// Outcome of a loader run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub programs_upserted: usize,
    pub schedules_inserted: usize,
}

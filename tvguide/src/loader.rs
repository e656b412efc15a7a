//! Flat-file loader for scraped program listings.
//!
//! Scrapers write one text file per channel. Each record is a block of
//! `Key: Value` lines; blocks are separated by a line of at least three
//! dashes:
//!
//! ```text
//! Title: Planet Earth
//! Day: Friday
//! Date: 14.03.2025
//! Start Time: 20:00
//! End Time: 21:00
//! Duration: 60 min
//! Channel: BBC Earth
//! ---
//! ```

use crate::config::GuideConfig;
use crate::error::Result;
use crate::models::{LoadReport, ProgramRecord};
use crate::store::ProgramStore;
use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

static RECORD_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-{3,}\s*$").unwrap());
static KV_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([^:]+?)\s*:\s*(.*?)\s*$").unwrap());
static FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Parses the content of one listing file.
///
/// `source_file` is recorded on every record (file name only).
pub fn parse_str(content: &str, source_file: &str) -> Vec<ProgramRecord> {
    let mut records = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    for line in content.lines() {
        if RECORD_SEP.is_match(line) {
            if !block.is_empty() {
                records.push(parse_block(&block, source_file));
                block.clear();
            }
        } else if !line.trim().is_empty() {
            block.push(line);
        }
    }
    if !block.is_empty() {
        records.push(parse_block(&block, source_file));
    }

    records
}

/// Reads and parses one listing file.
pub fn parse_file(path: &Path) -> Result<Vec<ProgramRecord>> {
    let content = std::fs::read_to_string(path)?;
    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(parse_str(&content, &source_file))
}

/// Loads every listing file into the store. Missing files are skipped.
///
/// Records without a `Channel:` line are attributed to the channel named
/// after the file (`tv_programs_BBC.txt` → "BBC Earth").
pub fn load_files(
    store: &mut ProgramStore,
    files: &[PathBuf],
    guide: &GuideConfig,
) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for path in files {
        if !path.exists() {
            warn!(file = %path.display(), "listing file not found, skipping");
            report.files_skipped += 1;
            continue;
        }

        let mut records = parse_file(path)?;
        if records.is_empty() {
            report.files_skipped += 1;
            continue;
        }

        let fallback_channel = guide.channel_name_from_file(path);
        for record in records.iter_mut().filter(|r| r.channel.is_none()) {
            record.channel = Some(fallback_channel.clone());
        }

        let (programs, schedules) = store.insert_records(&records)?;
        info!(
            file = %path.display(),
            programs,
            schedules,
            "listing file loaded"
        );
        report.files_loaded += 1;
        report.programs_upserted += programs;
        report.schedules_inserted += schedules;
    }

    Ok(report)
}

fn parse_block(lines: &[&str], source_file: &str) -> ProgramRecord {
    let fields: HashMap<&str, &str> = lines
        .iter()
        .filter_map(|line| {
            let caps = KV_LINE.captures(line)?;
            Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
        })
        .collect();

    let text = |key: &str| {
        fields
            .get(key)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };

    ProgramRecord {
        title: text("Title"),
        day_name: text("Day"),
        air_date: fields.get("Date").and_then(|v| to_iso_date(v)),
        start_time: fields.get("Start Time").and_then(|v| to_iso_time(v)),
        end_time: fields.get("End Time").and_then(|v| to_iso_time(v)),
        duration_min: fields.get("Duration").and_then(|v| first_int(v)),
        channel: text("Channel"),
        link: text("Link"),
        original_name: text("Original Name"),
        prod_year: fields.get("Year").and_then(|v| first_int(v)),
        description: text("Description"),
        score_pct: fields.get("Score").and_then(|v| first_int(v)),
        genre: text("Genre"),
        source_file: source_file.to_string(),
    }
}

/// `14.03.2025` → `2025-03-14`
fn to_iso_date(value: &str) -> Option<String> {
    NaiveDate::parse_from_str(value.trim(), "%d.%m.%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// `20:05` → `20:05:00`
fn to_iso_time(value: &str) -> Option<String> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .ok()
        .map(|t| t.format("%H:%M:%S").to_string())
}

fn first_int(value: &str) -> Option<i64> {
    FIRST_INT
        .find(value)
        .and_then(|m| m.as_str().parse().ok())
}

//! Integration tests for tvguide: loader → SQLite → current-or-next

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::PathBuf;
use tvguide::{load_files, GuideConfig, ProgramSource, ProgramStore, SqliteProgramSource};

const BBC: &str = "\
Title: Planet Earth
Day: Friday
Date: 14.03.2025
Start Time: 20:00
End Time: 21:00
Channel: BBC Earth
---
Title: Blue Planet
Day: Friday
Date: 14.03.2025
Start Time: 21:00
End Time: 22:00
Channel: BBC Earth
---
";

const DISC: &str = "\
Title: Gold Rush
Day: Friday
Date: 14.03.2025
Start Time: 23:00
End Time: 23:59
Duration: 59 min
Channel: Discovery Channel
---
Title: Gold Rush (rerun)
Day: Thursday
Date: 13.03.2025
Start Time: 20:00
End Time: 21:00
Channel: Discovery Channel
---
";

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn write_listing(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_load_and_query_current_or_next() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data").join("tvguide.db");
    let files = vec![
        write_listing(dir.path(), "tv_programs_BBC.txt", BBC),
        write_listing(dir.path(), "tv_programs_Disc.txt", DISC),
        dir.path().join("tv_programs_NatGeo.txt"),
    ];

    let mut store = ProgramStore::open(&db).unwrap();
    let report = load_files(&mut store, &files, &GuideConfig::default()).unwrap();
    assert_eq!(report.files_loaded, 2);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.schedules_inserted, 4);
    drop(store);

    let source = SqliteProgramSource::new(&db);
    let programs = source
        .current_or_next(at("2025-03-14 20:30:00"))
        .await
        .unwrap();

    assert_eq!(programs.len(), 2);
    assert_eq!(programs[0].channel, "BBC Earth");
    assert_eq!(programs[0].title, "Planet Earth");
    assert_eq!(programs[0].start, "20:00:00");
    assert_eq!(programs[0].date, "2025-03-14");
    assert_eq!(programs[0].csfd_id, "");
    // Rien en cours sur Discovery : le prochain programme du jour
    assert_eq!(programs[1].channel, "Discovery Channel");
    assert_eq!(programs[1].title, "Gold Rush");

    let late = source
        .current_or_next(at("2025-03-14 23:59:30"))
        .await
        .unwrap();
    assert!(late.is_empty());
}

#[tokio::test]
async fn test_reload_upserts_program_info() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tvguide.db");
    let files = vec![write_listing(dir.path(), "tv_programs_BBC.txt", BBC)];

    let mut store = ProgramStore::open(&db).unwrap();
    load_files(&mut store, &files, &GuideConfig::default()).unwrap();
    load_files(&mut store, &files, &GuideConfig::default()).unwrap();
    drop(store);

    let stats = SqliteProgramSource::new(&db).stats().await.unwrap();
    assert_eq!(stats.programs, 2);
    assert_eq!(stats.schedules, 4);
    assert_eq!(stats.channels, vec!["BBC Earth".to_string()]);
    assert!(stats.last_update.is_some());
}

#[tokio::test]
async fn test_channel_from_file_name_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tvguide.db");
    let listing = "Title: Wild Yellowstone\nDate: 14.03.2025\nStart Time: 19:00\nEnd Time: 20:00\n";
    let files = vec![write_listing(dir.path(), "tv_programs_NatGeo.txt", listing)];

    let guide = GuideConfig {
        channel_names: HashMap::from([(
            "natgeo".to_string(),
            "National Geographic".to_string(),
        )]),
        ..GuideConfig::default()
    };

    let mut store = ProgramStore::open(&db).unwrap();
    load_files(&mut store, &files, &guide).unwrap();
    drop(store);

    let programs = SqliteProgramSource::new(&db)
        .current_or_next(at("2025-03-14 19:15:00"))
        .await
        .unwrap();
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].channel, "National Geographic");
    assert_eq!(programs[0].title, "Wild Yellowstone");
}

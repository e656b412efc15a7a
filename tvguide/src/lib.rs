//! # tvguide - Guide des programmes TV
//!
//! Stockage SQLite des grilles de programmes scrapées et requête
//! « en cours ou prochain » par chaîne.
//!
//! ```rust,no_run
//! use tvguide::{ProgramSource, SqliteProgramSource};
//!
//! # async fn demo() -> tvguide::Result<()> {
//! let source = SqliteProgramSource::new("tvguide.db");
//! let now = chrono::Local::now().naive_local();
//! for program in source.current_or_next(now).await? {
//!     println!("{}: {} ({})", program.channel, program.title, program.start);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod store;

pub use config::GuideConfig;
pub use error::{Error, Result};
pub use loader::{load_files, parse_file, parse_str};
pub use models::{GuideStats, LoadReport, NowPlaying, ProgramRecord};
pub use store::{
    MemoryProgramSource, ProgramSource, ProgramStore, ScheduleEntry, SqliteProgramSource,
};

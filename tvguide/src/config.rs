//! Configuration of the program guide (`guide:` section).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tvconfig::Config;

/// Typed view of the `guide:` configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideConfig {
    #[serde(default = "GuideConfig::default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "GuideConfig::default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// File stem (`Disc`, `BBC`, …) to channel display name
    #[serde(default)]
    pub channel_names: HashMap<String, String>,
}

impl GuideConfig {
    fn default_database_path() -> PathBuf {
        PathBuf::from("tvguide.db")
    }

    const fn default_refresh_interval_secs() -> u64 {
        30
    }

    /// Reads the `guide` section; the database path is resolved against the
    /// configuration directory.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut guide: Self = match config.get_value(&["guide"]) {
            Ok(value) => serde_yaml::from_value(value)?,
            Err(_) => Self::default(),
        };
        guide.database_path = config.get_database_path()?;
        Ok(guide)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    /// Display name of the channel a scraped file belongs to.
    ///
    /// `tv_programs_Disc.txt` → `Disc` → "Discovery Channel". Unknown stems
    /// are returned unchanged.
    pub fn channel_name_from_file(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let short = stem.strip_prefix("tv_programs_").unwrap_or(&stem);

        // Les clés de configuration sont normalisées en minuscules
        self.channel_names
            .get(&short.to_lowercase())
            .cloned()
            .unwrap_or_else(|| short.to_string())
    }
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
            refresh_interval_secs: Self::default_refresh_interval_secs(),
            channel_names: HashMap::new(),
        }
    }
}

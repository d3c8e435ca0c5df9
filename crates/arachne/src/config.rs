use std::path::{Path, PathBuf};

use anyhow::Context;
use arachne_crawler::SettingsMap;
use serde::{Deserialize, Serialize};

/// Configuration of the host application the crawls are launched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    /// Settings shared by every spider
    #[serde(default)]
    pub scrapy_settings: SettingsMap,

    #[serde(default)]
    pub export_json: bool,

    #[serde(default)]
    pub export_csv: bool,

    /// Log to the console instead of the rotating log files
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub spider_settings: Vec<SpiderEntry>,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scrapy_settings: SettingsMap::new(),
            export_json: false,
            export_csv: false,
            debug: false,
            spider_settings: vec![],
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl AppConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = fs_err::File::open(path)?;
        serde_yaml::from_reader(file)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    pub fn spider(&self, endpoint: &str) -> Option<&SpiderEntry> {
        self.spider_settings.iter().find(|s| s.endpoint == endpoint)
    }
}

/// A spider exposed by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiderEntry {
    pub endpoint: String,
    /// Identifier the spider is registered under
    pub location: String,
    #[serde(default)]
    pub scrapy_settings: SettingsMap,
}

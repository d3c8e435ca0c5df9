use std::cmp;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// Crawl tuning read from the settings, unknown settings are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,

    /// Seconds to wait before starting each download
    #[serde(default)]
    pub download_delay: f64,

    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    #[serde(default = "default_page_buffer")]
    pub page_buffer: usize,

    #[serde(default = "default_true")]
    pub dupefilter: bool,

    #[serde(default = "default_true")]
    pub handle_sigint: bool,

    #[serde(default = "default_on_error")]
    pub on_download_error: OnError,

    #[serde(default = "default_on_error")]
    pub on_parse_error: OnError,

    #[serde(default = "default_on_error")]
    pub on_item_error: OnError,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            concurrent_requests: default_concurrent_requests(),
            download_delay: 0.,
            num_workers: default_num_workers(),
            page_buffer: default_page_buffer(),
            dupefilter: default_true(),
            handle_sigint: default_true(),
            on_download_error: default_on_error(),
            on_parse_error: default_on_error(),
            on_item_error: default_on_error(),
        }
    }
}

impl CrawlerConfig {
    pub fn download_delay(&self) -> Option<Duration> {
        if self.download_delay > 0. {
            Some(Duration::from_secs_f64(self.download_delay))
        } else {
            None
        }
    }

    fn validate(self) -> anyhow::Result<Self> {
        if self.concurrent_requests == 0 {
            anyhow::bail!("CONCURRENT_REQUESTS must be greater than 0");
        }
        if self.num_workers == 0 {
            anyhow::bail!("NUM_WORKERS must be greater than 0");
        }
        if self.page_buffer == 0 {
            anyhow::bail!("PAGE_BUFFER must be greater than 0");
        }
        if !self.download_delay.is_finite() || self.download_delay < 0. {
            anyhow::bail!("DOWNLOAD_DELAY must be a positive number of seconds");
        }
        Ok(self)
    }
}

impl TryFrom<&Settings> for CrawlerConfig {
    type Error = anyhow::Error;

    fn try_from(settings: &Settings) -> Result<Self, Self::Error> {
        settings.deserialize::<CrawlerConfig>()?.validate()
    }
}

fn default_user_agent() -> String {
    String::from("arachne")
}

fn default_concurrent_requests() -> usize {
    16
}

fn default_num_workers() -> usize {
    cmp::max(1, num_cpus::get().saturating_sub(2))
}

fn default_page_buffer() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_on_error() -> OnError {
    OnError::SkipAndLog
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnError {
    Fail,
    SkipAndLog,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn from_json(value: serde_json::Value) -> anyhow::Result<CrawlerConfig> {
        let map = value.as_object().cloned().unwrap_or_default();
        CrawlerConfig::try_from(&Settings::new(map))
    }

    #[test]
    fn defaults_when_unset() {
        let conf = from_json(json!({ "ITEM_PIPELINES": {"a.B": 1} })).unwrap();
        assert_eq!("arachne", conf.user_agent);
        assert_eq!(16, conf.concurrent_requests);
        assert!(conf.num_workers >= 1);
        assert!(conf.dupefilter);
        assert!(conf.handle_sigint);
        assert_eq!(OnError::SkipAndLog, conf.on_download_error);
        assert_eq!(None, conf.download_delay());
    }

    #[test]
    fn read_from_settings() {
        let conf = from_json(json!({
            "USER_AGENT": "custom",
            "CONCURRENT_REQUESTS": 2,
            "DOWNLOAD_DELAY": 1,
            "NUM_WORKERS": 3,
            "ON_PARSE_ERROR": "Fail",
        }))
        .unwrap();
        assert_eq!("custom", conf.user_agent);
        assert_eq!(2, conf.concurrent_requests);
        assert_eq!(Some(Duration::from_secs(1)), conf.download_delay());
        assert_eq!(3, conf.num_workers);
        assert_eq!(OnError::Fail, conf.on_parse_error);
    }

    #[test]
    fn reject_invalid() {
        assert!(from_json(json!({ "CONCURRENT_REQUESTS": 0 })).is_err());
        assert!(from_json(json!({ "NUM_WORKERS": 0 })).is_err());
        assert!(from_json(json!({ "DOWNLOAD_DELAY": -1.5 })).is_err());
        assert!(from_json(json!({ "ON_DOWNLOAD_ERROR": "Retry" })).is_err());
    }
}

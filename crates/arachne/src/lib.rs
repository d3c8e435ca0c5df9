mod config;
mod launcher;
mod logfile;
mod logger;
pub mod pipelines;
mod registry;
mod settings;
pub mod spiders;
pub mod writer;

pub use config::{AppConfig, SpiderEntry};
pub use launcher::Launcher;
pub use logfile::LogFile;
pub use logger::{start_logger, LogConfig, LoggerGuard};
pub use registry::SpiderRegistry;
pub use settings::{
    get_spider_settings, EXPORT_CSV_PIPELINE, EXPORT_CSV_PRIORITY, EXPORT_JSON_PIPELINE,
    EXPORT_JSON_PRIORITY,
};

pub use anyhow;
pub use arachne_crawler;

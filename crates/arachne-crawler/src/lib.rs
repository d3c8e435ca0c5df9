mod config;
mod crawler;
mod pipeline;
mod settings;
mod spider;

pub use config::{CrawlerConfig, OnError};
pub use crawler::{CrawlStats, Crawler};
pub use pipeline::{ItemPipeline, ItemPipelines, PipelineFactory, PipelineRegistry};
pub use settings::{Settings, SettingsMap, ITEM_PIPELINES};
pub use spider::{Item, ParseContext, Response, Spider, SpiderFactory};

pub use anyhow;
pub use reqwest::Url;
pub use serde_json;

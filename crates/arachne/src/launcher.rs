use anyhow::Result;
use arachne_crawler::{CrawlStats, Crawler, PipelineRegistry, Settings, SettingsMap, Spider};

use crate::config::AppConfig;
use crate::logger::{start_logger, LogConfig};
use crate::pipelines;
use crate::registry::SpiderRegistry;
use crate::settings::get_spider_settings;
use crate::spiders;

/// Starts crawl jobs for the spiders and pipelines it knows about.
#[derive(Debug, Clone)]
pub struct Launcher {
    spiders: SpiderRegistry,
    pipelines: PipelineRegistry,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher {
    /// A launcher knowing the built-in spiders and pipelines.
    pub fn new() -> Self {
        Self::with_registries(spiders::registry(), pipelines::registry())
    }

    pub fn with_registries(spiders: SpiderRegistry, pipelines: PipelineRegistry) -> Self {
        Self { spiders, pipelines }
    }

    pub fn with_spider<S, F>(mut self, location: impl Into<String>, constructor: F) -> Self
    where
        S: Spider + 'static,
        F: Fn(&Settings) -> Result<S> + Send + Sync + 'static,
    {
        self.spiders.register(location, constructor);
        self
    }

    pub fn spiders(&self) -> &SpiderRegistry {
        &self.spiders
    }

    pub fn spiders_mut(&mut self) -> &mut SpiderRegistry {
        &mut self.spiders
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn pipelines_mut(&mut self) -> &mut PipelineRegistry {
        &mut self.pipelines
    }

    /// Configures a crawler for the spider registered at `spider_loc`.
    pub fn create_crawler_object(&self, spider_loc: &str, settings: Settings) -> Result<Crawler> {
        let spider = self.spiders.load(spider_loc)?;
        Crawler::new(settings, spider, &self.pipelines)
    }

    fn prepare(
        &self,
        spider_loc: &str,
        app: &AppConfig,
        spider_settings: &SettingsMap,
    ) -> Result<Crawler> {
        let settings = get_spider_settings(app, spider_settings)?;
        self.create_crawler_object(spider_loc, settings)
    }

    /// Runs a crawl of the spider registered at `spider_loc`, blocking until
    /// it is over. Logging is set up from `log` for the duration of the crawl.
    pub fn start_crawler(
        &self,
        spider_loc: &str,
        app: &AppConfig,
        spider_settings: &SettingsMap,
        log: &LogConfig,
    ) -> Result<CrawlStats> {
        let _logger = start_logger(log)?;

        let crawler = match self.prepare(spider_loc, app, spider_settings) {
            Ok(crawler) => crawler,
            Err(e) => {
                log::error!("Couldn't launch {spider_loc}: {e:#}");
                return Err(e);
            }
        };

        log::info!(
            "Starting spider {} from {spider_loc}",
            crawler.spider_name()
        );
        let stats = crawler.start();
        if let Err(e) = &stats {
            log::error!("Crawl of {spider_loc} failed: {e}");
        }
        stats
    }
}

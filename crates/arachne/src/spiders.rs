//! Built-in spiders.

use anyhow::{anyhow, Result};
use arachne_crawler::serde_json::json;
use arachne_crawler::{Item, ParseContext, Response, Settings, Spider, Url};
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::registry::SpiderRegistry;

pub const TITLE_SPIDER: &str = "arachne.spiders.TitleSpider";

/// Setting read by [`TitleSpider`], a mapping so that it can be overridden
/// per spider.
pub const TITLE_SPIDER_SETTINGS: &str = "TITLE_SPIDER";

/// The registry of every built-in spider.
pub fn registry() -> SpiderRegistry {
    let mut registry = SpiderRegistry::new();
    registry.register(TITLE_SPIDER, TitleSpider::from_settings);
    registry
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TitleSpiderConfig {
    pub start_urls: Vec<String>,
    pub follow_links: bool,
    /// Defaults to the start URLs hosts
    pub allowed_domains: Option<Vec<String>>,
}

/// Scrapes the title of every page, optionally following links within the
/// allowed domains.
#[derive(Debug)]
pub struct TitleSpider {
    config: TitleSpiderConfig,
    allowed_domains: Vec<String>,
    title: Selector,
    links: Selector,
}

impl TitleSpider {
    pub fn new(config: TitleSpiderConfig) -> Result<Self> {
        let allowed_domains = match &config.allowed_domains {
            Some(domains) => domains.clone(),
            None => config
                .start_urls
                .iter()
                .filter_map(|url| Url::parse(url).ok())
                .filter_map(|url| url.host_str().map(str::to_string))
                .collect(),
        };
        Ok(Self {
            config,
            allowed_domains,
            title: Selector::parse("title").map_err(|e| anyhow!("Invalid selector: {e:?}"))?,
            links: Selector::parse("a[href]").map_err(|e| anyhow!("Invalid selector: {e:?}"))?,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let config = settings
            .get_as::<TitleSpiderConfig>(TITLE_SPIDER_SETTINGS)?
            .unwrap_or_default();
        Self::new(config)
    }

    fn allowed(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => self.allowed_domains.iter().any(|domain| {
                host == domain
                    || host
                        .strip_suffix(domain.as_str())
                        .map_or(false, |sub| sub.ends_with('.'))
            }),
            None => false,
        }
    }
}

impl Spider for TitleSpider {
    fn name(&self) -> &str {
        "title"
    }

    fn start_urls(&self) -> Vec<String> {
        self.config.start_urls.clone()
    }

    fn parse(&mut self, response: Response, ctx: &mut ParseContext) -> Result<()> {
        let html = Html::parse_document(&response.body);

        let title = html
            .select(&self.title)
            .next()
            .map(|title| title.text().collect::<String>().trim().to_string());

        if self.config.follow_links {
            let base = Url::parse(&response.url)?;
            for link in html.select(&self.links) {
                let href = link.value().attr("href").unwrap_or_default();
                match base.join(href) {
                    Ok(url) if self.allowed(&url) => {
                        ctx.follow(url.as_str());
                    }
                    Ok(url) => log::debug!("Not following {url}, domain not allowed"),
                    Err(e) => log::debug!("Not following {href} got: {e}"),
                }
            }
        }

        let mut item = Item::new();
        item.insert("url".into(), json!(response.url));
        item.insert("title".into(), json!(title));
        ctx.yield_item(item);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html>
        <head><title> Home page </title></head>
        <body>
            <a href="/about">About</a>
            <a href="https://blog.example.org/post">Blog</a>
            <a href="https://elsewhere.org/">Elsewhere</a>
        </body>
    </html>"#;

    fn spider(follow_links: bool) -> TitleSpider {
        TitleSpider::new(TitleSpiderConfig {
            start_urls: vec!["https://example.org/".into()],
            follow_links,
            allowed_domains: None,
        })
        .unwrap()
    }

    #[test]
    fn scrape_title() {
        let mut spider = spider(false);
        let mut ctx = ParseContext::new("https://example.org/");
        spider
            .parse(Response::new("https://example.org/", 200, PAGE), &mut ctx)
            .unwrap();

        assert!(ctx.requests().is_empty());
        assert_eq!(1, ctx.items().len());
        assert_eq!(json!("Home page"), ctx.items()[0]["title"]);
        assert_eq!(json!("https://example.org/"), ctx.items()[0]["url"]);
    }

    #[test]
    fn follow_allowed_links() {
        let mut spider = spider(true);
        let mut ctx = ParseContext::new("https://example.org/");
        spider
            .parse(Response::new("https://example.org/", 200, PAGE), &mut ctx)
            .unwrap();

        assert_eq!(
            &[
                "https://example.org/about".to_string(),
                "https://blog.example.org/post".to_string()
            ],
            ctx.requests()
        );
    }

    #[test]
    fn missing_title_is_null() {
        let mut spider = spider(false);
        let mut ctx = ParseContext::new("https://example.org/");
        spider
            .parse(Response::new("https://example.org/", 200, "<p>hi</p>"), &mut ctx)
            .unwrap();
        assert_eq!(json!(null), ctx.items()[0]["title"]);
    }

    #[test]
    fn from_settings() {
        let settings = Settings::new(
            json!({
                "TITLE_SPIDER": {
                    "start_urls": ["https://a.org/"],
                    "allowed_domains": ["b.org"],
                }
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        let spider = TitleSpider::from_settings(&settings).unwrap();
        assert_eq!(vec!["https://a.org/".to_string()], spider.start_urls());
        assert_eq!(vec!["b.org".to_string()], spider.allowed_domains);

        let spider = TitleSpider::from_settings(&Settings::default()).unwrap();
        assert!(spider.start_urls().is_empty());
    }
}

use std::sync::Arc;

use reqwest::Url;
use serde_json::{Map, Value};

use crate::settings::Settings;

/// A scraped item, field name to value
pub type Item = Map<String, Value>;

/// Builds spider instances, the crawler asks for one per parsing worker.
pub type SpiderFactory = Arc<dyn Fn(&Settings) -> anyhow::Result<Box<dyn Spider>> + Send + Sync>;

pub trait Spider: Send {
    fn name(&self) -> &str;

    fn start_urls(&self) -> Vec<String>;

    fn parse(&mut self, response: Response, ctx: &mut ParseContext) -> anyhow::Result<()>;

    fn closed(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }
}

/// Collects what a spider produced while parsing one response.
#[derive(Debug, Clone)]
pub struct ParseContext {
    base: Option<Url>,
    requests: Vec<String>,
    items: Vec<Item>,
}

impl ParseContext {
    pub fn new(base_url: &str) -> Self {
        let base = match Url::parse(base_url) {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("Relative links won't be followed for {base_url} got: {e}");
                None
            }
        };
        Self {
            base,
            requests: vec![],
            items: vec![],
        }
    }

    /// Schedules `link`, resolved against the response URL. Returns `false`
    /// when the link can't be crawled.
    pub fn follow(&mut self, link: &str) -> bool {
        let joined = match &self.base {
            Some(base) => base.join(link),
            None => Url::parse(link),
        };
        match joined {
            Ok(mut url) if url.scheme() == "http" || url.scheme() == "https" => {
                url.set_fragment(None);
                self.requests.push(url.into());
                true
            }
            Ok(url) => {
                log::debug!("Ignoring link with scheme {}: {url}", url.scheme());
                false
            }
            Err(e) => {
                log::warn!("Ignoring invalid link {link} got: {e}");
                false
            }
        }
    }

    pub fn yield_item(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn requests(&self) -> &[String] {
        &self.requests
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_output(self) -> (Vec<String>, Vec<Item>) {
        (self.requests, self.items)
    }
}

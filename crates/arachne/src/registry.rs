use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use arachne_crawler::{Settings, Spider, SpiderFactory};

/// Spiders that can be launched, by location identifier
/// (e.g. `arachne.spiders.TitleSpider`).
#[derive(Clone, Default)]
pub struct SpiderRegistry {
    factories: HashMap<String, SpiderFactory>,
}

impl fmt::Debug for SpiderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiderRegistry")
            .field("locations", &self.locations())
            .finish()
    }
}

impl SpiderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S, F>(&mut self, location: impl Into<String>, constructor: F) -> &mut Self
    where
        S: Spider + 'static,
        F: Fn(&Settings) -> Result<S> + Send + Sync + 'static,
    {
        let factory: SpiderFactory =
            Arc::new(move |settings: &Settings| Ok(Box::new(constructor(settings)?) as Box<dyn Spider>));
        self.factories.insert(location.into(), factory);
        self
    }

    pub fn contains(&self, location: &str) -> bool {
        self.factories.contains_key(location)
    }

    /// Sorted registered locations.
    pub fn locations(&self) -> Vec<&str> {
        let mut locations = self.factories.keys().map(String::as_str).collect::<Vec<_>>();
        locations.sort_unstable();
        locations
    }

    pub fn load(&self, location: &str) -> Result<SpiderFactory> {
        self.factories.get(location).cloned().ok_or_else(|| {
            anyhow!(
                "Couldn't load spider {location}, known spiders: {}",
                self.locations().join(", ")
            )
        })
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::settings::Settings;
use crate::spider::Item;

/// A post-processing stage applied to every scraped item.
pub trait ItemPipeline: Send {
    fn open_spider(&mut self, _spider: &str) -> Result<()> {
        Ok(())
    }

    /// Returns `None` to drop the item, later stages won't see it.
    fn process_item(&mut self, item: Item) -> Result<Option<Item>>;

    fn close_spider(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type PipelineFactory =
    Arc<dyn Fn(&Settings) -> Result<Box<dyn ItemPipeline>> + Send + Sync>;

/// Known pipelines, by the identifier used in `ITEM_PIPELINES`.
#[derive(Clone, Default)]
pub struct PipelineRegistry {
    factories: HashMap<String, PipelineFactory>,
}

impl fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids = self.identifiers();
        ids.sort_unstable();
        f.debug_struct("PipelineRegistry")
            .field("factories", &ids)
            .finish()
    }
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Settings) -> Result<Box<dyn ItemPipeline>> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiates the pipelines listed in `ITEM_PIPELINES`, in priority order.
    pub fn build(&self, settings: &Settings) -> Result<ItemPipelines> {
        let stages = settings
            .item_pipelines()?
            .into_iter()
            .map(|(id, _)| {
                let factory = self
                    .factories
                    .get(&id)
                    .ok_or_else(|| anyhow!("Unknown item pipeline: {id}"))?;
                let pipeline = factory(settings)
                    .map_err(|e| anyhow!("Couldn't create item pipeline {id} got: {e}"))?;
                Ok((id, pipeline))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ItemPipelines { stages })
    }
}

/// The ordered chain of pipelines a crawler feeds items through.
#[derive(Default)]
pub struct ItemPipelines {
    stages: Vec<(String, Box<dyn ItemPipeline>)>,
}

impl fmt::Debug for ItemPipelines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.identifiers()).finish()
    }
}

impl ItemPipelines {
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Opens every stage in order. When one fails, the stages already opened
    /// are closed before the error is returned.
    pub fn open_spider(&mut self, spider: &str) -> Result<()> {
        for opened in 0..self.stages.len() {
            let (id, stage) = &mut self.stages[opened];
            if let Err(e) = stage.open_spider(spider) {
                let err = anyhow!("Pipeline {id} couldn't open spider {spider} got: {e}");
                for (id, stage) in self.stages[..opened].iter_mut() {
                    if let Err(e) = stage.close_spider() {
                        log::error!("Pipeline {id} couldn't close got: {e}");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn process_item(&mut self, item: Item) -> Result<Option<Item>> {
        let mut item = item;
        for (id, stage) in self.stages.iter_mut() {
            match stage.process_item(item) {
                Ok(Some(processed)) => item = processed,
                Ok(None) => {
                    log::debug!("Item dropped by pipeline {id}");
                    return Ok(None);
                }
                Err(e) => return Err(anyhow!("Pipeline {id} failed got: {e}")),
            }
        }
        Ok(Some(item))
    }

    /// Closes every stage, the first failure is reported.
    pub fn close_spider(&mut self) -> Result<()> {
        let mut res = Ok(());
        for (id, stage) in self.stages.iter_mut() {
            if let Err(e) = stage.close_spider() {
                log::error!("Pipeline {id} couldn't close got: {e}");
                if res.is_ok() {
                    res = Err(anyhow!("Pipeline {id} couldn't close got: {e}"));
                }
            }
        }
        res
    }
}

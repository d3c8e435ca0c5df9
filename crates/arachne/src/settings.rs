use anyhow::{anyhow, bail, Result};
use arachne_crawler::serde_json::{Map, Value};
use arachne_crawler::{Settings, SettingsMap, ITEM_PIPELINES};

use crate::config::AppConfig;

pub const EXPORT_JSON_PIPELINE: &str = "arachne.pipelines.ExportJSON";
pub const EXPORT_JSON_PRIORITY: i64 = 100;

pub const EXPORT_CSV_PIPELINE: &str = "arachne.pipelines.ExportCSV";
pub const EXPORT_CSV_PRIORITY: i64 = 200;

/// Builds the settings of one spider from the global settings and the spider
/// own settings.
///
/// Spider settings take priority: for every global setting also set for the
/// spider, the spider mapping is merged into the global one, one level deep.
/// Settings only defined for the spider are ignored. `app` is left untouched.
pub fn get_spider_settings(app: &AppConfig, spider_settings: &SettingsMap) -> Result<Settings> {
    let mut all_settings = app.scrapy_settings.clone();

    match all_settings.get(ITEM_PIPELINES) {
        None | Some(Value::Null) => {
            all_settings.insert(ITEM_PIPELINES.into(), Value::Object(Map::new()));
        }
        Some(Value::Object(_)) => (),
        Some(other) => bail!("Setting {ITEM_PIPELINES} must be a mapping, got: {other}"),
    }

    if app.export_json || app.export_csv {
        let pipelines = all_settings
            .get_mut(ITEM_PIPELINES)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| anyhow!("Setting {ITEM_PIPELINES} must be a mapping"))?;
        if app.export_json {
            pipelines.insert(EXPORT_JSON_PIPELINE.into(), EXPORT_JSON_PRIORITY.into());
        }
        if app.export_csv {
            pipelines.insert(EXPORT_CSV_PIPELINE.into(), EXPORT_CSV_PRIORITY.into());
        }
    }

    for (setting, value) in all_settings.iter_mut() {
        if let Some(overrides) = spider_settings.get(setting) {
            merge_nested(setting, value, overrides)?;
        }
    }

    Ok(Settings::new(all_settings))
}

fn merge_nested(setting: &str, value: &mut Value, overrides: &Value) -> Result<()> {
    match (value, overrides) {
        (Value::Object(values), Value::Object(overrides)) => {
            for (key, v) in overrides {
                values.insert(key.clone(), v.clone());
            }
            Ok(())
        }
        (Value::Object(_), other) => {
            bail!("Spider setting {setting} must be a mapping to be merged, got: {other}")
        }
        (other, _) => {
            bail!("Setting {setting} is not a mapping and can't be overridden per spider, got: {other}")
        }
    }
}

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Raw settings, setting name to value
pub type SettingsMap = Map<String, Value>;

/// Pipeline identifier to priority, lower priorities run first
pub const ITEM_PIPELINES: &str = "ITEM_PIPELINES";

/// Read-only view over the settings a crawler is built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: SettingsMap,
}

impl Settings {
    pub fn new(values: SettingsMap) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_map(&self, key: &str) -> Option<&SettingsMap> {
        self.get(key).and_then(Value::as_object)
    }

    /// Deserializes a single setting, `None` when it is not set.
    pub fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.get(key)
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| anyhow!("Invalid value for setting {key}: {e}"))
            })
            .transpose()
    }

    /// Deserializes the whole settings mapping, unknown keys are up to `T`.
    pub fn deserialize<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_value(Value::Object(self.values.clone()))?)
    }

    /// Returns the configured item pipelines sorted by priority, ties are
    /// broken by identifier.
    pub fn item_pipelines(&self) -> Result<Vec<(String, i64)>> {
        let pipelines = match self.get(ITEM_PIPELINES) {
            None | Some(Value::Null) => return Ok(vec![]),
            Some(Value::Object(pipelines)) => pipelines,
            Some(other) => {
                return Err(anyhow!(
                    "Setting {ITEM_PIPELINES} must be a mapping, got: {other}"
                ))
            }
        };

        let mut ordered = pipelines
            .iter()
            .map(|(id, priority)| {
                priority
                    .as_i64()
                    .map(|p| (id.clone(), p))
                    .ok_or_else(|| anyhow!("Invalid priority for pipeline {id}: {priority}"))
            })
            .collect::<Result<Vec<_>>>()?;
        ordered.sort_by(|(id_a, p_a), (id_b, p_b)| p_a.cmp(p_b).then_with(|| id_a.cmp(id_b)));

        Ok(ordered)
    }

    pub fn as_map(&self) -> &SettingsMap {
        &self.values
    }

    pub fn into_map(self) -> SettingsMap {
        self.values
    }
}

impl From<SettingsMap> for Settings {
    fn from(values: SettingsMap) -> Self {
        Self::new(values)
    }
}

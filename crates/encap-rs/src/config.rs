use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Concrete shapes for named graph inputs.
pub type ShapeHintSet = BTreeMap<String, Vec<usize>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AotConfig {
    #[serde(default)]
    pub requested: bool,
    /// Each set is tried independently; an empty list means "use declared input shapes".
    #[serde(default)]
    pub hint_sets: Vec<ShapeHintSet>,
}

impl AotConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_hints(hint_sets: impl IntoIterator<Item = ShapeHintSet>) -> Self {
        Self {
            requested: true,
            hint_sets: hint_sets.into_iter().collect(),
        }
        .normalized()
    }

    /// Sorts and deduplicates hint sets so each distinct set is processed once.
    pub fn normalized(mut self) -> Self {
        self.hint_sets.sort();
        self.hint_sets.dedup();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncapsulateConfig {
    /// Recorded on every encapsulate node so executors can tell graphs apart.
    #[serde(default)]
    pub graph_id: i64,
    /// Extra string attributes copied onto every encapsulate node.
    #[serde(default)]
    pub device_config: BTreeMap<String, String>,
    #[serde(default)]
    pub aot: AotConfig,
}

impl EncapsulateConfig {
    pub fn new(graph_id: i64) -> Self {
        Self {
            graph_id,
            ..Self::default()
        }
    }

    pub fn with_device_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.device_config.insert(key.into(), value.into());
        self
    }

    pub fn with_aot(mut self, aot: AotConfig) -> Self {
        self.aot = aot.normalized();
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).context("failed to parse encapsulate config")?;
        Ok(Self {
            aot: config.aot.normalized(),
            ..config
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize encapsulate config")
    }
}

//! Externally managed key/value settings.
//!
//! Another process (the desktop wrapper, a CLI) owns these values and may
//! change them at any time, so nothing here caches: every `get` reads the
//! current value.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub const ACTIVE_BACKEND_KEY: &str = "model_inference_framework";
pub const OLLAMA_BASE_URL_KEY: &str = "ollama_base_url";
pub const VLLM_BASE_URL_KEY: &str = "vllm_base_url";

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current value of `key`, or `None` if unset or unreadable.
    async fn get(&self, key: &str) -> Option<String>;
}

/// Settings kept in a flat JSON object on disk, re-read on every lookup.
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettings {
    async fn get(&self, key: &str) -> Option<String> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read settings file {:?}: {}", self.path, e);
                return None;
            }
        };
        let json: Value = match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                warn!("Settings file {:?} is not valid JSON: {}", self.path, e);
                return None;
            }
        };
        match json.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// In-process settings, for embedding and tests.
#[derive(Clone, Default)]
pub struct MemorySettings {
    values: Arc<DashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values.remove(key);
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }
}

use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_QUEUE_KEY: &str = "field_management_offline_queue";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period for `Engine::submit_default`.
    pub default_debounce_ms: u64,
    /// Key the offline queue is persisted under in the durable store.
    pub queue_storage_key: String,
    /// Anonymous/shared views: the offline queue is switched off entirely and
    /// the engine always considers itself online.
    pub restricted_context: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_debounce_ms: DEFAULT_DEBOUNCE_MS,
            queue_storage_key: DEFAULT_QUEUE_KEY.to_string(),
            restricted_context: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        if config.queue_storage_key.is_empty() {
            return Err(EngineError::Config("queue_storage_key must not be empty".into()));
        }
        Ok(config)
    }

    pub fn default_debounce(&self) -> Duration {
        Duration::from_millis(self.default_debounce_ms)
    }
}

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::ModelConfig;
use crate::error::{DispatchError, Result};

/// Model parameters that can change while the server runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&ModelConfig> for ModelSettings {
    fn from(config: &ModelConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.temperature.is_none() && self.max_tokens.is_none()
    }

    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(DispatchError::InvalidArguments("provide a setting to update".to_string()));
        }
        if matches!(&self.model, Some(model) if model.trim().is_empty()) {
            return Err(DispatchError::InvalidArguments("model cannot be empty".to_string()));
        }
        if matches!(self.temperature, Some(t) if !(0.0..=2.0).contains(&t)) {
            return Err(DispatchError::InvalidArguments("temperature must be between 0 and 2".to_string()));
        }
        if self.max_tokens == Some(0) {
            return Err(DispatchError::InvalidArguments("max_tokens must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Live settings shared by the model client and the admin surface.
#[derive(Debug)]
pub struct SettingsHandle {
    current: RwLock<ModelSettings>,
}

impl SettingsHandle {
    pub fn new(settings: ModelSettings) -> Self {
        Self {
            current: RwLock::new(settings),
        }
    }

    pub async fn current(&self) -> ModelSettings {
        self.current.read().await.clone()
    }

    /// Applies every field of `update` or none of them.
    pub async fn update(&self, update: SettingsUpdate) -> Result<ModelSettings> {
        update.validate()?;

        let mut current = self.current.write().await;
        if let Some(model) = update.model {
            current.model = model.trim().to_string();
        }
        if let Some(temperature) = update.temperature {
            current.temperature = temperature;
        }
        if let Some(max_tokens) = update.max_tokens {
            current.max_tokens = max_tokens;
        }

        info!(
            "Model settings updated: model={} temperature={} max_tokens={}",
            current.model, current.temperature, current.max_tokens
        );
        Ok(current.clone())
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(ModelSettings::from(&ModelConfig::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() {
        let handle = SettingsHandle::default();
        let updated = handle
            .update(SettingsUpdate {
                temperature: Some(0.7),
                ..SettingsUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.model, "gpt-4.1");
        assert_eq!(updated.temperature, 0.7);
        assert_eq!(updated.max_tokens, 2000);
        assert_eq!(handle.current().await, updated);
    }

    #[tokio::test]
    async fn test_invalid_update_changes_nothing() {
        let handle = SettingsHandle::default();
        let before = handle.current().await;

        let err = handle
            .update(SettingsUpdate {
                model: Some("gpt-4o".to_string()),
                temperature: Some(3.5),
                max_tokens: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
        assert_eq!(handle.current().await, before);

        let empty = handle.update(SettingsUpdate::default()).await.unwrap_err();
        assert!(matches!(empty, DispatchError::InvalidArguments(_)));
    }

    #[test]
    fn test_update_rejects_unknown_fields() {
        let parsed = serde_json::from_str::<SettingsUpdate>(r#"{"model":"gpt-4o","profile":"x"}"#);
        assert!(parsed.is_err());
    }
}

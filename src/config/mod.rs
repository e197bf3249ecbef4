use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};

/// Prefix for environment overrides, e.g. `WEB_AGENT__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "WEB_AGENT";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub dispatcher: DispatcherConfig,
    pub fetcher: FetcherConfig,
    pub batch: BatchConfig,
    pub output: OutputConfig,
    pub history: HistoryConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    #[serde(with = "humantime_serde")]
    pub turn_timeout: Duration,
    /// How long a timed-out turn waits for cancelled tool calls to report.
    #[serde(with = "humantime_serde")]
    pub cancel_grace: Duration,
    pub history_window: usize,
    pub max_tool_calls: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Http,
    Browser,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    pub mode: FetchMode,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub max_body_size: String, // "5MB"
    pub max_text_chars: usize,
    pub rotate_user_agents: bool,
    pub max_browser_pages: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    pub max_concurrent: usize,
    pub max_targets: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Directory for JSON-lines history and the agent registry; both stay in memory when unset.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Plain-text log file, also offered for download; stdout only when unset.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_token: None,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(120),
            cancel_grace: Duration::from_secs(5),
            history_window: 20,
            max_tool_calls: 8,
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Http,
            request_timeout: Duration::from_secs(30),
            max_body_size: "5MB".to_string(),
            max_text_chars: 3000,
            rotate_user_agents: true,
            max_browser_pages: 4,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_targets: 50,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./output"),
            base_url: "http://localhost:8000/output".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: 2000,
            request_timeout: Duration::from_secs(60),
            max_concurrent_requests: 4,
        }
    }
}

impl FetcherConfig {
    pub fn max_body_bytes(&self) -> Result<u64> {
        FileConfigManager::parse_size_to_bytes(&self.max_body_size)
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        if !self.config_path.exists() {
            warn!("Configuration file not found, creating default config at {:?}", self.config_path);
            self.create_default_config().await?;
        }

        // file first, then WEB_AGENT__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(
                config::File::from(self.config_path.clone()).format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| DispatchError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| DispatchError::Config(format!("Failed to parse config: {}", e)))?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        debug!("Validating configuration");

        if config.server.port == 0 {
            return Err(DispatchError::Config("server.port must be greater than 0".to_string()));
        }
        if let Some(ref token) = config.server.api_token {
            if token.trim().is_empty() {
                return Err(DispatchError::Config("server.api_token cannot be blank".to_string()));
            }
        }

        let dispatcher = &config.dispatcher;
        if dispatcher.turn_timeout.is_zero() {
            return Err(DispatchError::Config("dispatcher.turn_timeout must be greater than 0".to_string()));
        }
        if dispatcher.cancel_grace >= dispatcher.turn_timeout {
            return Err(DispatchError::Config("dispatcher.cancel_grace must be shorter than turn_timeout".to_string()));
        }
        if dispatcher.history_window > 200 {
            return Err(DispatchError::Config("dispatcher.history_window cannot exceed 200".to_string()));
        }
        if dispatcher.max_tool_calls == 0 || dispatcher.max_tool_calls > 32 {
            return Err(DispatchError::Config("dispatcher.max_tool_calls must be between 1 and 32".to_string()));
        }

        let fetcher = &config.fetcher;
        if fetcher.request_timeout.is_zero() {
            return Err(DispatchError::Config("fetcher.request_timeout must be greater than 0".to_string()));
        }
        if fetcher.request_timeout > dispatcher.turn_timeout {
            return Err(DispatchError::Config("fetcher.request_timeout cannot exceed dispatcher.turn_timeout".to_string()));
        }
        if !Self::is_valid_size_format(&fetcher.max_body_size) {
            return Err(DispatchError::Config(format!(
                "Invalid max_body_size format '{}', expected format like '5MB', '512KB'",
                fetcher.max_body_size
            )));
        }
        if fetcher.max_text_chars == 0 {
            return Err(DispatchError::Config("fetcher.max_text_chars must be greater than 0".to_string()));
        }
        if fetcher.max_browser_pages == 0 {
            return Err(DispatchError::Config("fetcher.max_browser_pages must be greater than 0".to_string()));
        }

        if config.batch.max_concurrent == 0 {
            return Err(DispatchError::Config("batch.max_concurrent must be greater than 0".to_string()));
        }
        if config.batch.max_concurrent > 50 {
            return Err(DispatchError::Config("batch.max_concurrent cannot exceed 50 for resource safety".to_string()));
        }
        if config.batch.max_targets == 0 {
            return Err(DispatchError::Config("batch.max_targets must be greater than 0".to_string()));
        }

        if !Self::is_http_url(&config.output.base_url) {
            return Err(DispatchError::Config("output.base_url must start with http:// or https://".to_string()));
        }

        let model = &config.model;
        if !Self::is_http_url(&model.base_url) {
            return Err(DispatchError::Config("model.base_url must start with http:// or https://".to_string()));
        }
        if model.model.trim().is_empty() {
            return Err(DispatchError::Config("model.model cannot be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&model.temperature) {
            return Err(DispatchError::Config("model.temperature must be between 0 and 2".to_string()));
        }
        if model.max_tokens == 0 {
            return Err(DispatchError::Config("model.max_tokens must be greater than 0".to_string()));
        }
        if model.max_concurrent_requests == 0 {
            return Err(DispatchError::Config("model.max_concurrent_requests must be greater than 0".to_string()));
        }

        if let Some(file) = &config.logging.file {
            if file.file_name().is_none() {
                return Err(DispatchError::Config(format!("logging.file {:?} must name a file", file)));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| DispatchError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(&self.config_path, toml_content)
            .await
            .map_err(|e| DispatchError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Configuration saved successfully");
        Ok(())
    }
}

impl FileConfigManager {
    async fn create_default_config(&self) -> Result<()> {
        let toml_content = toml::to_string_pretty(&Config::default())
            .map_err(|e| DispatchError::Config(format!("Failed to serialize default config: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DispatchError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        fs::write(&self.config_path, toml_content)
            .map_err(|e| DispatchError::Config(format!("Failed to write default config: {}", e)))?;

        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }

    fn is_http_url(value: &str) -> bool {
        value.starts_with("http://") || value.starts_with("https://")
    }

    /// Validate size format (e.g., "5MB", "1GB")
    fn is_valid_size_format(size_str: &str) -> bool {
        Self::parse_size_to_bytes(size_str).is_ok()
    }

    /// Parse size string to bytes
    pub fn parse_size_to_bytes(size_str: &str) -> Result<u64> {
        let size_str = size_str.trim().to_uppercase();
        // longer suffixes first so "MB" is not read as "B"
        let multipliers = [
            ("TB", 1024_u64.pow(4)),
            ("GB", 1024 * 1024 * 1024),
            ("MB", 1024 * 1024),
            ("KB", 1024),
            ("B", 1),
        ];

        for (suffix, multiplier) in &multipliers {
            if let Some(number_part) = size_str.strip_suffix(suffix) {
                let number: u64 = number_part
                    .parse()
                    .map_err(|_| DispatchError::Config(format!("Invalid number in size format: {}", size_str)))?;
                return Ok(number * multiplier);
            }
        }

        Err(DispatchError::Config(format!("Invalid size format: {}", size_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = FileConfigManager::new(config_path.clone());

        let config = manager.load_config().await.unwrap();

        assert_eq!(config.dispatcher.turn_timeout, Duration::from_secs(120));
        assert_eq!(config.dispatcher.history_window, 20);
        assert_eq!(config.fetcher.mode, FetchMode::Http);
        assert_eq!(config.model.model, "gpt-4.1");
        assert!(config_path.exists());
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            "[fetcher]\nmode = \"browser\"\nrequest_timeout = \"10s\"\nmax_body_size = \"2MB\"\nmax_text_chars = 500\nrotate_user_agents = false\nmax_browser_pages = 2\n",
        )
        .unwrap();

        let config = FileConfigManager::new(config_path).load_config().await.unwrap();
        assert_eq!(config.fetcher.mode, FetchMode::Browser);
        assert_eq!(config.fetcher.request_timeout, Duration::from_secs(10));
        assert_eq!(config.fetcher.max_body_bytes().unwrap(), 2 * 1024 * 1024);
        assert_eq!(config.batch.max_concurrent, 4);
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = FileConfigManager::new(config_path);

        let mut config = Config::default();
        config.batch.max_concurrent = 7;
        config.dispatcher.turn_timeout = Duration::from_secs(90);
        manager.save_config(&config).await.unwrap();

        let loaded = manager.load_config().await.unwrap();
        assert_eq!(loaded.batch.max_concurrent, 7);
        assert_eq!(loaded.dispatcher.turn_timeout, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_config_validation() {
        let manager = FileConfigManager::new(PathBuf::from("test.toml"));

        assert!(manager.validate_config(&Config::default()).is_ok());

        let mut invalid_config = Config::default();
        invalid_config.batch.max_concurrent = 0;
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.dispatcher.cancel_grace = Duration::from_secs(300);
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.fetcher.max_body_size = "lots".to_string();
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.output.base_url = "ftp://files".to_string();
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.model.temperature = 3.5;
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.logging.file = Some(PathBuf::from("/"));
        assert!(manager.validate_config(&invalid_config).is_err());
    }

    #[test]
    fn test_parse_size_to_bytes() {
        assert_eq!(FileConfigManager::parse_size_to_bytes("100MB").unwrap(), 100 * 1024 * 1024);
        assert_eq!(FileConfigManager::parse_size_to_bytes("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(FileConfigManager::parse_size_to_bytes("500kb").unwrap(), 500 * 1024);
        assert_eq!(FileConfigManager::parse_size_to_bytes("12B").unwrap(), 12);
        assert!(FileConfigManager::parse_size_to_bytes("invalid").is_err());
        assert!(FileConfigManager::parse_size_to_bytes("100").is_err());
    }
}

use crate::analysis::{AnalysisOptions, RetryPolicy, Settings, SettingsProvider};
use crate::global;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub const API_KEY_ENV_VARS: [&str; 2] = ["MEETLENS_API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub analysis: AnalysisConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Override for the provider base URL (proxies, tests).
    pub api_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_attempts: u32,
    pub base_wait_seconds: u64,
    /// Interval between keepalive frames on progress streams.
    pub keepalive_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// How long an HTTP progress stream stays open. The job itself keeps
    /// running past this.
    pub job_timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            api_endpoint: None,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_wait_seconds: 2,
            keepalive_seconds: 10,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3838,
            job_timeout_seconds: 900,
        }
    }
}

impl AnalysisConfig {
    pub fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            retry: RetryPolicy::new(
                self.max_attempts,
                Duration::from_secs(self.base_wait_seconds),
            ),
            keepalive_interval: Duration::from_secs(self.keepalive_seconds.max(1)),
            ..AnalysisOptions::default()
        }
    }
}

impl ProviderConfig {
    /// Provider settings, with the API key taken from the environment when
    /// one of [`API_KEY_ENV_VARS`] is set.
    pub fn resolve_settings(&self) -> Result<Settings> {
        let env_key = API_KEY_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        self.settings_with_key(env_key)
    }

    fn settings_with_key(&self, env_key: Option<String>) -> Result<Settings> {
        let api_key = env_key
            .or_else(|| self.api_key.clone())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let Some(api_key) = api_key else {
            bail!(
                "No API key configured. Set provider.api_key in {} or export {}",
                Config::config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "config.toml".to_string()),
                API_KEY_ENV_VARS[0]
            );
        };

        Ok(Settings {
            api_key,
            model: self.model.clone(),
        })
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

/// Reads the config file on every call, so key changes apply to the next
/// job without a restart.
pub struct FileSettings;

impl SettingsProvider for FileSettings {
    fn settings(&self) -> Result<Settings> {
        Config::load()?.provider.resolve_settings()
    }
}

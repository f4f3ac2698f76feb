//! # vibe-config
//!
//! Layered settings for the Store Vibe Generator.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults (the `Default` impls below)
//! 2. an optional TOML file (`store-vibe.toml`, or the path in `VIBE_CONFIG`)
//! 3. environment variables `VIBE__<SECTION>__<KEY>`, e.g. `VIBE__SERVER__PORT=9000`
//!
//! A `.env` file in the working directory is loaded into the environment first.

use std::time::Duration;

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "store-vibe.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub rate_limit: RateLimitSettings,
    pub pipeline: PipelineSettings,
    pub openai: OpenAiSettings,
    pub screenshot: ScreenshotSettings,
    pub archive: ArchiveSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// sqlx connection string, e.g. `sqlite://store_vibe.db`
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { url: "sqlite://store_vibe.db".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub action: String,
    pub limit: u32,
    pub window_secs: u64,
    /// Records untouched for this long are swept.
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            action: "generate-vibe".to_string(),
            limit: 10,
            window_secs: 24 * 60 * 60,
            retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub stage_timeout_secs: u64,
    pub seo_attempts: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { stage_timeout_secs: 60, seo_attempts: 3 }
    }
}

impl PipelineSettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub vision_model: String,
    pub image_model: String,
    pub max_tokens: u32,
    pub image_size: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
            vision_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            max_tokens: 300,
            image_size: "1024x1024".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScreenshotSettings {
    /// Screenshot API endpoint taking `url` as a query parameter.
    pub endpoint: String,
    pub access_key: Option<SecretString>,
    pub width: u32,
    pub height: u32,
    pub timeout_secs: u64,
}

impl Default for ScreenshotSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.apiflash.com/v1/urltoimage".to_string(),
            access_key: None,
            width: 1280,
            height: 800,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Root directory for archived images.
    pub root: String,
    /// Public URL prefix the root directory is served under.
    pub public_base_url: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            root: "./data/vibes".to_string(),
            public_base_url: "http://127.0.0.1:8080/static/vibes".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { filter: "info,tower_http=info".to_string(), json: false }
    }
}

impl Settings {
    /// Loads `.env`, the config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        // Missing .env is not an error.
        let _ = dotenvy::dotenv();
        let file = std::env::var("VIBE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_sources(Some(&file), Environment::with_prefix("VIBE").separator("__").try_parsing(true))
    }

    fn from_sources(file: Option<&str>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }
        let settings: Settings = builder.add_source(env).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid("rate_limit.window_secs must be positive".to_string()));
        }
        if self.rate_limit.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("rate_limit.sweep_interval_secs must be positive".to_string()));
        }
        if self.pipeline.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid("pipeline.stage_timeout_secs must be positive".to_string()));
        }
        if self.pipeline.seo_attempts == 0 {
            return Err(ConfigError::Invalid("pipeline.seo_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Endpoint that turns a share link into a direct media URL.
    pub resolver_url: Option<String>,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_dwell_secs")]
    pub dwell_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reel-feed")
}

fn default_db_path() -> String {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("reels.db").to_string_lossy().to_string()
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(data_dir)
        .join("reel-feed")
        .join("videos")
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_dwell_secs() -> u64 {
    2
}

fn default_user_agent() -> String {
    format!("reel-feed/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_dir: default_cache_dir(),
            resolver_url: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            dwell_secs: default_dwell_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.fetch_timeout_secs == 0 {
            return Err(AppError::Config(
                "fetch_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reel-feed")
            .join("config.toml")
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_secs)
    }
}

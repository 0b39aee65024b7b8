//! Configuration loader and validator for the wishlist sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub server: Server,
    pub auth: Auth,
    pub steam: Steam,
    pub poll: Poll,
}

/// App-level settings: storage location, dispatch worker and watchdog timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    #[serde(default = "default_detail_fetch_delay_ms")]
    pub detail_fetch_delay_ms: u64,
    #[serde(default = "default_stale_job_seconds")]
    pub stale_job_seconds: u64,
    #[serde(default = "default_watchdog_interval_seconds")]
    pub watchdog_interval_seconds: u64,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind: String,
}

/// Bearer token settings shared by the API and the token-issuing CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Auth {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
}

/// Steam Web API and storefront endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Steam {
    pub api_key: String,
    pub api_base: String,
    pub store_base: String,
}

/// Job-watching client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub base_url: String,
    pub interval_ms: u64,
    pub timeout_seconds: u64,
}

fn default_detail_fetch_delay_ms() -> u64 {
    100
}

fn default_stale_job_seconds() -> u64 {
    900
}

fn default_watchdog_interval_seconds() -> u64 {
    60
}

fn default_token_ttl_hours() -> u64 {
    24
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` wins; otherwise a SQLite file under the data dir.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/wishlist.db", self.app.resolved_data_dir()))
    }

    /// Secrets may be supplied through the environment instead of the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("STEAM_API_KEY") {
            if !key.trim().is_empty() {
                self.steam.api_key = key;
            }
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            if !secret.trim().is_empty() {
                self.auth.jwt_secret = secret;
            }
        }
    }
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }

    pub fn detail_fetch_delay(&self) -> Duration {
        Duration::from_millis(self.detail_fetch_delay_ms)
    }
}

impl Poll {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.stale_job_seconds == 0 {
        return Err(ConfigError::Invalid("app.stale_job_seconds must be > 0"));
    }
    if cfg.app.watchdog_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "app.watchdog_interval_seconds must be > 0",
        ));
    }

    if cfg.server.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind must be non-empty"));
    }

    if cfg.auth.jwt_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("auth.jwt_secret must be non-empty"));
    }
    if cfg.auth.issuer.trim().is_empty() {
        return Err(ConfigError::Invalid("auth.issuer must be non-empty"));
    }
    if cfg.auth.audience.trim().is_empty() {
        return Err(ConfigError::Invalid("auth.audience must be non-empty"));
    }
    if cfg.auth.token_ttl_hours == 0 {
        return Err(ConfigError::Invalid("auth.token_ttl_hours must be > 0"));
    }

    if cfg.steam.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("steam.api_key must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.steam.api_base).is_err() {
        return Err(ConfigError::Invalid("steam.api_base must be a valid URL"));
    }
    if reqwest::Url::parse(&cfg.steam.store_base).is_err() {
        return Err(ConfigError::Invalid("steam.store_base must be a valid URL"));
    }

    if reqwest::Url::parse(&cfg.poll.base_url).is_err() {
        return Err(ConfigError::Invalid("poll.base_url must be a valid URL"));
    }
    if cfg.poll.interval_ms == 0 {
        return Err(ConfigError::Invalid("poll.interval_ms must be > 0"));
    }
    if cfg.poll.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("poll.timeout_seconds must be > 0"));
    }

    Ok(())
}

/// Returns the canonical example YAML.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  max_backoff_seconds: 60
  detail_fetch_delay_ms: 100
  stale_job_seconds: 900
  watchdog_interval_seconds: 60

server:
  bind: "127.0.0.1:8080"

auth:
  jwt_secret: "CHANGE_ME_TO_A_LONG_RANDOM_SECRET"
  issuer: "wishlist-sync"
  audience: "wishlist-client"
  token_ttl_hours: 24

steam:
  api_key: "YOUR_STEAM_WEB_API_KEY"
  api_base: "https://api.steampowered.com/"
  store_base: "https://store.steampowered.com/"

poll:
  base_url: "http://127.0.0.1:8080/"
  interval_ms: 2000
  timeout_seconds: 300
"#
}

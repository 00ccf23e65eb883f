//! Configuration types and loading.
//!
//! Settings come from an optional YAML file, with secrets overridable from
//! the environment (`BOT_TOKEN`, `OWNER_ID`, `BASE_URL`) and paths/ports
//! from CLI flags applied in `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default port for the HTTP API.
pub const DEFAULT_PORT: u16 = 8000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub bot: BotConfig,
}

/// HTTP server and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Bind address for the HTTP API.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port for the HTTP API (default: 8000).
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot token shared with the platform; env `BOT_TOKEN` overrides.
    #[serde(default)]
    pub token: String,

    /// Telegram id of the configured owner; env `OWNER_ID` overrides.
    #[serde(default)]
    pub owner_id: i64,

    /// URL of the mini-app the /start button opens; env `BASE_URL` overrides.
    #[serde(default)]
    pub webapp_url: String,

    /// Long-poll timeout for getUpdates, in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            owner_id: 0,
            webapp_url: String::new(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tasks.db")
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from an optional YAML file, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("BOT_TOKEN")
            && !token.is_empty()
        {
            self.bot.token = token;
        }
        if let Ok(owner) = std::env::var("OWNER_ID") {
            match owner.parse() {
                Ok(id) => self.bot.owner_id = id,
                Err(_) => warn!("OWNER_ID is not a valid integer, ignoring"),
            }
        }
        if let Ok(url) = std::env::var("BASE_URL")
            && !url.is_empty()
        {
            self.bot.webapp_url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();

        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.db_path, PathBuf::from("tasks.db"));
        assert_eq!(config.bot.poll_timeout_secs, 30);
        assert_eq!(config.bot.owner_id, 0);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = "server:\n  port: 9100\nbot:\n  owner_id: 77\n";

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.bot.owner_id, 77);
        assert!(config.bot.token.is_empty());
    }
}

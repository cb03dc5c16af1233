//! Configuration Module
//!
//! Loads and validates the bridge configuration from a JSON document.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Bridge configuration.
///
/// Only the bot token and the operator chat id are required; everything else
/// falls back to loopback defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Telegram bot token from @BotFather
    pub telegram_bot_token: String,

    /// Chat id of the sole authorized operator
    pub telegram_chat_id: i64,

    /// Bind address for the hook API (default: "127.0.0.1")
    #[serde(default = "default_bridge_host")]
    pub bridge_host: String,

    /// Bind port for the hook API (default: 7888)
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    /// Default `/approve` timeout when the hook does not send one (default: 300)
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_seconds: u64,
}

fn default_bridge_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bridge_port() -> u16 {
    7888
}

fn default_approval_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file is fatal: the caller is expected to print the error and
    /// exit non-zero, and the message tells the user to copy the example.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!(
                "config file not found: {}\n   Copy config/config.example.json → {} and fill in your values.",
                path.display(),
                path.display()
            );
        }

        tracing::debug!("Loading configuration from: {:?}", path);
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_full_config() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            f,
            r#"{{"telegram_bot_token": "123:abc", "telegram_chat_id": 42,
                "bridge_host": "0.0.0.0", "bridge_port": 9999,
                "approval_timeout_seconds": 60}}"#
        )
        .expect("write");

        let config = Config::load(f.path()).expect("load");
        assert_eq!(config.telegram_bot_token, "123:abc");
        assert_eq!(config.telegram_chat_id, 42);
        assert_eq!(config.bridge_host, "0.0.0.0");
        assert_eq!(config.bridge_port, 9999);
        assert_eq!(config.approval_timeout_seconds, 60);
    }

    #[test]
    fn applies_defaults_for_optional_keys() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        write!(f, r#"{{"telegram_bot_token": "123:abc", "telegram_chat_id": 42}}"#).expect("write");

        let config = Config::load(f.path()).expect("load");
        assert_eq!(config.bridge_host, "127.0.0.1");
        assert_eq!(config.bridge_port, 7888);
        assert_eq!(config.approval_timeout_seconds, 300);
    }

    #[test]
    fn missing_file_error_mentions_example() {
        let err = Config::load("/nonexistent/config.json").expect_err("should fail");
        assert!(err.to_string().contains("config.example.json"));
    }

    #[test]
    fn missing_required_key_fails() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        write!(f, r#"{{"telegram_bot_token": "123:abc"}}"#).expect("write");
        assert!(Config::load(f.path()).is_err());
    }
}

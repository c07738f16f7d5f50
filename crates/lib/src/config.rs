//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.mailroom/config.json`) and
//! environment. Every field has a default so a missing file is a working
//! loopback setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Webhook ingestion policy.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Mailbox storage settings (database location, TTL, history bounds).
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

/// Gateway bind and port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 8025).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8025
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Webhook ingestion policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    /// Accepted root domain: mail for it (or any subdomain) is stored,
    /// everything else is silently discarded. Overridden by MAILROOM_DOMAIN
    /// env. When neither is set, mail for any domain is accepted.
    pub domain: Option<String>,
}

/// Mailbox storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxConfig {
    /// SQLite database file. Overridden by MAILROOM_DB_PATH env.
    /// Default: `data/mailbox.db` under the config directory.
    pub database_path: Option<PathBuf>,

    /// Seconds a stored message stays readable (default 3600).
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Upper bound on messages returned per history query (default 50).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Seconds between expiry sweeps (default 60).
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_history_limit() -> usize {
    50
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            ttl_seconds: default_ttl_seconds(),
            history_limit: default_history_limit(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

/// Resolve the accepted root domain: env MAILROOM_DOMAIN overrides config.
pub fn resolve_accepted_domain(config: &Config) -> Option<String> {
    std::env::var("MAILROOM_DOMAIN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .ingest
                .domain
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the mailbox database path: env MAILROOM_DB_PATH overrides config,
/// which overrides `data/mailbox.db` under the default config directory.
pub fn resolve_database_path(config: &Config) -> PathBuf {
    if let Ok(p) = std::env::var("MAILROOM_DB_PATH") {
        let trimmed = p.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    config
        .mailbox
        .database_path
        .clone()
        .unwrap_or_else(|| default_config_dir().join("data").join("mailbox.db"))
}

/// Default config directory: `~/.mailroom` (cwd when no home is known).
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".mailroom"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("MAILROOM_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_dir().join("config.json"))
}

/// Load config from the default path (or MAILROOM_CONFIG_PATH). Missing
/// file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

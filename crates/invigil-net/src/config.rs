//! Endpoint configuration and collaborator factory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use invigil_core::traits::SyncEvent;

use crate::channel::{ChannelConfig, WsSyncChannel};
use crate::http::HttpExamBackend;

/// Where the exam server lives and how patient we are with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// REST base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// WebSocket endpoint for the sync channel.
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    /// Bound on the start/submit/security-log requests, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Bound on WebSocket connection establishment, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Fixed delay between reconnect attempts, in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Reconnect attempts before giving up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

fn default_api_url() -> String {
    "http://localhost:5000/api".to_string()
}
fn default_socket_url() -> String {
    "ws://localhost:5000/ws".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    20
}
fn default_reconnect_delay() -> u64 {
    1000
}
fn default_reconnect_attempts() -> u32 {
    10
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            socket_url: default_socket_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

impl NetConfig {
    /// Build the HTTP backend described by this config.
    pub fn backend(&self) -> HttpExamBackend {
        HttpExamBackend::new(
            &self.api_url,
            Some(Duration::from_secs(self.request_timeout_secs)),
        )
    }

    /// Build the sync channel described by this config, delivering events
    /// through the given sender.
    pub fn channel(&self, events: mpsc::UnboundedSender<SyncEvent>) -> WsSyncChannel {
        WsSyncChannel::new(
            ChannelConfig {
                url: self.socket_url.clone(),
                reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
                max_reconnect_attempts: self.reconnect_attempts,
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            },
            events,
        )
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `invigil.toml` in the current directory
/// 2. `~/.config/invigil/config.toml`
///
/// Environment variable overrides: `INVIGIL_API_URL`, `INVIGIL_SOCKET_URL`.
pub fn load_config() -> Result<NetConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<NetConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("invigil.toml");
        if local.exists() {
            Some(local)
        } else if let Some(home) = dirs_path() {
            let global = home.join("config.toml");
            if global.exists() {
                Some(global)
            } else {
                None
            }
        } else {
            None
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<NetConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => NetConfig::default(),
    };

    if let Ok(url) = std::env::var("INVIGIL_API_URL") {
        config.api_url = url;
    }
    if let Ok(url) = std::env::var("INVIGIL_SOCKET_URL") {
        config.socket_url = url;
    }

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("invigil"))
}

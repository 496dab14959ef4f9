//! Configuration types

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP listener settings
    #[serde(default)]
    pub http: HttpSettings,

    /// Peer listener settings
    #[serde(default)]
    pub peer: PeerSettings,

    /// Forwarding behaviour
    #[serde(default)]
    pub relay: RelaySettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.to_path_buf());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.to_path_buf());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Path this settings value was loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Check addresses parse and limits are usable
    pub fn validate(&self) -> Result<()> {
        self.http.socket_addr()?;
        self.peer.socket_addr()?;

        if self.relay.response_timeout_secs == 0 {
            return Err(SettingsError::Invalid(
                "relay.response_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.http.max_body_bytes == 0 {
            return Err(SettingsError::Invalid(
                "http.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.peer.max_message_bytes == 0 {
            return Err(SettingsError::Invalid(
                "peer.max_message_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| SettingsError::Invalid(format!("{field} {value:?}: {e}")))
}

fn default_max_bytes() -> usize {
    10 * 1024 * 1024
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Listen address (host:port)
    #[serde(default = "default_http_listen_addr")]
    pub listen_addr: String,

    /// Largest accepted POST body
    #[serde(default = "default_max_bytes")]
    pub max_body_bytes: usize,
}

fn default_http_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_http_listen_addr(),
            max_body_bytes: default_max_bytes(),
        }
    }
}

impl HttpSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("http.listen_addr", &self.listen_addr)
    }
}

/// Peer listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSettings {
    /// Listen address (host:port)
    #[serde(default = "default_peer_listen_addr")]
    pub listen_addr: String,

    /// Largest accepted peer message
    #[serde(default = "default_max_bytes")]
    pub max_message_bytes: usize,

    /// Ping interval in seconds, 0 disables
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Payloads queued per peer before senders wait
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_peer_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_keepalive() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    16
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_peer_listen_addr(),
            max_message_bytes: default_max_bytes(),
            keepalive_secs: default_keepalive(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl PeerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("peer.listen_addr", &self.listen_addr)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }
}

/// Forwarding behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// How long a forward request waits for the peer, in seconds
    #[serde(default = "default_timeout")]
    pub response_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_timeout(),
        }
    }
}

impl RelaySettings {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

//! PeerBridge Settings
//!
//! Configuration file management for the relay.
//!
//! ## Features
//!
//! - HTTP and peer listener addresses
//! - Response timeout and payload limits
//! - JSON serialization with per-field defaults
//!
//! ## Usage
//!
//! ```no_run
//! use peerbridge_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.relay.response_timeout_secs = 10;
//! settings.validate()?;
//! settings.save()?;
//! # Ok::<(), peerbridge_settings::SettingsError>(())
//! ```

mod config;

pub use config::{HttpSettings, PeerSettings, RelaySettings, Settings};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Directory holding the relay's configuration
pub fn default_config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("peerbridge");
    }
    match std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        Some(home) => PathBuf::from(home).join(".config").join("peerbridge"),
        None => PathBuf::from("."),
    }
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    let dir = default_config_dir();
    if dir == PathBuf::from(".") {
        dir.join("peerbridge.json")
    } else {
        dir.join("settings.json")
    }
}

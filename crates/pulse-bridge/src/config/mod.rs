//! Backend configuration
//!
//! Settings come from two places:
//!
//! - A YAML file ([`load_config`] / [`save_config`]) for standalone use
//! - The host's own key-value store, through [`ConfigLookup`] and
//!   [`BackendConfig::from_lookup`]
//!
//! # Usage
//!
//! ```ignore
//! use pulse_bridge::config::{default_config_path, load_config, BackendConfig};
//!
//! let config = load_config(&default_config_path());
//! let config = BackendConfig::from_lookup(&host_settings);
//! ```

mod io;
mod paths;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use io::{load_config, read_config, save_config};
pub use paths::{default_config_dir, default_config_path};

/// Default playback period override in frames
pub const DEFAULT_BUFFER_LENGTH: u32 = 2048;

/// Configuration block holding the backend's own keys
pub const CONFIG_BLOCK: &str = "pulse";

/// Read-only view of the host's key-value configuration
///
/// `block` is `None` for root keys.
pub trait ConfigLookup {
    fn get_bool(&self, block: Option<&str>, key: &str) -> Option<bool>;
    fn get_int(&self, block: Option<&str>, key: &str) -> Option<i64>;
    fn exists(&self, block: Option<&str>, key: &str) -> bool;
}

fn lookup_key(block: Option<&str>, key: &str) -> String {
    match block {
        Some(block) => format!("{}/{}", block, key),
        None => key.to_string(),
    }
}

/// Flat map lookup, keyed `"block/key"` or `"key"`
impl ConfigLookup for HashMap<String, String> {
    fn get_bool(&self, block: Option<&str>, key: &str) -> Option<bool> {
        self.get(&lookup_key(block, key)).map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
    }

    fn get_int(&self, block: Option<&str>, key: &str) -> Option<i64> {
        self.get(&lookup_key(block, key))
            .and_then(|v| v.trim().parse::<i64>().ok())
    }

    fn exists(&self, block: Option<&str>, key: &str) -> bool {
        self.contains_key(&lookup_key(block, key))
    }
}

/// Configuration for the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Playback period override in frames
    ///
    /// When non-zero, opening a playback device sets the host's update size to
    /// this value with a single update. Zero keeps the host's own values.
    pub buffer_length: u32,

    /// Allow the client library to start a server when none is running
    pub spawn_server: bool,

    /// Host configuration pins the output format (skip the sink channel query)
    pub pinned_format: bool,

    /// Host configuration pins the sample rate (don't let the server pick one)
    pub pinned_frequency: bool,

    /// Allow superset channel-map matching when the server supports it
    pub allow_channel_superset: bool,

    /// Client name announced to the server (None = executable name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            buffer_length: DEFAULT_BUFFER_LENGTH,
            spawn_server: false,
            pinned_format: false,
            pinned_frequency: false,
            allow_channel_superset: true,
            client_name: None,
        }
    }
}

impl BackendConfig {
    /// Build the config from the host's key-value store
    ///
    /// Reads `pulse/buffer-length`, `pulse/spawn-server`, `pulse/allow-superset`
    /// and checks for the root keys `format` and `frequency`.
    pub fn from_lookup(lookup: &dyn ConfigLookup) -> Self {
        let defaults = Self::default();

        let buffer_length = match lookup.get_int(Some(CONFIG_BLOCK), "buffer-length") {
            Some(len) if len >= 0 => u32::try_from(len).unwrap_or(u32::MAX),
            Some(len) => {
                log::warn!("Ignoring negative {}/buffer-length: {}", CONFIG_BLOCK, len);
                defaults.buffer_length
            }
            None => defaults.buffer_length,
        };

        Self {
            buffer_length,
            spawn_server: lookup
                .get_bool(Some(CONFIG_BLOCK), "spawn-server")
                .unwrap_or(defaults.spawn_server),
            pinned_format: lookup.exists(None, "format"),
            pinned_frequency: lookup.exists(None, "frequency"),
            allow_channel_superset: lookup
                .get_bool(Some(CONFIG_BLOCK), "allow-superset")
                .unwrap_or(defaults.allow_channel_superset),
            client_name: None,
        }
    }

    /// Set the playback period override
    pub fn with_buffer_length(mut self, frames: u32) -> Self {
        self.buffer_length = frames;
        self
    }

    /// Allow server autospawn
    pub fn with_spawn_server(mut self, spawn: bool) -> Self {
        self.spawn_server = spawn;
        self
    }

    /// Pin the host format and/or rate
    pub fn with_pinned(mut self, format: bool, frequency: bool) -> Self {
        self.pinned_format = format;
        self.pinned_frequency = frequency;
        self
    }

    /// Set the client name announced to the server
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Client name: the configured one, else the executable's file name
    pub fn resolved_client_name(&self) -> String {
        if let Some(name) = &self.client_name {
            return name.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "pulse-bridge".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_empty_lookup_is_default() {
        let config = BackendConfig::from_lookup(&HashMap::new());
        assert_eq!(config, BackendConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_keys() {
        let map = settings(&[
            ("pulse/buffer-length", "0"),
            ("pulse/spawn-server", "yes"),
            ("pulse/allow-superset", "false"),
            ("frequency", "48000"),
        ]);
        let config = BackendConfig::from_lookup(&map);

        assert_eq!(config.buffer_length, 0);
        assert!(config.spawn_server);
        assert!(!config.allow_channel_superset);
        assert!(config.pinned_frequency);
        assert!(!config.pinned_format);
    }

    #[test]
    fn test_negative_buffer_length_ignored() {
        let map = settings(&[("pulse/buffer-length", "-5")]);
        let config = BackendConfig::from_lookup(&map);
        assert_eq!(config.buffer_length, DEFAULT_BUFFER_LENGTH);
    }

    #[test]
    fn test_client_name_override() {
        let config = BackendConfig::default().with_client_name("game");
        assert_eq!(config.resolved_client_name(), "game");
        assert!(!BackendConfig::default().resolved_client_name().is_empty());
    }
}

//! Path utilities for bridge configuration files

use std::path::PathBuf;

/// Get the configuration directory
///
/// Returns: `~/.config/pulse-bridge` (platform config dir, `.` when unknown)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pulse-bridge")
}

/// Get the default backend config file path
///
/// Returns: `~/.config/pulse-bridge/backend.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("backend.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_crate_name() {
        assert!(default_config_dir().ends_with("pulse-bridge"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        assert!(default_config_path().ends_with("backend.yaml"));
    }
}

//! YAML storage for [`BackendConfig`]
//!
//! A missing or broken file never keeps a device from opening: [`load_config`]
//! falls back to the defaults, while [`read_config`] reports what went wrong.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

use super::BackendConfig;

/// Read the backend settings stored at `path`
///
/// `Ok(None)` when there is no file. An empty file holds no overrides and
/// reads as the defaults.
pub fn read_config(path: &Path) -> Result<Option<BackendConfig>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Cannot read backend config {:?}", path)),
    };

    if contents.trim().is_empty() {
        return Ok(Some(BackendConfig::default()));
    }

    let config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Invalid backend config {:?}", path))?;
    Ok(Some(config))
}

/// Backend settings for `path`, or the defaults
///
/// Read and parse errors are logged and yield the defaults.
pub fn load_config(path: &Path) -> BackendConfig {
    match read_config(path) {
        Ok(Some(config)) => {
            log::debug!("Backend config from {:?}: {:?}", path, config);
            config
        }
        Ok(None) => {
            log::debug!("No backend config at {:?}", path);
            BackendConfig::default()
        }
        Err(e) => {
            log::warn!("{:#}; opening with default backend settings", e);
            BackendConfig::default()
        }
    }
}

/// Write `config` to `path` as YAML, creating missing directories
pub fn save_config(config: &BackendConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Cannot serialize backend config")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Cannot write backend config {:?}", path))?;

    log::debug!("Backend config saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.yaml");

        assert!(read_config(&path).unwrap().is_none());
        assert_eq!(load_config(&path), BackendConfig::default());
    }

    #[test]
    fn test_empty_file_reads_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.yaml");
        std::fs::write(&path, "\n  \n").unwrap();

        assert_eq!(read_config(&path).unwrap(), Some(BackendConfig::default()));
    }

    #[test]
    fn test_directory_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();

        assert!(read_config(dir.path()).is_err());
        assert_eq!(load_config(dir.path()), BackendConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("backend.yaml");

        let config = BackendConfig {
            buffer_length: 512,
            spawn_server: true,
            client_name: Some("mixer".to_string()),
            ..Default::default()
        };

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_yaml_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.yaml");
        std::fs::write(&path, "buffer_length: [not, a, number]").unwrap();

        let err = read_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid backend config"));
        assert_eq!(load_config(&path), BackendConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.yaml");
        std::fs::write(&path, "spawn_server: true\n").unwrap();

        let config = load_config(&path);
        assert!(config.spawn_server);
        assert_eq!(config.buffer_length, super::super::DEFAULT_BUFFER_LENGTH);
    }
}

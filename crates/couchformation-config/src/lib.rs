pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the base directory
pub const CONFIG_DIR_ENV: &str = "CLOUDMGR_CONFIG_DIR";

/// Settings file name inside the base directory
pub const SETTINGS_FILE: &str = "settings.yaml";

const APP_DIR: &str = "couch-formation";
const MAX_DEFAULT_WORKERS: usize = 8;

/// Base directory holding every project.
///
/// Search order:
/// 1. `CLOUDMGR_CONFIG_DIR`
/// 2. `<config dir>/couch-formation` (e.g. `~/.config/couch-formation`)
///
/// The directory is created if it does not exist.
pub fn base_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(APP_DIR),
    };

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("Created base directory {}", dir.display());
    }

    Ok(dir)
}

/// User settings (`settings.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Dispatcher pool size
    pub workers: usize,

    /// Region used when a command does not name one
    pub default_region: Option<String>,

    pub docker: DockerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_region: None,
            docker: DockerSettings::default(),
        }
    }
}

/// Docker driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Image nodes are started from
    pub image: String,

    /// Subnet of the project network
    pub cidr: String,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            image: "couchbase/server:latest".to_string(),
            cidr: "10.11.0.0/16".to_string(),
        }
    }
}

impl Settings {
    /// Load `settings.yaml` from `dir`; a missing file gives the defaults
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Malformed {
                path: path.clone(),
                source,
            })?;
        settings.validate()?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Write the settings to `dir/settings.yaml`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(SETTINGS_FILE);
        let content = serde_yaml::to_string(self).map_err(|source| ConfigError::Malformed {
            path: path.clone(),
            source,
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "workers".into(),
                message: "must be at least 1".into(),
            });
        }
        if !self.docker.cidr.contains('/') {
            return Err(ConfigError::InvalidSetting {
                key: "docker.cidr".into(),
                message: format!("{} is not a CIDR block", self.docker.cidr),
            });
        }
        Ok(())
    }
}

/// Available parallelism, capped
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_base_dir_from_env() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("nested").join("cf");

        temp_env::with_var(CONFIG_DIR_ENV, Some(&base), || {
            let dir = base_dir().unwrap();
            assert_eq!(dir, base);
            assert!(dir.exists());
        });
    }

    #[test]
    #[serial]
    fn test_base_dir_default() {
        temp_env::with_var_unset(CONFIG_DIR_ENV, || {
            // no config dir on some CI hosts
            if dirs::config_dir().is_none() {
                return;
            }
            let dir = base_dir().unwrap();
            assert!(dir.ends_with("couch-formation"));
        });
    }

    #[test]
    fn test_settings_missing_file_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(temp_dir.path()).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.workers >= 1 && settings.workers <= 8);
    }

    #[test]
    fn test_settings_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(
            temp_dir.path().join(SETTINGS_FILE),
            "workers: 3\ndocker:\n  image: couchbase/server:7.6.1\n",
        )
        .unwrap();

        let settings = Settings::load(temp_dir.path()).unwrap();
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.docker.image, "couchbase/server:7.6.1");
        assert_eq!(settings.docker.cidr, "10.11.0.0/16");
        assert_eq!(settings.default_region, None);
    }

    #[test]
    fn test_settings_malformed() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(SETTINGS_FILE), "workers: [1, 2\n").unwrap();

        let result = Settings::load(temp_dir.path());
        assert!(matches!(result, Err(ConfigError::Malformed { .. })));
    }

    #[test]
    fn test_settings_zero_workers_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(SETTINGS_FILE), "workers: 0\n").unwrap();

        let result = Settings::load(temp_dir.path());
        assert!(matches!(result, Err(ConfigError::InvalidSetting { .. })));
    }

    #[test]
    fn test_settings_save_and_reload() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            workers: 2,
            default_region: Some("local".into()),
            ..Default::default()
        };
        settings.save(temp_dir.path()).unwrap();
        assert_eq!(Settings::load(temp_dir.path()).unwrap(), settings);
    }
}

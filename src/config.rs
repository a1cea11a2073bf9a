use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::file::{BUF_CAP, MAX_OPEN_FILES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Storage engine settings, read from a JSON file.
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every paged file, index and heap
    pub data_dir: PathBuf,
    /// Number of page slots in the buffer pool
    pub buffer_capacity: usize,
    /// Upper bound on simultaneously open paged files
    pub max_open_files: usize,
    /// Optional cap on the minimum degree of new indexes
    pub btree_max_degree: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            buffer_capacity: BUF_CAP,
            max_open_files: MAX_OPEN_FILES,
            btree_max_degree: None,
        }
    }
}

impl StorageConfig {
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(&self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_capacity",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_open_files == 0 {
            return Err(ConfigError::Invalid {
                field: "max_open_files",
                reason: "must be positive".to_string(),
            });
        }
        if let Some(degree) = self.btree_max_degree
            && degree < 2
        {
            return Err(ConfigError::Invalid {
                field: "btree_max_degree",
                reason: format!("{} is below the minimum degree 2", degree),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");
        fs::write(&path, r#"{ "data_dir": "/tmp/x", "btree_max_degree": 4 }"#).unwrap();

        let config = StorageConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.buffer_capacity, BUF_CAP);
        assert_eq!(config.max_open_files, MAX_OPEN_FILES);
        assert_eq!(config.btree_max_degree, Some(4));
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");

        let mut config = StorageConfig::with_data_dir(temp_dir.path());
        config.buffer_capacity = 32;
        config.save(&path).unwrap();

        assert_eq!(StorageConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");
        fs::write(&path, r#"{ "buffer_capacity": 0 }"#).unwrap();

        assert!(matches!(
            StorageConfig::load(&path),
            Err(ConfigError::Invalid {
                field: "buffer_capacity",
                ..
            })
        ));
    }
}

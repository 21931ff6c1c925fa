use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cohort_core::{DEFAULT_DIMENSION, DEFAULT_THRESHOLD};

use crate::error::{Result, StoreError};

/// Settings read from `config.toml` in the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    /// Embedding dimension; incoming vectors are truncated or zero-padded to it.
    pub dimension: usize,
    /// Threshold for workspaces created without an explicit one.
    pub default_threshold: f32,
    /// Bypass the similarity gate for `import` and first-time bulk loads.
    pub force_add_on_import: bool,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            default_threshold: DEFAULT_THRESHOLD,
            force_add_on_import: true,
        }
    }
}

impl CohortConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&content).map_err(|source| StoreError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

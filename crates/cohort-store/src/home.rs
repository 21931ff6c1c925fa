use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CohortConfig;
use crate::error::{Result, StoreError};
use crate::store::Store;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "COHORT_DATA_DIR";

const DB_FILE: &str = "cohort.db";
const CONFIG_FILE: &str = "config.toml";

/// `$HOME/.cohort`, or `./.cohort` when no home directory is known.
pub fn default_base_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".cohort")
}

/// Priority: explicit path > `COHORT_DATA_DIR` > [`default_base_dir`].
pub fn resolve_base_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    env::var(DATA_DIR_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_base_dir)
}

/// The data directory: workspace database plus configuration.
///
/// ```text
/// ~/.cohort/
/// ├── cohort.db
/// └── config.toml
/// ```
pub struct CohortHome {
    base: PathBuf,
    store: Store,
    config: CohortConfig,
}

impl CohortHome {
    /// Create the directory if needed, load config, open the store.
    pub fn open(base_dir: Option<&Path>) -> Result<Self> {
        let base = resolve_base_dir(base_dir);
        fs::create_dir_all(&base).map_err(|source| StoreError::Io {
            path: base.clone(),
            source,
        })?;

        let config = CohortConfig::load(&base.join(CONFIG_FILE))?;
        let store = Store::open(&base.join(DB_FILE))?;
        Ok(Self {
            base,
            store,
            config,
        })
    }

    /// In-memory store with default config (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            base: PathBuf::from(":memory:"),
            store: Store::open_in_memory()?,
            config: CohortConfig::default(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &CohortConfig {
        &self.config
    }

    pub fn into_parts(self) -> (Store, CohortConfig) {
        (self.store, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins() {
        let dir = Path::new("/tmp/somewhere");
        assert_eq!(resolve_base_dir(Some(dir)), dir);
    }

    #[test]
    fn test_open_creates_directory_and_db() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("nested").join("data");
        let home = CohortHome::open(Some(&base)).unwrap();
        assert!(base.join(DB_FILE).exists());
        assert_eq!(home.config(), &CohortConfig::default());
        assert_eq!(home.base_dir(), base);
    }

    #[test]
    fn test_open_reads_config() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE),
            "default_threshold = 0.6\nforce_add_on_import = false\n",
        )
        .unwrap();
        let home = CohortHome::open(Some(tmp.path())).unwrap();
        assert_eq!(home.config().default_threshold, 0.6);
        assert!(!home.config().force_add_on_import);
    }
}

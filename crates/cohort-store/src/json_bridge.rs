use std::collections::HashMap;
use std::fs;
use std::path::Path;

use cohort_core::{export_json, import_json};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    /// Import every workspace in a JSON export file. Workspaces with the same
    /// id are overwritten; returns the number imported.
    pub fn import_json_file(&self, path: &Path) -> Result<usize> {
        let json = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.import_json_str(&json)
    }

    /// Names are unique: importing a workspace whose name is held by a
    /// different id fails before anything is written.
    pub fn import_json_str(&self, json: &str) -> Result<usize> {
        let workspaces =
            import_json(json).map_err(|e| StoreError::InvalidData(format!("invalid JSON: {e}")))?;

        let existing: HashMap<String, Uuid> = self
            .list_workspaces()?
            .into_iter()
            .map(|s| (s.name, s.id))
            .collect();
        if let Some(clash) = workspaces
            .iter()
            .find(|ws| existing.get(&ws.name).is_some_and(|id| *id != ws.id))
        {
            return Err(StoreError::InvalidData(format!(
                "workspace name '{}' is already used by another workspace",
                clash.name
            )));
        }

        self.save_workspaces(&workspaces)?;
        tracing::info!("imported {} workspaces", workspaces.len());
        Ok(workspaces.len())
    }

    pub fn export_json_file(&self, path: &Path) -> Result<()> {
        let json = self.export_json_string()?;
        fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn export_json_string(&self) -> Result<String> {
        let workspaces = self.load_all()?;
        export_json(&workspaces)
            .map_err(|e| StoreError::InvalidData(format!("JSON export failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use cohort_core::{IncrementalAggregator, Item, WorkspaceState};

    use super::*;

    #[test]
    fn test_export_then_import_into_fresh_store() {
        let source = Store::open_in_memory().unwrap();
        let agg = IncrementalAggregator::new();
        let mut ws = WorkspaceState::new("music", 0.8);
        agg.admit_or_seed(&mut ws, Item::with_embedding("song.mp3", vec![0.1, 0.9]), false);
        source.save_workspace(&ws).unwrap();

        let json = source.export_json_string().unwrap();
        let target = Store::open_in_memory().unwrap();
        assert_eq!(target.import_json_str(&json).unwrap(), 1);

        let loaded = target.find_workspace("music").unwrap().unwrap();
        assert_eq!(loaded.id, ws.id);
        assert_eq!(loaded.members(), ws.members());
    }

    #[test]
    fn test_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("export.json");
        let store = Store::open_in_memory().unwrap();
        store.save_workspace(&WorkspaceState::new("a", 0.5)).unwrap();
        store.export_json_file(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["workspaces"][0]["name"], "a");

        let other = Store::open_in_memory().unwrap();
        assert_eq!(other.import_json_file(&path).unwrap(), 1);
    }

    #[test]
    fn test_import_name_clash_writes_nothing() {
        let source = Store::open_in_memory().unwrap();
        source.save_workspace(&WorkspaceState::new("shared", 0.8)).unwrap();
        source.save_workspace(&WorkspaceState::new("fresh", 0.8)).unwrap();
        let json = source.export_json_string().unwrap();

        let target = Store::open_in_memory().unwrap();
        target.save_workspace(&WorkspaceState::new("shared", 0.6)).unwrap();
        assert!(matches!(
            target.import_json_str(&json),
            Err(StoreError::InvalidData(_))
        ));
        assert!(target.find_workspace("fresh").unwrap().is_none());
    }

    #[test]
    fn test_invalid_json_is_invalid_data() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.import_json_str("{not json"),
            Err(StoreError::InvalidData(_))
        ));
    }
}

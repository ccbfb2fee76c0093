//! Per-object metadata records and the virtual-path → object-id inverse.
//!
//! Records live as `metadata/<id>.json`; the path index is rebuilt from them
//! at startup and kept in memory behind a read-write lock.

use crate::core::{DaemonError, ObjectMetadata, Result};
use crate::storage::object::ObjectStore;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub struct MetadataIndex {
    dir: PathBuf,
    objects: Arc<ObjectStore>,
    /// virtual path → object id
    paths: RwLock<HashMap<String, String>>,
}

impl MetadataIndex {
    pub fn new<P: AsRef<Path>>(dir: P, objects: Arc<ObjectStore>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create metadata dir: {}", e)))?;
        let index = Self {
            dir,
            objects,
            paths: RwLock::new(HashMap::new()),
        };
        index.rebuild_path_index()?;
        Ok(index)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn rebuild_path_index(&self) -> Result<()> {
        let mut map = HashMap::new();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| DaemonError::Io(format!("Failed to read metadata dir: {}", e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|data| {
                    serde_json::from_str::<ObjectMetadata>(&data).map_err(|e| e.to_string())
                }) {
                Ok(meta) => {
                    for virtual_path in &meta.paths {
                        map.insert(virtual_path.clone(), meta.id.clone());
                    }
                }
                Err(e) => log::warn!("Skipping unreadable metadata {:?}: {}", path, e),
            }
        }
        *self.paths.write()? = map;
        Ok(())
    }

    /// Persist a record and refresh its path mappings. Enforces
    /// `modified ≥ created`.
    pub fn save(&self, meta: &ObjectMetadata) -> Result<()> {
        let mut meta = meta.clone();
        if meta.modified < meta.created {
            meta.modified = meta.created;
        }

        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| DaemonError::Serialization(format!("Failed to serialize metadata: {}", e)))?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create temp metadata file: {}", e)))?;
        temp.write_all(&json)
            .map_err(|e| DaemonError::Io(format!("Failed to write metadata: {}", e)))?;
        temp.persist(self.path_for(&meta.id))
            .map_err(|e| DaemonError::Io(format!("Failed to persist metadata: {}", e)))?;

        let mut map = self.paths.write()?;
        map.retain(|_, id| id != &meta.id);
        for virtual_path in &meta.paths {
            map.insert(virtual_path.clone(), meta.id.clone());
        }
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<ObjectMetadata> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(DaemonError::NotFound(format!(
                "Metadata for object '{}' not found",
                id
            )));
        }
        let data = fs::read_to_string(&path)
            .map_err(|e| DaemonError::Io(format!("Failed to read metadata '{}': {}", id, e)))?;
        serde_json::from_str(&data)
            .map_err(|e| DaemonError::Serialization(format!("Corrupt metadata '{}': {}", id, e)))
    }

    /// Store bytes and register metadata in one step.
    pub fn store_with_metadata(&self, bytes: &[u8], meta: ObjectMetadata) -> Result<String> {
        let id = self.objects.store(bytes)?;
        let mut meta = meta;
        meta.id = id.clone();
        meta.size = bytes.len() as u64;
        self.save(&meta)?;
        Ok(id)
    }

    /// Object id stored for an exact virtual path, if any. Synthesized
    /// routes (`/tools/...`, `/commands/...`) are handled a level up by the
    /// VFS resolver.
    pub fn resolve_path(&self, path: &str) -> Option<String> {
        self.paths.read().ok()?.get(path).cloned()
    }

    /// Best-effort access bump; read paths never fail because of it.
    pub fn touch_accessed(&self, id: &str) {
        if let Ok(mut meta) = self.load(id) {
            meta.accessed = chrono::Utc::now();
            meta.usage_count += 1;
            if let Err(e) = self.save(&meta) {
                log::debug!("Access bump for '{}' failed: {}", id, e);
            }
        }
    }

    /// Every metadata record. Local scale keeps a full scan affordable.
    pub fn load_all(&self) -> Result<Vec<ObjectMetadata>> {
        let mut records = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| DaemonError::Io(format!("Failed to read metadata dir: {}", e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(data) = fs::read_to_string(&path) {
                if let Ok(meta) = serde_json::from_str::<ObjectMetadata>(&data) {
                    records.push(meta);
                }
            }
        }
        Ok(records)
    }

    /// All virtual paths currently mapped, for composing directory views.
    pub fn all_paths(&self) -> Vec<(String, String)> {
        self.paths
            .read()
            .map(|map| map.iter().map(|(p, id)| (p.clone(), id.clone())).collect())
            .unwrap_or_default()
    }

    /// Drop one path from an object's record; flips lifecycle to deprecated
    /// when the last path goes.
    pub fn remove_path(&self, virtual_path: &str) -> Result<String> {
        let id = self.resolve_path(virtual_path).ok_or_else(|| {
            DaemonError::NotFound(format!("Path '{}' is not mapped", virtual_path))
        })?;
        let mut meta = self.load(&id)?;
        meta.remove_path(virtual_path);
        meta.modified = chrono::Utc::now();
        self.save(&meta)?;
        Ok(id)
    }

    pub fn objects(&self) -> &Arc<ObjectStore> {
        &self.objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Lifecycle;
    use tempfile::TempDir;

    fn index_in(dir: &TempDir) -> MetadataIndex {
        let objects = Arc::new(ObjectStore::new(dir.path().join("objects")).unwrap());
        MetadataIndex::new(dir.path().join("metadata"), objects).unwrap()
    }

    #[test]
    fn test_store_with_metadata_and_resolve() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        let mut meta = ObjectMetadata::new("", "document");
        meta.add_path("/by-type/document/notes");
        let id = index.store_with_metadata(b"some notes", meta).unwrap();

        assert_eq!(
            index.resolve_path("/by-type/document/notes").as_deref(),
            Some(id.as_str())
        );
        let loaded = index.load(&id).unwrap();
        assert_eq!(loaded.size, 10);
        assert_eq!(loaded.object_type, "document");
    }

    #[test]
    fn test_path_index_survives_restart() {
        let dir = TempDir::new().unwrap();
        let objects = Arc::new(ObjectStore::new(dir.path().join("objects")).unwrap());
        {
            let index =
                MetadataIndex::new(dir.path().join("metadata"), Arc::clone(&objects)).unwrap();
            let mut meta = ObjectMetadata::new("", "artifact");
            meta.add_path("/artifacts/report");
            index.store_with_metadata(b"report body", meta).unwrap();
        }
        let reopened = MetadataIndex::new(dir.path().join("metadata"), objects).unwrap();
        assert!(reopened.resolve_path("/artifacts/report").is_some());
    }

    #[test]
    fn test_remove_last_path_deprecates() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        let mut meta = ObjectMetadata::new("", "artifact");
        meta.add_path("/artifacts/tmp");
        let id = index.store_with_metadata(b"x", meta).unwrap();

        index.remove_path("/artifacts/tmp").unwrap();
        assert!(index.resolve_path("/artifacts/tmp").is_none());
        assert_eq!(index.load(&id).unwrap().lifecycle, Lifecycle::Deprecated);
    }

    #[test]
    fn test_modified_never_precedes_created() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        let mut meta = ObjectMetadata::new("", "document");
        meta.modified = meta.created - chrono::Duration::hours(1);
        let id = index.store_with_metadata(b"clock skew", meta).unwrap();
        let loaded = index.load(&id).unwrap();
        assert!(loaded.modified >= loaded.created);
    }

    #[test]
    fn test_touch_accessed_bumps_usage() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        let meta = ObjectMetadata::new("", "document");
        let id = index.store_with_metadata(b"counted", meta).unwrap();
        index.touch_accessed(&id);
        index.touch_accessed(&id);
        assert_eq!(index.load(&id).unwrap().usage_count, 2);
    }
}

//! Relation persistence: one JSON file per relation under `relations/`.

use crate::core::{DaemonError, Relation, RelationType, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct RelationStore {
    dir: PathBuf,
}

impl RelationStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create relations dir: {}", e)))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Atomic replace. Updates preserve `created_at` and bump `updated_at`.
    pub fn save(&self, relation: &Relation) -> Result<()> {
        let mut relation = relation.clone();
        if let Ok(existing) = self.load(&relation.id) {
            relation.created_at = existing.created_at;
        }
        relation.touch();

        let json = serde_json::to_vec_pretty(&relation)
            .map_err(|e| DaemonError::Serialization(format!("Failed to serialize relation: {}", e)))?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create temp relation file: {}", e)))?;
        temp.write_all(&json)
            .map_err(|e| DaemonError::Io(format!("Failed to write relation: {}", e)))?;
        temp.persist(self.path_for(&relation.id))
            .map_err(|e| DaemonError::Io(format!("Failed to persist relation: {}", e)))?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Relation> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(DaemonError::NotFound(format!("Relation '{}' not found", id)));
        }
        let data = fs::read_to_string(&path)
            .map_err(|e| DaemonError::Io(format!("Failed to read relation '{}': {}", id, e)))?;
        serde_json::from_str(&data)
            .map_err(|e| DaemonError::Serialization(format!("Corrupt relation '{}': {}", id, e)))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).exists()
    }

    /// All relations, unreadable files skipped with a log line.
    pub fn list(&self) -> Result<Vec<Relation>> {
        let mut relations = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| DaemonError::Io(format!("Failed to read relations dir: {}", e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|data| serde_json::from_str::<Relation>(&data).map_err(|e| e.to_string()))
            {
                Ok(relation) => relations.push(relation),
                Err(e) => log::warn!("Skipping unreadable relation {:?}: {}", path, e),
            }
        }
        Ok(relations)
    }

    pub fn load_by_type(&self, kind: RelationType) -> Result<Vec<Relation>> {
        Ok(self.list()?.into_iter().filter(|r| r.kind == kind).collect())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(DaemonError::NotFound(format!("Relation '{}' not found", id)));
        }
        fs::remove_file(&path)
            .map_err(|e| DaemonError::Io(format!("Failed to delete relation '{}': {}", id, e)))
    }

    /// Newest Tool relation carrying the given name. Re-declares of the same
    /// name create fresh relations; the newest one shadows the rest.
    pub fn latest_tool(&self, name: &str) -> Result<Option<Relation>> {
        let mut tools: Vec<Relation> = self
            .load_by_type(RelationType::Tool)?
            .into_iter()
            .filter(|r| r.name() == Some(name))
            .collect();
        tools.sort_by_key(|r| r.created_at);
        Ok(tools.pop())
    }

    /// Case-insensitive substring match against relation ids, used by the
    /// tool reference resolver.
    pub fn find_by_id_substring(&self, needle: &str) -> Result<Vec<Relation>> {
        let needle = needle.to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.id.to_lowercase().contains(&needle))
            .collect())
    }
}

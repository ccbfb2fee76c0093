//! Content-addressed blob store.
//!
//! Objects are keyed by the hex SHA-256 of their content and laid out as
//! `<root>/aa/bb/<rest>` so no single directory grows past filesystem
//! comfort. Writes are idempotent: identical content maps to exactly one
//! on-disk file.

use crate::core::{DaemonError, Result};
use crate::storage::relations::RelationStore;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reserved id prefix: `relation:<relation-id>` reads materialize the
/// relation's JSON instead of a stored blob.
pub const RELATION_ID_PREFIX: &str = "relation:";

pub struct ObjectStore {
    root: PathBuf,
    relations: Option<Arc<RelationStore>>,
}

impl ObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| DaemonError::Io(format!("Failed to create object store root: {}", e)))?;
        Ok(Self {
            root,
            relations: None,
        })
    }

    /// Wire the relation store so `relation:<id>` reads can be served.
    pub fn with_relations<P: AsRef<Path>>(root: P, relations: Arc<RelationStore>) -> Result<Self> {
        let mut store = Self::new(root)?;
        store.relations = Some(relations);
        Ok(store)
    }

    /// Store bytes, returning the hex SHA-256 id. Idempotent: existing
    /// content short-circuits without a second write.
    pub fn store(&self, bytes: &[u8]) -> Result<String> {
        let id = hash_bytes(bytes);
        let path = self.shard_path(&id);
        if path.exists() {
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DaemonError::Io(format!("Failed to create object shard: {}", e)))?;
        }
        let mut temp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| DaemonError::Io(format!("Failed to create temp object: {}", e)))?;
        temp.write_all(bytes)
            .map_err(|e| DaemonError::Io(format!("Failed to write object: {}", e)))?;
        temp.persist(&path)
            .map_err(|e| DaemonError::Io(format!("Failed to persist object: {}", e)))?;
        Ok(id)
    }

    /// Read an object's bytes. The `relation:` virtual form serializes the
    /// named relation instead.
    pub fn read(&self, id: &str) -> Result<Vec<u8>> {
        if let Some(relation_id) = id.strip_prefix(RELATION_ID_PREFIX) {
            let relations = self.relations.as_ref().ok_or_else(|| {
                DaemonError::Internal("Relation store not wired into object store".to_string())
            })?;
            let relation = relations.load(relation_id)?;
            let json = serde_json::to_vec_pretty(&relation)
                .map_err(|e| DaemonError::Serialization(format!("Failed to serialize relation: {}", e)))?;
            return Ok(json);
        }

        let path = self.path_of(id)?;
        if !path.exists() {
            return Err(DaemonError::NotFound(format!("Object '{}' not found", id)));
        }
        fs::read(&path).map_err(|e| DaemonError::Io(format!("Failed to read object '{}': {}", id, e)))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.shard_path(id).exists()
    }

    /// Deterministic on-disk location: `<root>/aa/bb/<rest>`.
    pub fn path_of(&self, id: &str) -> Result<PathBuf> {
        if id.len() < 4 {
            return Err(DaemonError::Validation(format!(
                "Object id '{}' is too short: ids need at least 4 characters for sharding.\nSuggestion: pass the full hex id returned by store.\nExample: read_path {{\"path\": \"/commands/my-tool\"}}",
                id
            )));
        }
        Ok(self.shard_path(id))
    }

    fn shard_path(&self, id: &str) -> PathBuf {
        if id.len() < 4 {
            return self.root.join(id);
        }
        self.root.join(&id[0..2]).join(&id[2..4]).join(&id[4..])
    }
}

/// Hex SHA-256 of arbitrary bytes; also used for URL cache keys.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

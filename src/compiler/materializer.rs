//! Materializer dispatch and the on-disk record of materialized entities.

use crate::core::{DaemonError, MaterializedEntity, Relation, Result};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A component that knows how to realize one relation type.
#[async_trait]
pub trait Materializer: Send + Sync {
    fn name(&self) -> &str;
    fn can_materialize(&self, relation: &Relation) -> bool;
    async fn materialize(&self, relation: &Relation) -> Result<MaterializedEntity>;
    /// Undo the physical presence; stored objects and metadata remain.
    fn dematerialize(&self, relation: &Relation) -> Result<()>;
}

/// First-match dispatch over registered materializers, plus persistence of
/// `materializations/<relation-id>.json` records.
pub struct MaterializationRegistry {
    materializers: Vec<Box<dyn Materializer>>,
    records_dir: PathBuf,
}

impl MaterializationRegistry {
    pub fn new<P: AsRef<Path>>(records_dir: P) -> Result<Self> {
        let records_dir = records_dir.as_ref().to_path_buf();
        fs::create_dir_all(&records_dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create materializations dir: {}", e)))?;
        Ok(Self {
            materializers: Vec::new(),
            records_dir,
        })
    }

    pub fn register(&mut self, materializer: Box<dyn Materializer>) {
        self.materializers.push(materializer);
    }

    pub fn find(&self, relation: &Relation) -> Option<&dyn Materializer> {
        self.materializers
            .iter()
            .find(|m| m.can_materialize(relation))
            .map(|m| m.as_ref())
    }

    fn record_path(&self, relation_id: &str) -> PathBuf {
        self.records_dir.join(format!("{}.json", relation_id))
    }

    pub fn record(&self, entity: &MaterializedEntity) -> Result<()> {
        let json = serde_json::to_vec_pretty(entity).map_err(|e| {
            DaemonError::Serialization(format!("Failed to serialize materialization: {}", e))
        })?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.records_dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create temp record: {}", e)))?;
        temp.write_all(&json)
            .map_err(|e| DaemonError::Io(format!("Failed to write record: {}", e)))?;
        temp.persist(self.record_path(&entity.relation_id))
            .map_err(|e| DaemonError::Io(format!("Failed to persist record: {}", e)))?;
        Ok(())
    }

    pub fn load_record(&self, relation_id: &str) -> Result<MaterializedEntity> {
        let path = self.record_path(relation_id);
        if !path.exists() {
            return Err(DaemonError::NotFound(format!(
                "No materialization record for '{}'",
                relation_id
            )));
        }
        let data = fs::read_to_string(&path)
            .map_err(|e| DaemonError::Io(format!("Failed to read record: {}", e)))?;
        serde_json::from_str(&data).map_err(|e| {
            DaemonError::Serialization(format!("Corrupt record '{}': {}", relation_id, e))
        })
    }

    pub fn remove_record(&self, relation_id: &str) -> Result<()> {
        let path = self.record_path(relation_id);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| DaemonError::Io(format!("Failed to remove record: {}", e)))?;
        }
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        fs::read_dir(&self.records_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                    .count()
            })
            .unwrap_or(0)
    }
}

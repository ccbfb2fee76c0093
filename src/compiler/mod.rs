//! The reality compiler: declared relations become materialized entities.

pub mod materializer;
pub mod rules;
pub mod tool;

pub use materializer::{MaterializationRegistry, Materializer};
pub use rules::{Rule, RuleEngine};
pub use tool::ToolMaterializer;

use crate::core::{DaemonError, MaterializedEntity, Relation, RelationType, Result};
use crate::similarity::SimilarityEngine;
use crate::storage::RelationStore;
use async_recursion::async_recursion;
use std::sync::Arc;
use std::time::Duration;

/// Delay before the fire-and-forget similarity pass runs.
const SIMILARITY_DELAY: Duration = Duration::from_millis(100);

pub struct RealityCompiler {
    relations: Arc<RelationStore>,
    registry: MaterializationRegistry,
    rules: RuleEngine,
    similarity: Arc<SimilarityEngine>,
}

impl RealityCompiler {
    pub fn new(
        relations: Arc<RelationStore>,
        registry: MaterializationRegistry,
        rules: RuleEngine,
        similarity: Arc<SimilarityEngine>,
    ) -> Self {
        Self {
            relations,
            registry,
            rules,
            similarity,
        }
    }

    /// Declare a relation: persist it, materialize it (unless data-only),
    /// then let the rule engine and the similarity pass react.
    ///
    /// Ordering: the relation is on disk before the materializer runs; the
    /// materializer's relation update is re-read before the rule engine sees
    /// it; rule failures never fail the declare.
    #[async_recursion]
    pub async fn declare_relation(&self, relation: Relation) -> Result<MaterializedEntity> {
        let mut relation = relation;
        relation.touch();
        self.relations.save(&relation)?;
        log::info!("Declared relation {} ({})", relation.id, relation.kind.as_str());

        if relation.kind.is_data_only() {
            let entity = MaterializedEntity::virtual_entity(&relation.id);
            let stored = self.relations.load(&relation.id)?;
            self.rules.process_relation(&stored, self).await;
            return Ok(entity);
        }

        let materializer = self.registry.find(&relation).ok_or_else(|| {
            DaemonError::Internal(format!(
                "No materializer registered for relation type {}",
                relation.kind.as_str()
            ))
        })?;
        let entity = materializer.materialize(&relation).await?;
        self.registry.record(&entity)?;

        // Rules observe the refreshed relation, executable_id included.
        let stored = self.relations.load(&relation.id)?;
        self.rules.process_relation(&stored, self).await;

        if stored.kind == RelationType::Tool {
            self.spawn_similarity(stored);
        }
        Ok(entity)
    }

    /// Delete a relation, attempting dematerialization first.
    pub fn delete_relation(&self, id: &str) -> Result<()> {
        let relation = self.relations.load(id)?;
        if let Some(materializer) = self.registry.find(&relation) {
            if let Err(e) = materializer.dematerialize(&relation) {
                log::warn!("Dematerialize of {} failed: {}", id, e);
            }
        }
        self.registry.remove_record(id)?;
        self.relations.delete(id)?;
        log::info!("Deleted relation {}", id);
        Ok(())
    }

    pub fn registry(&self) -> &MaterializationRegistry {
        &self.registry
    }

    /// Similarity linking is eventually consistent: it runs in the
    /// background after a short delay and failures only log.
    fn spawn_similarity(&self, relation: Relation) {
        let similarity = Arc::clone(&self.similarity);
        tokio::spawn(async move {
            tokio::time::sleep(SIMILARITY_DELAY).await;
            match similarity.link_similar(&relation) {
                Ok(0) => {}
                Ok(n) => log::info!("Linked {} similar tool(s) to {}", n, relation.id),
                Err(e) => log::error!("Similarity pass for {} failed: {}", relation.id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockAIClient;
    use crate::storage::{MetadataIndex, ObjectStore};
    use tempfile::TempDir;

    fn compiler_in(dir: &TempDir) -> (RealityCompiler, Arc<RelationStore>) {
        let relations = Arc::new(RelationStore::new(dir.path().join("relations")).unwrap());
        let objects = Arc::new(
            ObjectStore::with_relations(dir.path().join("objects"), Arc::clone(&relations))
                .unwrap(),
        );
        let metadata =
            Arc::new(MetadataIndex::new(dir.path().join("metadata"), objects).unwrap());
        let ai = Arc::new(MockAIClient::new(MockAIClient::tool_response(
            "any", "bash", "echo ok",
        )));
        let mut registry =
            MaterializationRegistry::new(dir.path().join("materializations")).unwrap();
        registry.register(Box::new(ToolMaterializer::new(
            ai,
            Arc::clone(&metadata),
            Arc::clone(&relations),
            dir.path().join("commands"),
            dir.path().join("debug"),
        )));
        let similarity = Arc::new(SimilarityEngine::new(Arc::clone(&relations)));
        let compiler = RealityCompiler::new(
            Arc::clone(&relations),
            registry,
            RuleEngine::with_default_rules(),
            similarity,
        );
        (compiler, relations)
    }

    #[tokio::test]
    async fn test_declare_tool_materializes() {
        let dir = TempDir::new().unwrap();
        let (compiler, relations) = compiler_in(&dir);
        let relation = Relation::tool("declared", vec!["greet".to_string()]);
        let id = relation.id.clone();

        let entity = compiler.declare_relation(relation).await.unwrap();
        assert!(entity.physical_path.ends_with("/commands/declared"));

        let stored = relations.load(&id).unwrap();
        assert!(stored.properties.executable_id.is_some());
        assert!(compiler.registry().load_record(&id).is_ok());
    }

    #[tokio::test]
    async fn test_declare_data_only_is_virtual() {
        let dir = TempDir::new().unwrap();
        let (compiler, relations) = compiler_in(&dir);
        let mut artifact = Relation::new("artifact-notes-1", RelationType::Artifact);
        artifact.properties.name = Some("notes".to_string());

        let entity = compiler.declare_relation(artifact).await.unwrap();
        assert!(entity.physical_path.is_empty());
        assert!(relations.load("artifact-notes-1").is_ok());
        // Virtual entities leave no materialization record.
        assert!(compiler.registry().load_record("artifact-notes-1").is_err());
    }

    #[tokio::test]
    async fn test_rule_spawns_dependency_artifact() {
        let dir = TempDir::new().unwrap();
        let (compiler, relations) = compiler_in(&dir);
        let mut relation = Relation::tool("needs-jq", vec![]);
        relation
            .properties
            .extra
            .insert("dependencies".to_string(), serde_json::json!(["jq"]));

        compiler.declare_relation(relation).await.unwrap();

        let artifacts = relations.load_by_type(RelationType::Artifact).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].properties.spawned_by.is_some());
    }

    #[tokio::test]
    async fn test_delete_relation_cascades() {
        let dir = TempDir::new().unwrap();
        let (compiler, relations) = compiler_in(&dir);
        let relation = Relation::tool("doomed", vec![]);
        let id = relation.id.clone();
        compiler.declare_relation(relation).await.unwrap();

        compiler.delete_relation(&id).unwrap();
        assert!(relations.load(&id).is_err());
        assert!(compiler.registry().load_record(&id).is_err());
        assert!(!dir.path().join("commands/doomed").exists());
    }
}

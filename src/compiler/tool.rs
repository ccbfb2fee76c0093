//! Tool materializer: relation → prompt → LLM → parsed definition →
//! executable object, metadata, commands symlink.

use crate::ai::{AIClient, AIMessage};
use crate::compiler::materializer::Materializer;
use crate::core::{
    DaemonError, MaterializationStatus, MaterializedEntity, ObjectMetadata, Relation,
    RelationType, Result,
};
use crate::storage::{MetadataIndex, RelationStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

const ENGINEER_PERSONA: &str = "You are a pragmatic software engineer. You write small, dependable \
command-line tools. Respond with a single fenced ```json block containing the fields name, \
description, language (one of bash, python, node), implementation and tags. The implementation \
must be the complete script body without a shebang.";

const SUPPORTED_LANGUAGES: &[&str] = &["bash", "python", "node"];

/// Parsed fenced-json tool definition from the model response.
#[derive(Debug, Deserialize)]
struct ToolSpec {
    name: String,
    #[serde(default)]
    description: String,
    language: String,
    implementation: String,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct ToolMaterializer {
    ai: Arc<dyn AIClient>,
    metadata: Arc<MetadataIndex>,
    relations: Arc<RelationStore>,
    commands_dir: PathBuf,
    debug_dir: PathBuf,
}

impl ToolMaterializer {
    pub fn new(
        ai: Arc<dyn AIClient>,
        metadata: Arc<MetadataIndex>,
        relations: Arc<RelationStore>,
        commands_dir: PathBuf,
        debug_dir: PathBuf,
    ) -> Self {
        Self {
            ai,
            metadata,
            relations,
            commands_dir,
            debug_dir,
        }
    }

    fn build_prompt(&self, relation: &Relation, name: &str) -> String {
        let mut prompt = format!("Create a command-line tool named '{}'.\n", name);
        if !relation.properties.transforms.is_empty() {
            prompt.push_str(&format!(
                "Its capabilities (transforms): {}.\n",
                relation.properties.transforms.join(", ")
            ));
        }
        if let Some(context) = &relation.properties.resolved_context {
            if !context.is_empty() {
                prompt.push_str("\nContext gathered from references:\n");
                prompt.push_str(context);
                prompt.push('\n');
            }
        }
        if let Some(user_prompt) = &relation.properties.user_prompt {
            prompt.push_str(&format!("\nUser intent: {}\n", user_prompt));
        }
        prompt.push_str(
            "\nReply with one fenced ```json block: {\"name\", \"description\", \"language\", \
             \"implementation\", \"tags\"}.",
        );
        prompt
    }

    fn parse_response(&self, relation: &Relation, response: &str) -> Result<ToolSpec> {
        match extract_fenced_json(response) {
            Some(block) => serde_json::from_str::<ToolSpec>(block).map_err(|e| {
                self.dump_failed_response(relation, response);
                DaemonError::Materialization(format!(
                    "Tool definition JSON did not parse: {}",
                    e
                ))
            }),
            None => {
                self.dump_failed_response(relation, response);
                Err(DaemonError::Materialization(
                    "Response contained no fenced json block".to_string(),
                ))
            }
        }
    }

    /// Raw response is kept for postmortems when parsing fails.
    fn dump_failed_response(&self, relation: &Relation, response: &str) {
        let short_id: String = relation.id.chars().take(8).collect();
        let path = self.debug_dir.join(format!(
            "failed_response_{}_{}.txt",
            Utc::now().timestamp(),
            short_id
        ));
        if std::fs::create_dir_all(&self.debug_dir).is_ok() {
            if let Err(e) = std::fs::write(&path, response) {
                log::warn!("Could not write debug dump {:?}: {}", path, e);
            } else {
                log::info!("Wrote failed response dump to {:?}", path);
            }
        }
    }

    fn executable_bytes(language: &str, implementation: &str) -> Vec<u8> {
        let shebang = match language {
            "bash" => "#!/bin/bash",
            "node" => "#!/usr/bin/env node",
            _ => "#!/usr/bin/env python3",
        };
        let body = implementation
            .strip_prefix("#!")
            .map(|rest| rest.split_once('\n').map(|(_, tail)| tail).unwrap_or(""))
            .unwrap_or(implementation);
        format!("{}\n{}", shebang, body.trim_start_matches('\n')).into_bytes()
    }
}

#[async_trait]
impl Materializer for ToolMaterializer {
    fn name(&self) -> &str {
        "tool"
    }

    fn can_materialize(&self, relation: &Relation) -> bool {
        relation.kind == RelationType::Tool
    }

    async fn materialize(&self, relation: &Relation) -> Result<MaterializedEntity> {
        let name = relation
            .name()
            .ok_or_else(|| {
                DaemonError::Materialization(
                    "Tool relation has no 'name' property".to_string(),
                )
            })?
            .to_string();

        let prompt = self.build_prompt(relation, &name);
        let agent = relation
            .properties
            .agent
            .clone()
            .unwrap_or_else(|| "@ai-engineer".to_string());
        let response = self
            .ai
            .send_without_tools(&[AIMessage::user(prompt)], ENGINEER_PERSONA, &agent)
            .await?;

        let spec = self.parse_response(relation, &response)?;
        if spec.name != name {
            log::debug!(
                "Model named the tool '{}'; keeping the declared name '{}'",
                spec.name,
                name
            );
        }
        let language = if SUPPORTED_LANGUAGES.contains(&spec.language.as_str()) {
            spec.language.clone()
        } else {
            log::warn!(
                "Unsupported language '{}' for tool '{}', falling back to python",
                spec.language,
                name
            );
            "python".to_string()
        };

        let bytes = Self::executable_bytes(&language, &spec.implementation);

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let mut meta = ObjectMetadata::new("", "command");
        meta.subtype = Some(language.clone());
        meta.title = Some(name.clone());
        meta.description = (!spec.description.is_empty()).then(|| spec.description.clone());
        meta.agent = relation.properties.agent.clone();
        meta.session = relation.properties.memory_session.clone();
        meta.add_path(format!("/commands/{}", name));
        meta.add_path(format!("/by-date/{}/{}", date, name));
        meta.add_path(format!("/by-type/command/{}", name));
        if let Some(session) = &relation.properties.memory_session {
            meta.add_path(format!("/memory/{}/generated/{}", session, name));
        }
        meta.tags.push(language.clone());
        for transform in &relation.properties.transforms {
            let tag = transform.trim().to_lowercase();
            if !tag.is_empty() && !meta.tags.contains(&tag) {
                meta.tags.push(tag);
            }
        }
        for tag in &spec.tags {
            if !meta.tags.contains(tag) {
                meta.tags.push(tag.clone());
            }
        }
        let executable_id = self.metadata.store_with_metadata(&bytes, meta)?;

        // The symlink is an index into the object store, regenerable at any
        // time; the object remains the source of truth.
        let object_path = self.metadata.objects().path_of(&executable_id)?;
        let mut perms = std::fs::metadata(&object_path)
            .map_err(|e| DaemonError::Io(format!("Failed to stat executable object: {}", e)))?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&object_path, perms)
            .map_err(|e| DaemonError::Io(format!("Failed to chmod executable: {}", e)))?;

        std::fs::create_dir_all(&self.commands_dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create commands dir: {}", e)))?;
        let link = self.commands_dir.join(&name);
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)
                .map_err(|e| DaemonError::Io(format!("Failed to replace symlink: {}", e)))?;
        }
        std::os::unix::fs::symlink(&object_path, &link)
            .map_err(|e| DaemonError::Io(format!("Failed to create command symlink: {}", e)))?;

        let mut updated = self.relations.load(&relation.id)?;
        updated.properties.executable_id = Some(executable_id.clone());
        updated.properties.extra.remove("executable");
        self.relations.save(&updated)?;

        log::info!(
            "Materialized tool '{}' ({}) -> {}",
            name,
            language,
            link.display()
        );

        let mut entity_meta = std::collections::HashMap::new();
        entity_meta.insert("language".to_string(), json!(language));
        entity_meta.insert("executable".to_string(), json!(true));
        entity_meta.insert(
            "transforms".to_string(),
            json!(relation.properties.transforms.clone()),
        );
        Ok(MaterializedEntity {
            relation_id: relation.id.clone(),
            physical_path: link.to_string_lossy().into_owned(),
            metadata: entity_meta,
            status: MaterializationStatus::Success,
            created_at: Utc::now(),
        })
    }

    fn dematerialize(&self, relation: &Relation) -> Result<()> {
        let Some(name) = relation.name() else {
            return Ok(());
        };
        let link = self.commands_dir.join(name);
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)
                .map_err(|e| DaemonError::Io(format!("Failed to remove symlink: {}", e)))?;
            log::info!("Removed command symlink for '{}'", name);
        }
        Ok(())
    }
}

/// First fenced ```json block of a response, without the fence markers.
fn extract_fenced_json(response: &str) -> Option<&str> {
    let start = response.find("```json")? + "```json".len();
    let rest = &response[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockAIClient;
    use tempfile::TempDir;

    fn materializer_in(dir: &TempDir, ai: Arc<dyn AIClient>) -> (ToolMaterializer, Arc<RelationStore>) {
        let relations = Arc::new(RelationStore::new(dir.path().join("relations")).unwrap());
        let objects = Arc::new(
            crate::storage::ObjectStore::new(dir.path().join("objects")).unwrap(),
        );
        let metadata =
            Arc::new(MetadataIndex::new(dir.path().join("metadata"), objects).unwrap());
        let materializer = ToolMaterializer::new(
            ai,
            metadata,
            Arc::clone(&relations),
            dir.path().join("commands"),
            dir.path().join("debug"),
        );
        (materializer, relations)
    }

    #[test]
    fn test_extract_fenced_json() {
        let response = "noise\n```json\n{\"a\": 1}\n```\ntrailer";
        assert_eq!(extract_fenced_json(response), Some("{\"a\": 1}"));
        assert!(extract_fenced_json("no fence here").is_none());
    }

    #[test]
    fn test_executable_bytes_shebang_normalization() {
        let bytes = ToolMaterializer::executable_bytes("bash", "#!/usr/bin/sh\necho hi");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("#!/bin/bash\n"));
        assert!(text.contains("echo hi"));
        assert_eq!(text.matches("#!").count(), 1);
    }

    #[tokio::test]
    async fn test_materialize_writes_object_symlink_and_relation() {
        let dir = TempDir::new().unwrap();
        let ai = Arc::new(MockAIClient::new(MockAIClient::tool_response(
            "hello-world",
            "bash",
            "echo hello",
        )));
        let (materializer, relations) = materializer_in(&dir, ai);

        let relation = Relation::tool("hello-world", vec!["greet".to_string()]);
        relations.save(&relation).unwrap();

        let entity = materializer.materialize(&relation).await.unwrap();
        assert_eq!(entity.status, MaterializationStatus::Success);
        assert!(entity.physical_path.ends_with("/commands/hello-world"));

        let link = dir.path().join("commands/hello-world");
        let content = std::fs::read_to_string(&link).unwrap();
        assert!(content.starts_with("#!/bin/bash"));

        let updated = relations.load(&relation.id).unwrap();
        let executable_id = updated.properties.executable_id.unwrap();
        let target = std::fs::read_link(&link).unwrap();
        assert!(target.to_string_lossy().contains(&executable_id[4..]));

        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[tokio::test]
    async fn test_unparseable_response_dumps_debug() {
        let dir = TempDir::new().unwrap();
        let ai = Arc::new(MockAIClient::new("sorry, no json today"));
        let (materializer, relations) = materializer_in(&dir, ai);
        let relation = Relation::tool("broken", vec![]);
        relations.save(&relation).unwrap();

        let err = materializer.materialize(&relation).await.unwrap_err();
        assert!(matches!(err, DaemonError::Materialization(_)));

        let dumps: Vec<_> = std::fs::read_dir(dir.path().join("debug"))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0]
            .file_name()
            .to_string_lossy()
            .starts_with("failed_response_"));
    }

    #[tokio::test]
    async fn test_unknown_language_falls_back_to_python() {
        let dir = TempDir::new().unwrap();
        let ai = Arc::new(MockAIClient::new(MockAIClient::tool_response(
            "rusty", "rust", "print('hi')",
        )));
        let (materializer, relations) = materializer_in(&dir, ai);
        let relation = Relation::tool("rusty", vec![]);
        relations.save(&relation).unwrap();

        materializer.materialize(&relation).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("commands/rusty")).unwrap();
        assert!(content.starts_with("#!/usr/bin/env python3"));
    }

    #[tokio::test]
    async fn test_missing_name_is_materialization_error() {
        let dir = TempDir::new().unwrap();
        let ai = Arc::new(MockAIClient::new("unused"));
        let (materializer, _) = materializer_in(&dir, ai);
        let relation = Relation::new("tool-anon-1", RelationType::Tool);
        assert!(matches!(
            materializer.materialize(&relation).await,
            Err(DaemonError::Materialization(_))
        ));
    }

    #[tokio::test]
    async fn test_dematerialize_removes_symlink_keeps_object() {
        let dir = TempDir::new().unwrap();
        let ai = Arc::new(MockAIClient::new(MockAIClient::tool_response(
            "gone", "bash", "echo bye",
        )));
        let (materializer, relations) = materializer_in(&dir, ai);
        let relation = Relation::tool("gone", vec![]);
        relations.save(&relation).unwrap();
        materializer.materialize(&relation).await.unwrap();

        let link = dir.path().join("commands/gone");
        let target = std::fs::read_link(&link).unwrap();
        materializer.dematerialize(&relation).unwrap();
        assert!(!link.exists());
        assert!(target.exists());
    }
}

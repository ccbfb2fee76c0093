//! Virtual filesystem: the union view over the object store, metadata index,
//! relation store and session index, addressable by human-meaningful paths.

pub mod search;

pub use search::{SearchMode, SearchResult};

use crate::core::{DaemonError, RelationType, Result};
use crate::storage::{MetadataIndex, RELATION_ID_PREFIX, RelationStore, SessionIndex};
use crate::similarity::SimilarityEngine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Roots synthesized at `/`.
pub const ROOTS: &[&str] = &[
    "tools", "commands", "memory", "artifacts", "by-date", "by-agent", "by-type", "similar",
];

/// Organizational subdirectories of `/tools/`.
const TOOL_ORG_DIRS: &[&str] = &["by-name", "by-transform", "spawned-by", "ancestry"];

#[derive(Debug, Clone, Serialize)]
pub struct VfsEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VfsEntry {
    fn dir(name: &str, parent: &str) -> Self {
        Self {
            name: name.to_string(),
            path: join_virtual(parent, name),
            entry_type: "directory",
            size: None,
            created: None,
            object_id: None,
            relation_id: None,
            description: None,
        }
    }

    fn file(name: &str, parent: &str) -> Self {
        Self {
            name: name.to_string(),
            path: join_virtual(parent, name),
            entry_type: "file",
            size: None,
            created: None,
            object_id: None,
            relation_id: None,
            description: None,
        }
    }
}

fn join_virtual(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

pub struct VirtualFs {
    metadata: Arc<MetadataIndex>,
    relations: Arc<RelationStore>,
    sessions: Arc<SessionIndex>,
    similarity: Arc<SimilarityEngine>,
    commands_dir: PathBuf,
}

impl VirtualFs {
    pub fn new(
        metadata: Arc<MetadataIndex>,
        relations: Arc<RelationStore>,
        sessions: Arc<SessionIndex>,
        similarity: Arc<SimilarityEngine>,
        commands_dir: PathBuf,
    ) -> Self {
        Self {
            metadata,
            relations,
            sessions,
            similarity,
            commands_dir,
        }
    }

    // ========================================================================
    // Path resolution
    // ========================================================================

    /// Resolve a virtual path to an object id (or a `relation:<id>` virtual
    /// id). Relation-backed routes are synthesized here, never stored as
    /// metadata paths.
    pub fn resolve_path(&self, path: &str) -> Result<String> {
        let path = normalize_path(path);
        let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["tools", name] | ["tools", name, "definition"] => {
                let relation = self.relations.latest_tool(name)?.ok_or_else(|| {
                    DaemonError::NotFound(format!("Tool '{}' not found", name))
                })?;
                Ok(format!("{}{}", RELATION_ID_PREFIX, relation.id))
            }
            ["tools", name, "executable"] => {
                let relation = self.relations.latest_tool(name)?.ok_or_else(|| {
                    DaemonError::NotFound(format!("Tool '{}' not found", name))
                })?;
                relation.properties.executable_id.ok_or_else(|| {
                    DaemonError::NotFound(format!("Tool '{}' has not been materialized", name))
                })
            }
            ["commands", name] => self.resolve_command(name),
            ["memory", id] | ["memory", "sessions", id] => {
                let entry = self.sessions.get_reference(id)?.ok_or_else(|| {
                    DaemonError::NotFound(format!("Session '{}' not found", id))
                })?;
                Ok(entry.object_id)
            }
            _ => self.metadata.resolve_path(&path).ok_or_else(|| {
                DaemonError::NotFound(format!("Path '{}' does not resolve", path))
            }),
        }
    }

    /// Follow the commands symlink back to its object id; falls back to the
    /// relation's `executable_id` when the symlink is gone (it is an index,
    /// not the source of truth).
    fn resolve_command(&self, name: &str) -> Result<String> {
        let link = self.commands_dir.join(name);
        if let Ok(target) = std::fs::read_link(&link) {
            if let Some(id) = object_id_from_path(&target) {
                return Ok(id);
            }
        }
        let relation = self
            .relations
            .latest_tool(name)?
            .ok_or_else(|| DaemonError::NotFound(format!("Command '{}' not found", name)))?;
        relation
            .properties
            .executable_id
            .ok_or_else(|| DaemonError::NotFound(format!("Command '{}' has no executable", name)))
    }

    /// Read the bytes behind a virtual path, bumping access metadata
    /// best-effort.
    pub fn read_path(&self, path: &str) -> Result<Vec<u8>> {
        let id = self.resolve_path(path)?;
        let bytes = self.metadata.objects().read(&id)?;
        if !id.starts_with(RELATION_ID_PREFIX) {
            self.metadata.touch_accessed(&id);
        }
        Ok(bytes)
    }

    // ========================================================================
    // Directory views
    // ========================================================================

    pub fn list_path(&self, path: &str) -> Result<Vec<VfsEntry>> {
        let path = normalize_path(path);
        let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Ok(ROOTS.iter().map(|r| VfsEntry::dir(r, "/")).collect()),
            ["tools"] => self.list_tools_root(),
            ["tools", "by-name"] => self.list_tool_names("/tools/by-name"),
            ["tools", "by-transform"] => self.list_transform_dirs(),
            ["tools", "by-transform", transform] => self.list_tools_with_transform(transform),
            ["tools", "spawned-by"] => self.list_spawner_dirs(),
            ["tools", "spawned-by", spawner] => self.list_tools_spawned_by(spawner),
            ["tools", "ancestry"] => self.list_tool_ancestry_root(),
            ["tools", "ancestry", name] => self.list_tool_ancestry(name),
            ["tools", name] => self.list_tool_dir(name),
            ["commands"] => self.list_commands(),
            ["memory"] => self.list_memory_root(),
            ["memory", "sessions"] => self.list_memory_sessions("/memory/sessions"),
            ["memory", id, "generated"] => self.list_generated(id),
            ["similar"] => self.list_similar_root(),
            ["similar", name] => self.list_similar(name),
            ["by-date"] => self.list_intermediate(&path),
            ["by-date", date] => self.list_by_date(date),
            // Roots may be empty without being an error.
            ["artifacts"] | ["by-agent"] | ["by-type"] => self.list_from_metadata_paths(&path),
            _ => {
                let entries = self.list_from_metadata_paths(&path)?;
                if entries.is_empty() && self.metadata.resolve_path(&path).is_none() {
                    return Err(DaemonError::NotFound(format!(
                        "Path '{}' does not exist",
                        path
                    )));
                }
                Ok(entries)
            }
        }
    }

    fn latest_tools_by_name(&self) -> Result<BTreeMap<String, crate::core::Relation>> {
        let mut by_name: BTreeMap<String, crate::core::Relation> = BTreeMap::new();
        for relation in self.relations.load_by_type(RelationType::Tool)? {
            let Some(name) = relation.name().map(str::to_string) else {
                continue;
            };
            match by_name.get(&name) {
                Some(existing) if existing.created_at >= relation.created_at => {}
                _ => {
                    by_name.insert(name, relation);
                }
            }
        }
        Ok(by_name)
    }

    fn list_tools_root(&self) -> Result<Vec<VfsEntry>> {
        let mut entries: Vec<VfsEntry> = TOOL_ORG_DIRS
            .iter()
            .map(|d| VfsEntry::dir(d, "/tools"))
            .collect();
        for (name, relation) in self.latest_tools_by_name()? {
            let mut entry = VfsEntry::dir(&name, "/tools");
            entry.relation_id = Some(relation.id.clone());
            entry.created = Some(relation.created_at);
            entries.push(entry);
        }
        Ok(entries)
    }

    fn list_tool_dir(&self, name: &str) -> Result<Vec<VfsEntry>> {
        let relation = self
            .relations
            .latest_tool(name)?
            .ok_or_else(|| DaemonError::NotFound(format!("Tool '{}' not found", name)))?;
        let parent = format!("/tools/{}", name);
        let mut definition = VfsEntry::file("definition", &parent);
        definition.relation_id = Some(relation.id.clone());
        let mut entries = vec![definition];
        if let Some(executable_id) = &relation.properties.executable_id {
            let mut executable = VfsEntry::file("executable", &parent);
            executable.object_id = Some(executable_id.clone());
            if let Ok(meta) = self.metadata.load(executable_id) {
                executable.size = Some(meta.size);
                executable.created = Some(meta.created);
            }
            entries.push(executable);
        }
        Ok(entries)
    }

    fn list_tool_names(&self, parent: &str) -> Result<Vec<VfsEntry>> {
        Ok(self
            .latest_tools_by_name()?
            .into_iter()
            .map(|(name, relation)| {
                let mut entry = VfsEntry::dir(&name, parent);
                entry.relation_id = Some(relation.id);
                entry
            })
            .collect())
    }

    fn list_transform_dirs(&self) -> Result<Vec<VfsEntry>> {
        let mut transforms: Vec<String> = Vec::new();
        for relation in self.relations.load_by_type(RelationType::Tool)? {
            for transform in &relation.properties.transforms {
                let t = transform.trim().to_lowercase();
                if !t.is_empty() && !transforms.contains(&t) {
                    transforms.push(t);
                }
            }
        }
        transforms.sort();
        Ok(transforms
            .iter()
            .map(|t| VfsEntry::dir(t, "/tools/by-transform"))
            .collect())
    }

    fn list_tools_with_transform(&self, transform: &str) -> Result<Vec<VfsEntry>> {
        let wanted = transform.to_lowercase();
        let parent = format!("/tools/by-transform/{}", transform);
        Ok(self
            .latest_tools_by_name()?
            .into_iter()
            .filter(|(_, r)| {
                r.properties
                    .transforms
                    .iter()
                    .any(|t| t.trim().to_lowercase() == wanted)
            })
            .map(|(name, relation)| {
                let mut entry = VfsEntry::file(&name, &parent);
                entry.relation_id = Some(relation.id);
                entry
            })
            .collect())
    }

    fn list_spawner_dirs(&self) -> Result<Vec<VfsEntry>> {
        let mut spawners: Vec<String> = Vec::new();
        for relation in self.relations.load_by_type(RelationType::Tool)? {
            if let Some(spawner) = &relation.properties.spawned_by {
                if !spawners.contains(spawner) {
                    spawners.push(spawner.clone());
                }
            }
        }
        spawners.sort();
        Ok(spawners
            .iter()
            .map(|s| VfsEntry::dir(s, "/tools/spawned-by"))
            .collect())
    }

    fn list_tools_spawned_by(&self, spawner: &str) -> Result<Vec<VfsEntry>> {
        let parent = format!("/tools/spawned-by/{}", spawner);
        Ok(self
            .relations
            .load_by_type(RelationType::Tool)?
            .into_iter()
            .filter(|r| r.properties.spawned_by.as_deref() == Some(spawner))
            .filter_map(|r| {
                r.name().map(|name| {
                    let mut entry = VfsEntry::file(name, &parent);
                    entry.relation_id = Some(r.id.clone());
                    entry
                })
            })
            .collect())
    }

    fn list_tool_ancestry_root(&self) -> Result<Vec<VfsEntry>> {
        Ok(self
            .latest_tools_by_name()?
            .into_iter()
            .filter(|(_, r)| r.properties.parent.is_some() || r.properties.spawned_by.is_some())
            .map(|(name, _)| VfsEntry::dir(&name, "/tools/ancestry"))
            .collect())
    }

    /// Parent chain of a tool, nearest ancestor first.
    fn list_tool_ancestry(&self, name: &str) -> Result<Vec<VfsEntry>> {
        let parent_path = format!("/tools/ancestry/{}", name);
        let mut chain = Vec::new();
        let mut current = self
            .relations
            .latest_tool(name)?
            .ok_or_else(|| DaemonError::NotFound(format!("Tool '{}' not found", name)))?;
        // Bounded walk: cycles in parent links must not hang the listing.
        for _ in 0..16 {
            let Some(ancestor_id) = current
                .properties
                .parent
                .clone()
                .or_else(|| current.properties.spawned_by.clone())
            else {
                break;
            };
            let Ok(ancestor) = self.relations.load(&ancestor_id) else {
                break;
            };
            let label = ancestor.name().unwrap_or(ancestor.id.as_str());
            let mut entry = VfsEntry::file(label, &parent_path);
            entry.relation_id = Some(ancestor.id.clone());
            chain.push(entry);
            current = ancestor;
        }
        Ok(chain)
    }

    fn list_commands(&self) -> Result<Vec<VfsEntry>> {
        Ok(self
            .latest_tools_by_name()?
            .into_iter()
            .map(|(name, relation)| {
                let mut entry = VfsEntry::file(&name, "/commands");
                entry.relation_id = Some(relation.id.clone());
                entry.created = Some(relation.created_at);
                entry.description = relation
                    .properties
                    .extra
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                entry.object_id = relation.properties.executable_id.clone();
                entry
            })
            .collect())
    }

    fn list_memory_root(&self) -> Result<Vec<VfsEntry>> {
        let mut entries = vec![VfsEntry::dir("sessions", "/memory")];
        entries.extend(self.list_memory_sessions("/memory")?);
        Ok(entries)
    }

    fn list_memory_sessions(&self, parent: &str) -> Result<Vec<VfsEntry>> {
        Ok(self
            .sessions
            .list()?
            .into_iter()
            .map(|r| {
                let mut entry = VfsEntry::file(&r.session_id, parent);
                entry.object_id = Some(r.object_id);
                entry.created = Some(r.created_at);
                entry.description = Some(format!("{} ({} messages)", r.agent, r.message_count));
                entry
            })
            .collect())
    }

    /// Tools whose relations carry `memory_session = <id>`.
    fn list_generated(&self, session_id: &str) -> Result<Vec<VfsEntry>> {
        let parent = format!("/memory/{}/generated", session_id);
        Ok(self
            .relations
            .load_by_type(RelationType::Tool)?
            .into_iter()
            .filter(|r| r.properties.memory_session.as_deref() == Some(session_id))
            .filter_map(|r| {
                r.name().map(|name| {
                    let mut entry = VfsEntry::file(name, &parent);
                    entry.relation_id = Some(r.id.clone());
                    entry
                })
            })
            .collect())
    }

    fn list_similar_root(&self) -> Result<Vec<VfsEntry>> {
        Ok(self
            .similarity
            .tools_with_partners()?
            .iter()
            .map(|name| VfsEntry::dir(name, "/similar"))
            .collect())
    }

    fn list_similar(&self, name: &str) -> Result<Vec<VfsEntry>> {
        let parent = format!("/similar/{}", name);
        Ok(self
            .similarity
            .partners_of(name)?
            .into_iter()
            .filter_map(|partner| {
                partner.relation.name().map(|partner_name| {
                    let mut entry = VfsEntry::file(partner_name, &parent);
                    entry.relation_id = Some(partner.relation.id.clone());
                    entry.description = Some(format!(
                        "{:.0}% similar: {} [transforms: {}]",
                        partner.score * 100.0,
                        partner.reasons.join("; "),
                        partner.relation.properties.transforms.join(", ")
                    ));
                    entry
                })
            })
            .collect())
    }

    /// `/by-date/<date>/` merges metadata-indexed objects and relations
    /// created on that date; duplicates suppressed by name.
    fn list_by_date(&self, date: &str) -> Result<Vec<VfsEntry>> {
        let parent = format!("/by-date/{}", date);
        let mut entries = self.list_from_metadata_paths(&parent)?;

        for relation in self.relations.list()? {
            if relation.created_at.format("%Y-%m-%d").to_string() != date {
                continue;
            }
            let Some(name) = relation.name().map(str::to_string) else {
                continue;
            };
            if entries.iter().any(|e| e.name == name) {
                continue;
            }
            let mut entry = VfsEntry::file(&name, &parent);
            entry.relation_id = Some(relation.id.clone());
            entry.created = Some(relation.created_at);
            entries.push(entry);
        }
        Ok(entries)
    }

    fn list_intermediate(&self, path: &str) -> Result<Vec<VfsEntry>> {
        let mut entries = self.list_from_metadata_paths(path)?;
        if path == "/by-date" {
            // Relations contribute dates even when no object landed there.
            for relation in self.relations.list()? {
                let date = relation.created_at.format("%Y-%m-%d").to_string();
                if !entries.iter().any(|e| e.name == date) {
                    entries.push(VfsEntry::dir(&date, "/by-date"));
                }
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(entries)
    }

    /// Immediate children of `path` composed from stored metadata paths.
    fn list_from_metadata_paths(&self, path: &str) -> Result<Vec<VfsEntry>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut children: BTreeMap<String, VfsEntry> = BTreeMap::new();

        for (virtual_path, object_id) in self.metadata.all_paths() {
            let Some(rest) = virtual_path.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((dir, _)) => {
                    children
                        .entry(dir.to_string())
                        .or_insert_with(|| VfsEntry::dir(dir, path));
                }
                None => {
                    let mut entry = VfsEntry::file(rest, path);
                    entry.object_id = Some(object_id.clone());
                    if let Ok(meta) = self.metadata.load(&object_id) {
                        entry.size = Some(meta.size);
                        entry.created = Some(meta.created);
                        entry.description = meta.description.clone();
                    }
                    children.insert(rest.to_string(), entry);
                }
            }
        }
        Ok(children.into_values().collect())
    }

    // ========================================================================
    // Search
    // ========================================================================

    pub fn search(&self, query: &str, mode: SearchMode, limit: usize) -> Result<Vec<SearchResult>> {
        search::run_search(&self.metadata, &self.relations, query, mode, limit)
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    let mut normalized = String::from("/");
    normalized.push_str(trimmed.trim_matches('/'));
    normalized
}

/// Reconstruct an object id from a sharded store path `.../aa/bb/<rest>`.
fn object_id_from_path(path: &Path) -> Option<String> {
    let mut components: Vec<&str> = path
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if components.len() < 3 {
        return None;
    }
    let rest = components.pop()?;
    let b = components.pop()?;
    let a = components.pop()?;
    if a.len() != 2 || b.len() != 2 {
        return None;
    }
    Some(format!("{}{}{}", a, b, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ObjectMetadata, Relation};
    use crate::storage::ObjectStore;
    use tempfile::TempDir;

    fn vfs_in(dir: &TempDir) -> (VirtualFs, Arc<MetadataIndex>, Arc<RelationStore>) {
        let relations = Arc::new(RelationStore::new(dir.path().join("relations")).unwrap());
        let objects = Arc::new(
            ObjectStore::with_relations(dir.path().join("objects"), Arc::clone(&relations)).unwrap(),
        );
        let metadata =
            Arc::new(MetadataIndex::new(dir.path().join("metadata"), Arc::clone(&objects)).unwrap());
        let sessions = Arc::new(
            SessionIndex::new(
                dir.path().join("session-index.json"),
                dir.path().join("agent_sessions.json"),
                Arc::clone(&metadata),
            )
            .unwrap(),
        );
        let similarity = Arc::new(SimilarityEngine::new(Arc::clone(&relations)));
        let vfs = VirtualFs::new(
            Arc::clone(&metadata),
            Arc::clone(&relations),
            sessions,
            similarity,
            dir.path().join("commands"),
        );
        (vfs, metadata, relations)
    }

    #[test]
    fn test_root_listing() {
        let dir = TempDir::new().unwrap();
        let (vfs, _, _) = vfs_in(&dir);
        let entries = vfs.list_path("/").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        for root in ROOTS {
            assert!(names.contains(root), "missing root {}", root);
        }
    }

    #[test]
    fn test_tool_routes_resolve_to_relation() {
        let dir = TempDir::new().unwrap();
        let (vfs, _, relations) = vfs_in(&dir);
        let mut tool = Relation::tool("demo", vec!["format".to_string()]);
        tool.properties.executable_id = Some("deadbeef".to_string());
        relations.save(&tool).unwrap();

        let id = vfs.resolve_path("/tools/demo").unwrap();
        assert_eq!(id, format!("relation:{}", tool.id));
        assert_eq!(vfs.resolve_path("/tools/demo/definition").unwrap(), id);
        assert_eq!(vfs.resolve_path("/tools/demo/executable").unwrap(), "deadbeef");
    }

    #[test]
    fn test_tools_listing_contains_org_dirs_and_tools() {
        let dir = TempDir::new().unwrap();
        let (vfs, _, relations) = vfs_in(&dir);
        relations
            .save(&Relation::tool("alpha", vec!["log".to_string()]))
            .unwrap();

        let entries = vfs.list_path("/tools").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"by-name"));
        assert!(names.contains(&"by-transform"));
        assert!(names.contains(&"alpha"));

        let by_transform = vfs.list_path("/tools/by-transform/log").unwrap();
        assert_eq!(by_transform.len(), 1);
        assert_eq!(by_transform[0].name, "alpha");
    }

    #[test]
    fn test_metadata_path_listing_includes_basename_once() {
        let dir = TempDir::new().unwrap();
        let (vfs, metadata, _) = vfs_in(&dir);
        let mut meta = ObjectMetadata::new("", "document");
        meta.add_path("/artifacts/report.md");
        metadata.store_with_metadata(b"body", meta).unwrap();

        let entries = vfs.list_path("/artifacts").unwrap();
        let hits: Vec<&VfsEntry> = entries.iter().filter(|e| e.name == "report.md").collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_type, "file");
    }

    #[test]
    fn test_generated_view_filters_by_session() {
        let dir = TempDir::new().unwrap();
        let (vfs, _, relations) = vfs_in(&dir);
        let mut tool = Relation::tool("from-session", vec![]);
        tool.properties.memory_session = Some("cli-42".to_string());
        relations.save(&tool).unwrap();
        relations.save(&Relation::tool("loose", vec![])).unwrap();

        let entries = vfs.list_path("/memory/cli-42/generated").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "from-session");
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (vfs, _, _) = vfs_in(&dir);
        assert!(matches!(
            vfs.resolve_path("/nowhere/at/all"),
            Err(DaemonError::NotFound(_))
        ));
    }

    #[test]
    fn test_object_id_from_path() {
        let path = PathBuf::from("/home/u/.port42/objects/ab/cd/ef0123");
        assert_eq!(object_id_from_path(&path).as_deref(), Some("abcdef0123"));
        assert!(object_id_from_path(Path::new("short")).is_none());
    }
}

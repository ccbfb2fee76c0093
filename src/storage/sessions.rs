//! Durable session index and the per-agent last-session map.
//!
//! Both documents are single JSON files rewritten whole (marshal → temp →
//! rename) under one index-scoped lock, so concurrent saves serialize.

use crate::core::{DaemonError, ObjectMetadata, Result};
use crate::memory::session::{PersistentSession, Session, SessionState};
use crate::storage::metadata::MetadataIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Index entry pointing at the latest snapshot of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReference {
    pub object_id: String,
    pub session_id: String,
    pub agent: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub command_generated: bool,
    pub state: SessionState,
    pub message_count: usize,
}

pub struct SessionIndex {
    index_path: PathBuf,
    agent_path: PathBuf,
    metadata: Arc<MetadataIndex>,
    lock: Mutex<()>,
}

impl SessionIndex {
    pub fn new<P: AsRef<Path>>(
        index_path: P,
        agent_path: P,
        metadata: Arc<MetadataIndex>,
    ) -> Result<Self> {
        Ok(Self {
            index_path: index_path.as_ref().to_path_buf(),
            agent_path: agent_path.as_ref().to_path_buf(),
            metadata,
            lock: Mutex::new(()),
        })
    }

    /// Persist a session snapshot: store the object, register canonical
    /// virtual paths, update the index and the agent pointer atomically.
    pub fn save_session(&self, session: &Session) -> Result<String> {
        let persistent = session.to_persistent();
        let bytes = serde_json::to_vec_pretty(&persistent)
            .map_err(|e| DaemonError::Serialization(format!("Failed to serialize session: {}", e)))?;

        let _guard = self.lock.lock()?;
        let mut index = self.read_index()?;

        // Older snapshots of this session lose their paths so the canonical
        // routes always point at the latest object.
        if let Some(previous) = index.get(&session.id) {
            if let Ok(mut old_meta) = self.metadata.load(&previous.object_id) {
                old_meta.paths.clear();
                old_meta.lifecycle = crate::core::Lifecycle::Deprecated;
                old_meta.modified = Utc::now();
                let _ = self.metadata.save(&old_meta);
            }
        }

        let date = session.created_at.format("%Y-%m-%d").to_string();
        let mut meta = ObjectMetadata::new("", "session");
        meta.session = Some(session.id.clone());
        meta.agent = Some(session.agent.clone());
        meta.title = Some(format!("Session with {}", session.agent));
        meta.created = session.created_at;
        meta.add_path(format!("/memory/{}", session.id));
        meta.add_path(format!("/memory/sessions/{}", session.id));
        meta.add_path(format!("/by-date/{}/{}", date, session.id));
        meta.add_path(format!("/by-agent/{}/{}", session.agent, session.id));
        let object_id = self.metadata.store_with_metadata(&bytes, meta)?;

        index.insert(
            session.id.clone(),
            SessionReference {
                object_id: object_id.clone(),
                session_id: session.id.clone(),
                agent: session.agent.clone(),
                created_at: session.created_at,
                last_updated: Utc::now(),
                command_generated: session.command_generated.is_some(),
                state: session.state,
                message_count: session.messages.len(),
            },
        );
        self.write_json(&self.index_path, &index)?;

        let mut agents = self.read_agents()?;
        agents.insert(session.agent.clone(), session.id.clone());
        self.write_json(&self.agent_path, &agents)?;

        Ok(object_id)
    }

    pub fn load_session(&self, id: &str) -> Result<PersistentSession> {
        let index = self.read_index()?;
        let entry = index
            .get(id)
            .ok_or_else(|| DaemonError::NotFound(format!("Session '{}' not found", id)))?;
        let bytes = self.metadata.objects().read(&entry.object_id)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DaemonError::Serialization(format!("Corrupt session '{}': {}", id, e)))
    }

    pub fn get_reference(&self, id: &str) -> Result<Option<SessionReference>> {
        Ok(self.read_index()?.get(id).cloned())
    }

    pub fn list(&self) -> Result<Vec<SessionReference>> {
        let mut refs: Vec<SessionReference> = self.read_index()?.into_values().collect();
        refs.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(refs)
    }

    /// Sessions updated within the last `days` days. The window is
    /// date-inclusive: `days = 0` still returns everything from today.
    pub fn load_recent_sessions(&self, days: i64) -> Result<Vec<SessionReference>> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).date_naive();
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.last_updated.date_naive() >= cutoff)
            .collect())
    }

    /// Last session id saved for an agent. A dangling pointer (session no
    /// longer indexed) is cleared and reported as NotFound.
    pub fn get_last_session(&self, agent: &str) -> Result<String> {
        let _guard = self.lock.lock()?;
        let mut agents = self.read_agents()?;
        let session_id = agents
            .get(agent)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(format!("No sessions recorded for '{}'", agent)))?;

        let index = self.read_index()?;
        if !index.contains_key(&session_id) {
            agents.remove(agent);
            self.write_json(&self.agent_path, &agents)?;
            return Err(DaemonError::NotFound(format!(
                "Last session '{}' for '{}' is no longer indexed",
                session_id, agent
            )));
        }
        Ok(session_id)
    }

    fn read_index(&self) -> Result<HashMap<String, SessionReference>> {
        read_json_or_default(&self.index_path)
    }

    fn read_agents(&self) -> Result<HashMap<String, String>> {
        read_json_or_default(&self.agent_path)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| DaemonError::Serialization(format!("Failed to serialize index: {}", e)))?;
        let dir = path
            .parent()
            .ok_or_else(|| DaemonError::Internal("Index path has no parent".to_string()))?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create temp index file: {}", e)))?;
        temp.write_all(&json)
            .map_err(|e| DaemonError::Io(format!("Failed to write index: {}", e)))?;
        temp.persist(path)
            .map_err(|e| DaemonError::Io(format!("Failed to persist index: {}", e)))?;
        Ok(())
    }
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let data = fs::read_to_string(path)
        .map_err(|e| DaemonError::Io(format!("Failed to read {:?}: {}", path, e)))?;
    serde_json::from_str(&data)
        .map_err(|e| DaemonError::Serialization(format!("Corrupt index {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::session::MessageRole;
    use crate::storage::object::ObjectStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn index_in(dir: &TempDir) -> SessionIndex {
        let objects = Arc::new(ObjectStore::new(dir.path().join("objects")).unwrap());
        let metadata = Arc::new(MetadataIndex::new(dir.path().join("metadata"), objects).unwrap());
        SessionIndex::new(
            dir.path().join("session-index.json"),
            dir.path().join("agent_sessions.json"),
            metadata,
        )
        .unwrap()
    }

    fn sample_session(id: &str, agent: &str) -> Session {
        let mut session = Session::new(id, agent, Duration::from_secs(1800));
        session.append(MessageRole::User, "hi");
        session
    }

    #[test]
    fn test_save_and_load_session() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        let session = sample_session("cli-100", "@ai-engineer");
        index.save_session(&session).unwrap();

        let loaded = index.load_session("cli-100").unwrap();
        assert_eq!(loaded.agent, "@ai-engineer");
        assert_eq!(loaded.messages.len(), 1);
    }

    #[test]
    fn test_save_is_prefix_preserving() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        let mut session = sample_session("cli-101", "@ai-engineer");
        index.save_session(&session).unwrap();
        let first = index.load_session("cli-101").unwrap();

        session.append(MessageRole::Assistant, "hello there");
        index.save_session(&session).unwrap();
        let second = index.load_session("cli-101").unwrap();

        assert_eq!(second.messages.len(), 2);
        for (i, msg) in first.messages.iter().enumerate() {
            assert_eq!(second.messages[i].content, msg.content);
        }
    }

    #[test]
    fn test_last_session_pointer() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        index
            .save_session(&sample_session("cli-102", "@muse"))
            .unwrap();
        index
            .save_session(&sample_session("cli-103", "@muse"))
            .unwrap();
        assert_eq!(index.get_last_session("@muse").unwrap(), "cli-103");
        assert!(matches!(
            index.get_last_session("@nobody"),
            Err(DaemonError::NotFound(_))
        ));
    }

    #[test]
    fn test_canonical_paths_point_at_latest_snapshot() {
        let dir = TempDir::new().unwrap();
        let objects = Arc::new(ObjectStore::new(dir.path().join("objects")).unwrap());
        let metadata =
            Arc::new(MetadataIndex::new(dir.path().join("metadata"), Arc::clone(&objects)).unwrap());
        let index = SessionIndex::new(
            dir.path().join("session-index.json"),
            dir.path().join("agent_sessions.json"),
            Arc::clone(&metadata),
        )
        .unwrap();

        let mut session = sample_session("cli-104", "@ai-engineer");
        index.save_session(&session).unwrap();
        session.append(MessageRole::Assistant, "reply");
        index.save_session(&session).unwrap();

        let entry = index.get_reference("cli-104").unwrap().unwrap();
        assert_eq!(
            metadata.resolve_path("/memory/cli-104").as_deref(),
            Some(entry.object_id.as_str())
        );
        assert_eq!(entry.message_count, 2);
    }

    #[test]
    fn test_recent_sessions_filter() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        index
            .save_session(&sample_session("cli-105", "@ai-engineer"))
            .unwrap();
        assert_eq!(index.load_recent_sessions(7).unwrap().len(), 1);
        assert_eq!(index.load_recent_sessions(0).unwrap().len(), 1);
    }
}

//! In-memory sessions map over the durable session index.
//!
//! The map is guarded by one daemon-scoped read-write lock; per-session
//! mutations additionally hold the session's own lock, so message appends
//! serialize per session.

use crate::core::{DaemonError, Result};
use crate::memory::session::{MessageRole, Session, SessionState};
use crate::storage::SessionIndex;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    index: Arc<SessionIndex>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(index: Arc<SessionIndex>, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            index,
            idle_timeout,
        }
    }

    /// Create and persist a fresh session. Ids follow `<prefix>-<unix>`;
    /// same-second collisions get a numeric suffix.
    pub async fn create_session(&self, agent: &str, prefix: &str) -> Result<String> {
        let mut sessions = self.sessions.write().await;
        let base = format!("{}-{}", prefix, Utc::now().timestamp());
        let mut id = base.clone();
        let mut n = 1;
        while sessions.contains_key(&id) || self.index.get_reference(&id)?.is_some() {
            id = format!("{}-{}", base, n);
            n += 1;
        }

        let session = Session::new(id.clone(), agent, self.idle_timeout);
        self.index.save_session(&session)?;
        sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        log::info!("Created session {} for {}", id, agent);
        Ok(id)
    }

    /// Fetch a live session, reviving it from the index when evicted.
    /// Any revival counts as activity.
    pub async fn get_or_revive(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                return Ok(Arc::clone(session));
            }
        }

        let persistent = self.index.load_session(id)?;
        let mut session = Session::from_persistent(persistent, self.idle_timeout);
        session.state = SessionState::Active;
        session.touch();

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(session)));
        Ok(Arc::clone(entry))
    }

    /// Reads addressing a live session count as activity and revive an
    /// idle one; evicted sessions are left alone.
    pub async fn touch_if_live(&self, id: &str) {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(id).cloned()
        };
        if let Some(session) = session {
            session.lock().await.touch();
        }
    }

    /// Append one message and persist the snapshot; append, persist and
    /// index update are totally ordered under the session lock.
    pub async fn append_and_persist(
        &self,
        id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<()> {
        let session = self.get_or_revive(id).await?;
        let mut session = session.lock().await;
        session.append(role, content);
        self.index.save_session(&session)?;
        Ok(())
    }

    pub async fn mark_command_generated(&self, id: &str, command: &str) -> Result<()> {
        let session = self.get_or_revive(id).await?;
        let mut session = session.lock().await;
        session.command_generated = Some(command.to_string());
        session.touch();
        self.index.save_session(&session)?;
        Ok(())
    }

    /// Explicit end: final persist, then eviction.
    pub async fn end_session(&self, id: &str) -> Result<()> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(id).cloned()
        }
        .ok_or_else(|| DaemonError::NotFound(format!("Session '{}' is not active", id)))?;

        {
            let mut session = session.lock().await;
            session.complete();
            self.index.save_session(&session)?;
        }
        self.sessions.write().await.remove(id);
        log::info!("Completed session {}", id);
        Ok(())
    }

    /// One lifecycle sweep: advance state machines, persist transitions,
    /// evict terminal sessions. Returns (transitioned, evicted).
    pub async fn sweep(&self) -> (usize, usize) {
        let now = Utc::now();
        let snapshot: Vec<(String, Arc<Mutex<Session>>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, s)| (id.clone(), Arc::clone(s)))
                .collect()
        };

        let mut transitioned = 0;
        let mut evict = Vec::new();
        for (id, session) in snapshot {
            let mut session = session.lock().await;
            if let Some(new_state) = session.step_lifecycle(now) {
                transitioned += 1;
                if let Err(e) = self.index.save_session(&session) {
                    log::error!("Persisting sweep transition for {} failed: {}", id, e);
                }
                if new_state.is_terminal() {
                    evict.push(id);
                }
            }
        }

        let evicted = evict.len();
        if !evict.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in evict {
                sessions.remove(&id);
                log::info!("Evicted abandoned session {}", id);
            }
        }
        (transitioned, evicted)
    }

    /// Persist every live session; used at shutdown.
    pub async fn flush_all(&self) -> usize {
        let snapshot: Vec<Arc<Mutex<Session>>> = {
            let sessions = self.sessions.read().await;
            sessions.values().map(Arc::clone).collect()
        };
        let mut flushed = 0;
        for session in snapshot {
            let session = session.lock().await;
            match self.index.save_session(&session) {
                Ok(_) => flushed += 1,
                Err(e) => log::error!("Flush of session {} failed: {}", session.id, e),
            }
        }
        flushed
    }

    pub async fn live_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn index(&self) -> &Arc<SessionIndex> {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MetadataIndex, ObjectStore};
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir, idle: Duration) -> SessionManager {
        let objects = Arc::new(ObjectStore::new(dir.path().join("objects")).unwrap());
        let metadata = Arc::new(MetadataIndex::new(dir.path().join("metadata"), objects).unwrap());
        let index = Arc::new(
            SessionIndex::new(
                dir.path().join("session-index.json"),
                dir.path().join("agent_sessions.json"),
                metadata,
            )
            .unwrap(),
        );
        SessionManager::new(index, idle)
    }

    #[tokio::test]
    async fn test_create_and_append() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, Duration::from_secs(1800));
        let id = manager.create_session("@ai-engineer", "cli").await.unwrap();
        manager
            .append_and_persist(&id, MessageRole::User, "hi")
            .await
            .unwrap();

        let loaded = manager.index().load_session(&id).unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(manager.index().get_last_session("@ai-engineer").unwrap(), id);
    }

    #[tokio::test]
    async fn test_end_session_evicts() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, Duration::from_secs(1800));
        let id = manager.create_session("@muse", "mem").await.unwrap();
        assert_eq!(manager.live_count().await, 1);

        manager.end_session(&id).await.unwrap();
        assert_eq!(manager.live_count().await, 0);
        let loaded = manager.index().load_session(&id).unwrap();
        assert_eq!(loaded.state, SessionState::Completed);
    }

    #[tokio::test]
    async fn test_revive_after_eviction() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, Duration::from_secs(1800));
        let id = manager.create_session("@muse", "cli").await.unwrap();
        manager
            .append_and_persist(&id, MessageRole::User, "before eviction")
            .await
            .unwrap();
        manager.end_session(&id).await.unwrap();

        // A later append revives the session from its snapshot.
        manager
            .append_and_persist(&id, MessageRole::User, "after eviction")
            .await
            .unwrap();
        let loaded = manager.index().load_session(&id).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_sweep_abandons_stale_sessions() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, Duration::from_millis(10));
        let id = manager.create_session("@muse", "cli").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (transitioned, evicted) = manager.sweep().await;
        assert_eq!(transitioned, 1);
        assert_eq!(evicted, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (transitioned, evicted) = manager.sweep().await;
        assert_eq!(transitioned, 1);
        assert_eq!(evicted, 1);

        let loaded = manager.index().load_session(&id).unwrap();
        assert_eq!(loaded.state, SessionState::Abandoned);
    }

    #[tokio::test]
    async fn test_flush_all() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, Duration::from_secs(1800));
        manager.create_session("@a", "cli").await.unwrap();
        manager.create_session("@b", "cli").await.unwrap();
        assert_eq!(manager.flush_all().await, 2);
    }
}

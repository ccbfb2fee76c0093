//! p42 references: virtual paths injected as context.

use crate::core::{DaemonError, Reference, ResolvedContext, Result};
use crate::memory::session::PersistentSession;
use crate::storage::SessionIndex;
use crate::vfs::{SearchMode, VirtualFs};
use serde_json::json;
use std::sync::Arc;

pub struct VfsPathResolver {
    vfs: Arc<VirtualFs>,
    sessions: Arc<SessionIndex>,
}

impl VfsPathResolver {
    pub fn new(vfs: Arc<VirtualFs>, sessions: Arc<SessionIndex>) -> Self {
        Self { vfs, sessions }
    }

    /// Dispatch by prefix: tools render their relation, commands their
    /// object content, memory its transcript; anything else falls back to a
    /// token search over the path.
    pub fn resolve(&self, reference: &Reference) -> Result<ResolvedContext> {
        let target = reference.target.trim();
        let path = if target.starts_with('/') {
            target.to_string()
        } else {
            format!("/{}", target)
        };
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match segments.as_slice() {
            ["tools", _name, ..] | ["commands", _name] => {
                let bytes = self.vfs.read_path(&path)?;
                let content = String::from_utf8_lossy(&bytes).into_owned();
                Ok(ResolvedContext::new(reference.clone(), content, "p42")
                    .with_metadata("path", json!(path)))
            }
            ["memory", id] | ["memory", "sessions", id] => {
                let session = self.sessions.load_session(id)?;
                Ok(self.transcript_context(reference, &path, &session))
            }
            _ => self.fallback_search(reference, &path),
        }
    }

    fn transcript_context(
        &self,
        reference: &Reference,
        path: &str,
        session: &PersistentSession,
    ) -> ResolvedContext {
        ResolvedContext::new(reference.clone(), session.format_transcript(), "p42")
            .with_metadata("path", json!(path))
            .with_metadata("agent", json!(session.agent))
            .with_metadata("messages", json!(session.messages.len()))
    }

    /// Unknown prefixes become a search over the path tokens so the
    /// reference still contributes something useful.
    fn fallback_search(&self, reference: &Reference, path: &str) -> Result<ResolvedContext> {
        let query: String = path
            .split(['/', '-', '_'])
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if query.is_empty() {
            return Err(DaemonError::Resolution(format!(
                "VFS path '{}' not found and yields no search terms",
                path
            )));
        }
        let hits = self.vfs.search(&query, SearchMode::Or, 5)?;
        if hits.is_empty() {
            return Err(DaemonError::Resolution(format!(
                "VFS path '{}' not found (no search hits either)",
                path
            )));
        }
        let mut content = format!("No exact match for {}; closest entries:\n", path);
        for hit in &hits {
            content.push_str(&format!(
                "- {} ({}): {}\n",
                hit.title, hit.source, hit.snippet
            ));
        }
        Ok(ResolvedContext::new(reference.clone(), content, "p42")
            .with_metadata("path", json!(path))
            .with_metadata("fallback", json!("search"))
            .with_metadata("hits", json!(hits.len())))
    }
}

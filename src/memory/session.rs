use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session lifecycle states.
///
/// active → idle after `idle_timeout` without activity, idle → abandoned
/// after twice that, idle → active on any touch, active → completed on
/// explicit end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Idle,
    Completed,
    Abandoned,
}

impl SessionState {
    /// Terminal states are evicted from memory after a final persist.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A durable conversational thread.
///
/// `messages` is append-only within a process; snapshots persisted through
/// the session index are prefix-preserving extensions of earlier ones.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub agent: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub command_generated: Option<String>,
    pub idle_timeout: Duration,
}

impl Session {
    pub fn new(id: impl Into<String>, agent: &str, idle_timeout: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent: agent.to_string(),
            state: SessionState::Active,
            created_at: now,
            updated_at: now,
            last_activity: now,
            messages: Vec::new(),
            command_generated: None,
            idle_timeout,
        }
    }

    /// Append a message; appends are the only mutation of `messages`.
    pub fn append(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Register activity. Idle sessions come back to active.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_activity = now;
        self.updated_at = now;
        if self.state == SessionState::Idle {
            self.state = SessionState::Active;
        }
    }

    pub fn complete(&mut self) {
        self.state = SessionState::Completed;
        self.updated_at = Utc::now();
    }

    /// Advance the state machine for the periodic sweep. Returns the new
    /// state when a transition happened.
    pub fn step_lifecycle(&mut self, now: DateTime<Utc>) -> Option<SessionState> {
        let idle = chrono::Duration::from_std(self.idle_timeout).ok()?;
        let since = now.signed_duration_since(self.last_activity);
        match self.state {
            SessionState::Active if since > idle => {
                self.state = SessionState::Idle;
                self.updated_at = now;
                Some(SessionState::Idle)
            }
            SessionState::Idle if since > idle * 2 => {
                self.state = SessionState::Abandoned;
                self.updated_at = now;
                Some(SessionState::Abandoned)
            }
            _ => None,
        }
    }

    pub fn to_persistent(&self) -> PersistentSession {
        PersistentSession {
            id: self.id.clone(),
            agent: self.agent.clone(),
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_activity: self.last_activity,
            messages: self.messages.clone(),
            command_generated: self.command_generated.clone(),
        }
    }

    pub fn from_persistent(persistent: PersistentSession, idle_timeout: Duration) -> Self {
        Self {
            id: persistent.id,
            agent: persistent.agent,
            state: persistent.state,
            created_at: persistent.created_at,
            updated_at: persistent.updated_at,
            last_activity: persistent.last_activity,
            messages: persistent.messages,
            command_generated: persistent.command_generated,
            idle_timeout,
        }
    }
}

/// Serialized view of a session, stored as a content-addressed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentSession {
    pub id: String,
    pub agent: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_generated: Option<String>,
}

impl PersistentSession {
    /// Human-readable transcript used when a memory is injected as context.
    pub fn format_transcript(&self) -> String {
        let mut out = format!(
            "Session {} (agent: {}, state: {:?}, {} messages)\n",
            self.id,
            self.agent,
            self.state,
            self.messages.len()
        );
        for message in &self.messages {
            let role = match message.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            out.push_str(&format!(
                "[{}] {}: {}\n",
                message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                role,
                message.content
            ));
        }
        out
    }
}

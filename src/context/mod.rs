//! Process-wide activity telemetry: bounded buffers of recent commands,
//! created tools and accessed memories, plus suggestions derived from them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

const MAX_COMMANDS: usize = 30;
const MAX_TOOLS: usize = 10;
const MAX_MEMORIES: usize = 15;
const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct CommandEvent {
    pub request_type: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolEvent {
    pub name: String,
    pub relation_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryAccess {
    pub session_id: String,
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
}

/// Snapshot handed back by `collect`.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub recent_commands: Vec<CommandEvent>,
    pub recent_tools: Vec<ToolEvent>,
    pub accessed_memories: Vec<MemoryAccess>,
    pub suggestions: Vec<String>,
}

#[derive(Default)]
struct Buffers {
    commands: VecDeque<CommandEvent>,
    tools: VecDeque<ToolEvent>,
    memories: Vec<MemoryAccess>,
}

#[derive(Default)]
pub struct ContextCollector {
    buffers: Mutex<Buffers>,
}

impl ContextCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most-recent-first command buffer, capped at `MAX_COMMANDS`.
    pub fn record_command(&self, request_type: &str, detail: &str) {
        let Ok(mut buffers) = self.buffers.lock() else {
            return;
        };
        buffers.commands.push_front(CommandEvent {
            request_type: request_type.to_string(),
            detail: detail.to_string(),
            at: Utc::now(),
        });
        buffers.commands.truncate(MAX_COMMANDS);
    }

    pub fn record_tool(&self, name: &str, relation_id: &str) {
        let Ok(mut buffers) = self.buffers.lock() else {
            return;
        };
        buffers.tools.push_front(ToolEvent {
            name: name.to_string(),
            relation_id: relation_id.to_string(),
            at: Utc::now(),
        });
        buffers.tools.truncate(MAX_TOOLS);
    }

    pub fn record_memory_access(&self, session_id: &str) {
        let Ok(mut buffers) = self.buffers.lock() else {
            return;
        };
        if let Some(entry) = buffers
            .memories
            .iter_mut()
            .find(|m| m.session_id == session_id)
        {
            entry.access_count += 1;
            entry.last_access = Utc::now();
        } else {
            buffers.memories.push(MemoryAccess {
                session_id: session_id.to_string(),
                access_count: 1,
                last_access: Utc::now(),
            });
        }
        buffers
            .memories
            .sort_by(|a, b| b.access_count.cmp(&a.access_count));
        buffers.memories.truncate(MAX_MEMORIES);
    }

    /// Snapshot plus up to five suggestions computed from recent activity.
    pub fn collect(&self) -> ContextSnapshot {
        let Ok(buffers) = self.buffers.lock() else {
            return ContextSnapshot {
                recent_commands: Vec::new(),
                recent_tools: Vec::new(),
                accessed_memories: Vec::new(),
                suggestions: Vec::new(),
            };
        };

        let mut suggestions = Vec::new();
        if let Some(memory) = buffers.memories.first() {
            suggestions.push(format!(
                "continue your last session: possess {}",
                memory.session_id
            ));
        }
        if let Some(tool) = buffers.tools.front() {
            suggestions.push(format!("try your new tool: {}", tool.name));
            suggestions.push(format!("see related tools: ls /similar/{}", tool.name));
        }
        if buffers.tools.is_empty() {
            suggestions.push("declare your first tool with declare_relation".to_string());
        }
        if !buffers.commands.is_empty() {
            suggestions.push("explore /tools/ and /memory/ with list_path".to_string());
        }
        suggestions.truncate(MAX_SUGGESTIONS);

        ContextSnapshot {
            recent_commands: buffers.commands.iter().cloned().collect(),
            recent_tools: buffers.tools.iter().cloned().collect(),
            accessed_memories: buffers.memories.clone(),
            suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_are_mru_and_bounded() {
        let collector = ContextCollector::new();
        for i in 0..40 {
            collector.record_command("list_path", &format!("/tools/{}", i));
        }
        let snapshot = collector.collect();
        assert_eq!(snapshot.recent_commands.len(), MAX_COMMANDS);
        assert_eq!(snapshot.recent_commands[0].detail, "/tools/39");
    }

    #[test]
    fn test_memory_access_sorted_by_count() {
        let collector = ContextCollector::new();
        collector.record_memory_access("cli-1");
        collector.record_memory_access("cli-2");
        collector.record_memory_access("cli-2");
        let snapshot = collector.collect();
        assert_eq!(snapshot.accessed_memories[0].session_id, "cli-2");
        assert_eq!(snapshot.accessed_memories[0].access_count, 2);
    }

    #[test]
    fn test_suggestions_reflect_activity() {
        let collector = ContextCollector::new();
        let empty = collector.collect();
        assert!(empty
            .suggestions
            .iter()
            .any(|s| s.contains("declare your first tool")));

        collector.record_tool("git-haiku", "tool-git-haiku-1");
        collector.record_memory_access("cli-7");
        let busy = collector.collect();
        assert!(busy.suggestions.iter().any(|s| s.contains("git-haiku")));
        assert!(busy.suggestions.iter().any(|s| s.contains("cli-7")));
        assert!(busy.suggestions.len() <= MAX_SUGGESTIONS);
    }
}

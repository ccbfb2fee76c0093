//! Per-request-type routing.

use crate::ai::AIMessage;
use crate::core::{DaemonError, Relation, RelationProperties, RelationType, Result};
use crate::memory::MessageRole;
use crate::server::daemon::Daemon;
use crate::server::protocol::{
    AgentPayload, CreateMemoryPayload, DeclarePayload, GetMetadataPayload, ListRelationsPayload,
    PathPayload, PossessPayload, RelationIdPayload, Request, Response, SearchPayload,
    SessionIdPayload, StorePathPayload,
};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};

const DEFAULT_AGENT: &str = "@ai-engineer";

pub async fn handle(daemon: &Daemon, request: Request) -> Response {
    let id = request.id.clone();
    let request_type = request.request_type.clone();

    match dispatch(daemon, request).await {
        Ok(data) => Response::ok(&id, data),
        Err(e) => {
            log::warn!("Request '{}' ({}) failed: {}", request_type, id, e);
            Response::error(&id, e.user_message())
        }
    }
}

async fn dispatch(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let request_type = request.request_type.clone();

    // ping/status/watch/context are read-only chatter and stay out of the
    // activity buffers.
    if !matches!(
        request_type.as_str(),
        "ping" | "status" | "watch" | "context"
    ) {
        daemon
            .collector
            .record_command(&request_type, &summarize_payload(&request));
    }

    match request_type.as_str() {
        "ping" => Ok(json!({"pong": true})),
        "status" => status(daemon).await,
        "possess" => possess(daemon, request).await,
        "list" | "list_path" => list_path(daemon, request),
        "memory" => memory(daemon, request).await,
        "watch" => Ok(json!({
            "recent": daemon.collector.collect().recent_commands,
        })),
        "context" => Ok(serde_json::to_value(daemon.collector.collect())?),
        "end" => end_session(daemon, request).await,
        "store_path" => store_path(daemon, request),
        "update_path" => update_path(daemon, request),
        "delete_path" => delete_path(daemon, request),
        "create_memory" => create_memory(daemon, request).await,
        "read_path" => read_path(daemon, request),
        "get_metadata" => get_metadata(daemon, request),
        "search" => search(daemon, request),
        "get_last_session" => get_last_session(daemon, request),
        "declare_relation" => declare_relation(daemon, request).await,
        "get_relation" => get_relation(daemon, request),
        "list_relations" => list_relations(daemon, request),
        "delete_relation" => delete_relation(daemon, request),
        other => Err(DaemonError::Validation(format!(
            "Unknown request type '{}'.\nSuggestion: see the protocol documentation for recognized types.\nExample: {{\"type\": \"status\", \"id\": \"1\"}}",
            other
        ))),
    }
}

fn summarize_payload(request: &Request) -> String {
    request
        .payload
        .get("path")
        .or_else(|| request.payload.get("query"))
        .or_else(|| request.payload.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: &JsonValue, what: &str) -> Result<T> {
    // A missing payload arrives as null; treat it as an empty object so
    // all-optional payloads parse.
    let payload = if payload.is_null() {
        json!({})
    } else {
        payload.clone()
    };
    serde_json::from_value(payload).map_err(|e| {
        DaemonError::Validation(format!(
            "Malformed {} payload: {}.\nSuggestion: check the field names and types.",
            what, e
        ))
    })
}

// ============================================================================
// Daemon and sessions
// ============================================================================

async fn status(daemon: &Daemon) -> Result<JsonValue> {
    let relations = daemon.relations.list()?;
    let tools = relations
        .iter()
        .filter(|r| r.kind == RelationType::Tool)
        .count();
    Ok(json!({
        "uptime_seconds": daemon.uptime().as_secs(),
        "address": daemon.bound_address(),
        "model": daemon.ai.model(),
        "relations": relations.len(),
        "tools": tools,
        "materialized": daemon.compiler.registry().record_count(),
        "live_sessions": daemon.sessions.live_count().await,
        "indexed_sessions": daemon.session_index.list()?.len(),
    }))
}

/// The minimal conversational loop: append the user message, ask the model
/// with the full transcript, append and persist the reply.
async fn possess(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: PossessPayload = parse_payload(&request.payload, "possess")?;
    daemon
        .validator
        .validate_prompt(Some(payload.message.as_str()))?;

    let context = request.session_context.as_ref();
    let agent = payload
        .agent
        .clone()
        .or_else(|| context.and_then(|c| c.agent.clone()))
        .unwrap_or_else(|| DEFAULT_AGENT.to_string());
    let session_id = match payload
        .session_id
        .clone()
        .or_else(|| context.and_then(|c| c.session_id.clone()))
    {
        Some(id) => id,
        None => daemon.sessions.create_session(&agent, "cli").await?,
    };

    daemon
        .sessions
        .append_and_persist(&session_id, MessageRole::User, &payload.message)
        .await?;
    daemon.collector.record_memory_access(&session_id);

    let session = daemon.sessions.get_or_revive(&session_id).await?;
    let transcript: Vec<AIMessage> = {
        let session = session.lock().await;
        session
            .messages
            .iter()
            .map(|m| match m.role {
                MessageRole::User => AIMessage::user(m.content.clone()),
                MessageRole::Assistant => AIMessage::assistant(m.content.clone()),
            })
            .collect()
    };

    let persona = format!(
        "You are {}, a focused collaborator inside a local tool daemon. Answer concisely.",
        agent
    );
    let reply = daemon
        .ai
        .send_without_tools(&transcript, &persona, &agent)
        .await?;

    daemon
        .sessions
        .append_and_persist(&session_id, MessageRole::Assistant, &reply)
        .await?;

    Ok(json!({"session_id": session_id, "agent": agent, "message": reply}))
}

async fn create_memory(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: CreateMemoryPayload = parse_payload(&request.payload, "create_memory")?;
    let agent = payload.agent.unwrap_or_else(|| DEFAULT_AGENT.to_string());
    let session_id = daemon.sessions.create_session(&agent, "mem").await?;
    if let Some(message) = payload.message {
        daemon
            .validator
            .validate_prompt(Some(message.as_str()))?;
        daemon
            .sessions
            .append_and_persist(&session_id, MessageRole::User, &message)
            .await?;
    }
    Ok(json!({"session_id": session_id, "agent": agent}))
}

async fn memory(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: SessionIdPayload = parse_payload(&request.payload, "memory")?;
    match payload.session_id {
        Some(id) => {
            let session = daemon.session_index.load_session(&id)?;
            daemon.sessions.touch_if_live(&id).await;
            daemon.collector.record_memory_access(&id);
            Ok(serde_json::to_value(session)?)
        }
        None => {
            let recent = daemon.session_index.load_recent_sessions(30)?;
            Ok(json!({"sessions": recent}))
        }
    }
}

async fn end_session(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: SessionIdPayload = parse_payload(&request.payload, "end")?;
    let id = payload.session_id.ok_or_else(|| {
        DaemonError::Validation(
            "end needs a session_id.\nExample: {\"type\": \"end\", \"payload\": {\"session_id\": \"cli-1\"}}"
                .to_string(),
        )
    })?;
    daemon.sessions.end_session(&id).await?;
    Ok(json!({"session_id": id, "state": "completed"}))
}

fn get_last_session(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: AgentPayload = parse_payload(&request.payload, "get_last_session")?;
    let session_id = daemon.session_index.get_last_session(&payload.agent)?;
    Ok(json!({"agent": payload.agent, "session_id": session_id}))
}

// ============================================================================
// VFS
// ============================================================================

fn list_path(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: PathPayload = parse_payload(&request.payload, "list_path")?;
    let path = if payload.path.is_empty() {
        "/".to_string()
    } else {
        payload.path
    };
    let entries = daemon.vfs.list_path(&path)?;
    Ok(json!({"path": path, "entries": entries}))
}

fn read_path(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: PathPayload = parse_payload(&request.payload, "read_path")?;
    let object_id = daemon.vfs.resolve_path(&payload.path)?;
    let bytes = daemon.vfs.read_path(&payload.path)?;
    if payload.path.starts_with("/memory/") {
        if let Some(session_id) = payload.path.trim_start_matches("/memory/").split('/').next() {
            daemon.collector.record_memory_access(session_id);
        }
    }
    Ok(json!({
        "path": payload.path,
        "object_id": object_id,
        "content": String::from_utf8_lossy(&bytes),
    }))
}

fn store_path(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: StorePathPayload = parse_payload(&request.payload, "store_path")?;
    if !payload.path.starts_with('/') {
        return Err(DaemonError::Validation(format!(
            "Virtual path '{}' rejected: paths are absolute.\nExample: /artifacts/report.md",
            payload.path
        )));
    }
    let mut meta = crate::core::ObjectMetadata::new(
        "",
        payload.object_type.as_deref().unwrap_or("document"),
    );
    meta.title = payload.title;
    meta.tags = payload.tags;
    meta.add_path(payload.path.clone());
    let object_id = daemon
        .metadata
        .store_with_metadata(payload.content.as_bytes(), meta)?;
    Ok(json!({"path": payload.path, "object_id": object_id}))
}

/// Content-addressed update: the path is re-pointed at a fresh object, the
/// old object keeps existing but loses the path.
fn update_path(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: StorePathPayload = parse_payload(&request.payload, "update_path")?;
    let old_id = daemon.vfs.resolve_path(&payload.path)?;
    let old_meta = daemon.metadata.load(&old_id)?;

    let mut old_meta_updated = old_meta.clone();
    old_meta_updated.remove_path(&payload.path);
    old_meta_updated.modified = Utc::now();
    daemon.metadata.save(&old_meta_updated)?;

    let mut meta = crate::core::ObjectMetadata::new("", &old_meta.object_type);
    meta.title = payload.title.or(old_meta.title);
    meta.tags = if payload.tags.is_empty() {
        old_meta.tags
    } else {
        payload.tags
    };
    meta.created = old_meta.created;
    meta.add_path(payload.path.clone());
    let object_id = daemon
        .metadata
        .store_with_metadata(payload.content.as_bytes(), meta)?;
    Ok(json!({
        "path": payload.path,
        "object_id": object_id,
        "previous_object_id": old_id,
    }))
}

fn delete_path(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: PathPayload = parse_payload(&request.payload, "delete_path")?;
    let object_id = daemon.metadata.remove_path(&payload.path)?;
    Ok(json!({"path": payload.path, "object_id": object_id}))
}

fn get_metadata(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: GetMetadataPayload = parse_payload(&request.payload, "get_metadata")?;
    let id = match (payload.id, payload.path) {
        (Some(id), _) => id,
        (None, Some(path)) => daemon.vfs.resolve_path(&path)?,
        (None, None) => {
            return Err(DaemonError::Validation(
                "get_metadata needs an id or a path.\nExample: {\"payload\": {\"path\": \"/commands/x\"}}"
                    .to_string(),
            ));
        }
    };
    let meta = daemon.metadata.load(&id)?;
    Ok(serde_json::to_value(meta)?)
}

fn search(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: SearchPayload = parse_payload(&request.payload, "search")?;
    daemon.validator.validate_search_query(&payload.query)?;
    let results = daemon.vfs.search(
        &payload.query,
        payload.mode,
        payload.limit.unwrap_or(crate::vfs::search::DEFAULT_LIMIT),
    )?;
    Ok(json!({"query": payload.query, "count": results.len(), "results": results}))
}

// ============================================================================
// Relations
// ============================================================================

async fn declare_relation(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: DeclarePayload = parse_payload(&request.payload, "declare_relation")?;
    let kind: RelationType = payload
        .relation_type
        .parse()
        .map_err(DaemonError::Validation)?;

    let mut properties: RelationProperties = if payload.properties.is_null() {
        RelationProperties::default()
    } else {
        serde_json::from_value(payload.properties.clone()).map_err(|e| {
            DaemonError::Validation(format!("Malformed relation properties: {}", e))
        })?
    };

    // Validation runs before any mutation; a rejected request writes
    // nothing.
    daemon
        .validator
        .validate_declare(&request.references, request.user_prompt.as_deref())?;

    if kind == RelationType::Tool && properties.name.is_none() {
        return Err(DaemonError::Validation(
            "Tool relations need properties.name.\nExample: {\"payload\": {\"type\": \"Tool\", \"properties\": {\"name\": \"git-haiku\"}}}"
                .to_string(),
        ));
    }

    if !request.references.is_empty() {
        properties.references = request.references.clone();
    }
    if request.user_prompt.is_some() {
        properties.user_prompt = request.user_prompt.clone();
    }
    if let Some(context) = &request.session_context {
        if properties.agent.is_none() {
            properties.agent = context.agent.clone();
        }
        if properties.memory_session.is_none() {
            properties.memory_session = context.session_id.clone();
        }
    }

    if !properties.references.is_empty() {
        let (block, contexts) = daemon.resolver.resolve_for_ai(&properties.references).await;
        if !block.is_empty() {
            properties.resolved_context = Some(block);
        }
        properties.extra.insert(
            "resolved_reference_count".to_string(),
            json!(contexts.len()),
        );
    }

    let id = payload.id.unwrap_or_else(|| match (&kind, &properties.name) {
        (RelationType::Tool, Some(name)) => format!("tool-{}-{}", name, Utc::now().timestamp()),
        (_, Some(name)) => format!(
            "{}-{}-{}",
            kind.as_str().to_lowercase(),
            name,
            Utc::now().timestamp()
        ),
        (_, None) => format!("{}-{}", kind.as_str().to_lowercase(), Utc::now().timestamp()),
    });

    let mut relation = Relation::new(id.clone(), kind);
    relation.properties = properties;

    let entity = daemon.compiler.declare_relation(relation).await?;

    let stored = daemon.relations.load(&id)?;
    if kind == RelationType::Tool {
        if let Some(name) = stored.name() {
            daemon.collector.record_tool(name, &id);
            if let Some(session) = &stored.properties.memory_session {
                if let Err(e) = daemon.sessions.mark_command_generated(session, name).await {
                    log::debug!("Could not mark command on session {}: {}", session, e);
                }
            }
        }
    }

    Ok(json!({
        "relation": stored,
        "entity": entity,
    }))
}

fn get_relation(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: RelationIdPayload = parse_payload(&request.payload, "get_relation")?;
    let relation = daemon.relations.load(&payload.id)?;
    Ok(serde_json::to_value(relation)?)
}

fn list_relations(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: ListRelationsPayload = parse_payload(&request.payload, "list_relations")?;
    let relations = match payload.relation_type {
        Some(kind) => {
            let kind: RelationType = kind.parse().map_err(DaemonError::Validation)?;
            daemon.relations.load_by_type(kind)?
        }
        None => daemon.relations.list()?,
    };
    Ok(json!({"count": relations.len(), "relations": relations}))
}

fn delete_relation(daemon: &Daemon, request: Request) -> Result<JsonValue> {
    let payload: RelationIdPayload = parse_payload(&request.payload, "delete_relation")?;
    daemon.compiler.delete_relation(&payload.id)?;
    Ok(json!({"id": payload.id, "deleted": true}))
}

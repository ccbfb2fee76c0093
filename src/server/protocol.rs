//! Wire protocol: one JSON request and one JSON response per connection.

use crate::core::Reference;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub request_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub session_context: Option<SessionContext>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub user_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: &str, data: JsonValue) -> Self {
        Self {
            id: id.to_string(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: &str, message: String) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Typed payloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DeclarePayload {
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: JsonValue,
}

#[derive(Debug, Deserialize)]
pub struct PossessPayload {
    #[serde(default)]
    pub agent: Option<String>,
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMemoryPayload {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PathPayload {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct StorePathPayload {
    pub path: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchPayload {
    pub query: String,
    #[serde(default)]
    pub mode: crate::vfs::SearchMode,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AgentPayload {
    pub agent: String,
}

#[derive(Debug, Deserialize)]
pub struct RelationIdPayload {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListRelationsPayload {
    #[serde(rename = "type", default)]
    pub relation_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionIdPayload {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetMetadataPayload {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_minimal_parse() {
        let request: Request =
            serde_json::from_str(r#"{"type": "ping", "id": "r1"}"#).unwrap();
        assert_eq!(request.request_type, "ping");
        assert!(request.references.is_empty());
        assert!(request.user_prompt.is_none());
    }

    #[test]
    fn test_request_with_references() {
        let raw = r#"{
            "type": "declare_relation",
            "id": "r2",
            "payload": {"type": "Tool", "properties": {"name": "x"}},
            "references": [{"type": "file", "target": "./cfg.json"}],
            "user_prompt": "validate config"
        }"#;
        let request: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(request.references.len(), 1);
        assert_eq!(request.references[0].target, "./cfg.json");
    }

    #[test]
    fn test_unknown_reference_type_fails_parse() {
        let raw = r#"{"type": "declare_relation", "id": "r3",
                      "references": [{"type": "carrier-pigeon", "target": "x"}]}"#;
        assert!(serde_json::from_str::<Request>(raw).is_err());
    }

    #[test]
    fn test_response_shape() {
        let ok = Response::ok("r1", serde_json::json!({"pong": true}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("error"));

        let err = Response::error("r2", "boom".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(!json.contains("data"));
    }
}

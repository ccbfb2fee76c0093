use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

// ============================================================================
// Relations
// ============================================================================

/// Kind of a declared relation.
///
/// `Tool` relations are materialized into executables; `Artifact` and
/// `UrlArtifact` are data-only; `Relationship` links two other relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    Tool,
    Artifact,
    #[serde(rename = "URLArtifact")]
    UrlArtifact,
    Relationship,
}

impl RelationType {
    /// Data-only kinds bypass materialization and are returned as virtual
    /// entities.
    pub fn is_data_only(&self) -> bool {
        matches!(self, Self::Artifact | Self::UrlArtifact | Self::Relationship)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "Tool",
            Self::Artifact => "Artifact",
            Self::UrlArtifact => "URLArtifact",
            Self::Relationship => "Relationship",
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Tool" => Ok(Self::Tool),
            "Artifact" => Ok(Self::Artifact),
            "URLArtifact" => Ok(Self::UrlArtifact),
            "Relationship" => Ok(Self::Relationship),
            other => Err(format!("Unknown relation type '{}'", other)),
        }
    }
}

/// Known relation properties as typed fields, with an extension map for
/// anything a future materializer or rule wants to carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_context: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,

    /// Object id of the materialized executable, set by the tool materializer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_session: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawned_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    // Relationship-kind fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_generated: Option<bool>,

    #[serde(flatten)]
    pub extra: HashMap<String, JsonValue>,
}

/// Declarative record of an entity that should exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RelationType,
    pub properties: RelationProperties,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(id: impl Into<String>, kind: RelationType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            properties: RelationProperties::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A tool relation with the conventional `tool-<name>-<unix>` id.
    pub fn tool(name: &str, transforms: Vec<String>) -> Self {
        let mut relation = Self::new(
            format!("tool-{}-{}", name, Utc::now().timestamp()),
            RelationType::Tool,
        );
        relation.properties.name = Some(name.to_string());
        relation.properties.transforms = transforms;
        relation
    }

    /// Name property; tool materialization requires it.
    pub fn name(&self) -> Option<&str> {
        self.properties.name.as_deref()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// References and resolved context
// ============================================================================

/// The five reference kinds accepted in declare requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    File,
    P42,
    Url,
    Search,
    Tool,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::P42 => "p42",
            Self::Url => "url",
            Self::Search => "search",
            Self::Tool => "tool",
        }
    }
}

/// Declarative pointer to external information to fetch and inject as
/// context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type")]
    pub ref_type: ReferenceType,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Reference {
    pub fn new(ref_type: ReferenceType, target: impl Into<String>) -> Self {
        Self {
            ref_type,
            target: target.into(),
            context: None,
        }
    }
}

/// Concrete payload produced by resolving one reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedContext {
    pub reference: Reference,
    pub content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, JsonValue>,
    pub resolved_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub context_type: String,
}

impl ResolvedContext {
    pub fn new(reference: Reference, content: String, context_type: &str) -> Self {
        Self {
            reference,
            content,
            metadata: HashMap::new(),
            resolved_at: Utc::now(),
            context_type: context_type.to_string(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: JsonValue) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

// ============================================================================
// Object metadata
// ============================================================================

/// Object lifecycle stage, mark-only; blobs are never deleted implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Draft,
    #[default]
    Active,
    Stable,
    Archived,
    Deprecated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectRelationships {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

/// Per-object metadata record, keyed by object id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub id: String,
    /// Ordered set of virtual paths this object is reachable at. Non-empty
    /// iff the object is reachable.
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub relationships: ObjectRelationships,
}

impl ObjectMetadata {
    pub fn new(id: impl Into<String>, object_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            paths: Vec::new(),
            object_type: object_type.to_string(),
            subtype: None,
            created: now,
            modified: now,
            accessed: now,
            session: None,
            agent: None,
            title: None,
            description: None,
            tags: Vec::new(),
            lifecycle: Lifecycle::Active,
            importance: None,
            usage_count: 0,
            size: 0,
            summary: None,
            relationships: ObjectRelationships::default(),
        }
    }

    /// Append a virtual path, keeping `paths` duplicate-free.
    pub fn add_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Remove a path; when the last path goes away the object is no longer
    /// reachable and its lifecycle flips to deprecated.
    pub fn remove_path(&mut self, path: &str) {
        self.paths.retain(|p| p != path);
        if self.paths.is_empty() {
            self.lifecycle = Lifecycle::Deprecated;
        }
    }
}

// ============================================================================
// Materialized entities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterializationStatus {
    Success,
    Failed,
}

/// Record of a relation made physically present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializedEntity {
    pub relation_id: String,
    /// Empty for data-only relations.
    #[serde(default)]
    pub physical_path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, JsonValue>,
    pub status: MaterializationStatus,
    pub created_at: DateTime<Utc>,
}

impl MaterializedEntity {
    /// Virtual entity for data-only relations; no physical path.
    pub fn virtual_entity(relation_id: &str) -> Self {
        Self {
            relation_id: relation_id.to_string(),
            physical_path: String::new(),
            metadata: HashMap::new(),
            status: MaterializationStatus::Success,
            created_at: Utc::now(),
        }
    }
}

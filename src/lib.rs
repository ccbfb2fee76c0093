// ============================================================================
// port42d Library
// ============================================================================

pub mod ai;
pub mod compiler;
pub mod context;
pub mod core;
pub mod memory;
pub mod resolve;
pub mod server;
pub mod similarity;
pub mod storage;
pub mod vfs;

// Re-export main types for convenience
pub use ai::{AIClient, AIMessage, AnthropicClient, MockAIClient};
pub use compiler::{MaterializationRegistry, Materializer, RealityCompiler, RuleEngine};
pub use context::ContextCollector;
pub use crate::core::{
    DaemonConfig, DaemonError, MaterializedEntity, ObjectMetadata, Reference, ReferenceType,
    Relation, RelationType, ResolvedContext, Result,
};
pub use memory::{Session, SessionManager, SessionState};
pub use server::{Daemon, Request, Response};
pub use similarity::SimilarityEngine;
pub use storage::{MetadataIndex, ObjectStore, RelationStore, SessionIndex};
pub use vfs::{SearchMode, VirtualFs};

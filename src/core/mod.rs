pub mod config;
pub mod error;
pub mod types;

pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use types::{
    Lifecycle, MaterializationStatus, MaterializedEntity, ObjectMetadata, ObjectRelationships,
    Reference, ReferenceType, Relation, RelationProperties, RelationType, ResolvedContext,
};

pub mod metadata;
pub mod object;
pub mod relations;
pub mod sessions;

pub use metadata::MetadataIndex;
pub use object::{ObjectStore, RELATION_ID_PREFIX, hash_bytes};
pub use relations::RelationStore;
pub use sessions::{SessionIndex, SessionReference};

pub mod lifecycle;
pub mod manager;
pub mod session;

pub use lifecycle::spawn_sweeper;
pub use manager::SessionManager;
pub use session::{Message, MessageRole, PersistentSession, Session, SessionState};

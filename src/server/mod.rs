pub mod daemon;
pub mod handlers;
pub mod protocol;
pub mod validate;

pub use daemon::Daemon;
pub use protocol::{Request, Response};
pub use validate::Validator;

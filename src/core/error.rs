use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Materialization error: {0}")]
    Materialization(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("AI error: {0}")]
    Ai(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for DaemonError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {}", err))
    }
}

impl DaemonError {
    /// User-facing message in "what failed / why / suggested fix / example" shape.
    ///
    /// Validation errors already carry the full shape from the validator;
    /// other kinds get a generic suggestion appended.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(msg) => format!(
                "{}\nSuggestion: list the parent directory or run a search to locate it.\nExample: {{\"type\": \"list_path\", \"payload\": {{\"path\": \"/tools\"}}}}",
                msg
            ),
            other => other.to_string(),
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Registry unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Malformed value: {0}")]
    ParseFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the failure came from an unreachable registry and may succeed later
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CoreError::StoreUnavailable(_))
    }
}

//! Error types for the environment port registry

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvPortError {
    #[error("Port conflict: port {port} is already allocated to {environment}/{service}")]
    PortConflict {
        port: u16,
        environment: String,
        service: String,
    },

    #[error("Port already allocated: {0}")]
    PortAlreadyAllocated(u16),

    #[error("No available ports in range {start}-{end} for environment {environment}")]
    NoAvailablePorts {
        start: u16,
        end: u16,
        environment: String,
    },

    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("Port {0} is outside every configured port band")]
    PortOutOfRange(u16),

    #[error("Lock timeout: could not acquire {path} after {attempts} attempts")]
    LockTimeout { path: String, attempts: u32 },

    #[error("Invalid environment type: {0}")]
    InvalidEnvironmentType(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(String),
}

impl EnvPortError {
    /// True when another owner already holds the requested port.
    ///
    /// Conflicts are the only registry failure the allocator retries on.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EnvPortError::PortConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, EnvPortError>;

//! Error types for mock server management.

use hook_system::MethodError;
use thiserror::Error;

/// Errors raised by the server store and manager.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No server with this name exists.
    #[error("server not found: {0}")]
    NotFound(String),
    /// A server with this name already exists.
    #[error("server already exists: {0}")]
    AlreadyExists(String),
    /// Another server already uses this port.
    #[error("port {port} is already used by server {owner}")]
    PortInUse { port: u16, owner: String },
    /// The name is not usable as a server name.
    #[error("invalid server name `{0}`: use 1-32 characters of A-Z, a-z, 0-9, '-' or '_'")]
    InvalidName(String),
    /// A record field has an unusable value.
    #[error("invalid server record: {0}")]
    InvalidRecord(String),
    /// A server method failed.
    #[error(transparent)]
    Method(#[from] MethodError),
    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ServerError> for MethodError {
    fn from(error: ServerError) -> Self {
        match error {
            ServerError::Method(inner) => inner,
            other => MethodError::Failed(other.to_string()),
        }
    }
}

//! Error taxonomy for the request processing core.
//!
//! # Design Decisions
//! - Every variant is terminal for the request being handled; nothing here
//!   is retried automatically
//! - Load errors are fatal at startup, per-request errors go back to the
//!   listener which renders a generic page
//! - Error text is for logs only and never reaches the client

use std::fmt;

use thiserror::Error;

use crate::config::loader::ConfigError;

/// Convenience alias used throughout the pipeline.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Failure reported by an extension from one of its capability calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFailure {
    message: String,
}

impl ExtensionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ExtensionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExtensionFailure {}

impl From<&str> for ExtensionFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ExtensionFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<ProxyError> for ExtensionFailure {
    fn from(err: ProxyError) -> Self {
        Self::new(err.to_string())
    }
}

/// Coarse error classes, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    ExtensionLoad,
    Extension,
    BackendUnreachable,
    BackendProtocol,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::ExtensionLoad => "ExtensionLoadError",
            ErrorKind::Extension => "ExtensionError",
            ErrorKind::BackendUnreachable => "BackendUnreachableError",
            ErrorKind::BackendProtocol => "BackendProtocolError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while loading extensions or handling a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A module could not be resolved, initialised or bound.
    #[error("extension '{name}' failed to load: {reason}")]
    ExtensionLoad { name: String, reason: String },

    /// A loaded extension's capability call returned an error.
    #[error("extension '{name}' failed: {source}")]
    Extension {
        name: String,
        #[source]
        source: ExtensionFailure,
    },

    /// An extension's `on_response` produced no response.
    #[error("extension '{name}' returned no response from on_response")]
    NullResponse { name: String },

    /// Sub-request recursion went past the configured bound.
    #[error("sub-request depth {depth} exceeds limit of {limit}")]
    SubRequestDepth { depth: u32, limit: u32 },

    /// No transport candidate could reach the backend.
    #[error("backend '{backend}' unreachable: {reason}")]
    BackendUnreachable { backend: String, reason: String },

    /// The backend answered, but its response could not be understood.
    #[error("backend '{backend}' protocol error: {reason}")]
    BackendProtocol { backend: String, reason: String },
}

impl ProxyError {
    pub fn extension(name: impl Into<String>, source: impl Into<ExtensionFailure>) -> Self {
        ProxyError::Extension {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn extension_load(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        ProxyError::ExtensionLoad {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unreachable(backend: impl Into<String>, reason: impl fmt::Display) -> Self {
        ProxyError::BackendUnreachable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(backend: impl Into<String>, reason: impl fmt::Display) -> Self {
        ProxyError::BackendProtocol {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Map the error onto its taxonomy class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Config(_) => ErrorKind::Config,
            ProxyError::ExtensionLoad { .. } => ErrorKind::ExtensionLoad,
            ProxyError::Extension { .. }
            | ProxyError::NullResponse { .. }
            | ProxyError::SubRequestDepth { .. } => ErrorKind::Extension,
            ProxyError::BackendUnreachable { .. } => ErrorKind::BackendUnreachable,
            ProxyError::BackendProtocol { .. } => ErrorKind::BackendProtocol,
        }
    }

    /// Name of the extension involved, if any.
    pub fn extension_name(&self) -> Option<&str> {
        match self {
            ProxyError::ExtensionLoad { name, .. }
            | ProxyError::Extension { name, .. }
            | ProxyError::NullResponse { name } => Some(name),
            _ => None,
        }
    }
}

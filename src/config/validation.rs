//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the backend address matches the selected protocol
//! - Check the extension list is loadable as given
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::backend::ProxyType;
use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyListen,
    EmptyBackend,
    InvalidBackendUrl(String),
    EmptyExtensionName,
    DuplicateExtension(String),
    ZeroSubRequestDepth,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyListen => write!(f, "listen address is empty"),
            ValidationError::EmptyBackend => write!(f, "backend address is empty"),
            ValidationError::InvalidBackendUrl(reason) => {
                write!(f, "http backend is not a valid http:// URL: {}", reason)
            }
            ValidationError::EmptyExtensionName => write!(f, "extension name is empty"),
            ValidationError::DuplicateExtension(name) => {
                write!(f, "extension '{}' is enabled more than once", name)
            }
            ValidationError::ZeroSubRequestDepth => {
                write!(f, "pipeline.max_sub_request_depth must be at least 1")
            }
        }
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listen.trim().is_empty() {
        errors.push(ValidationError::EmptyListen);
    }

    if config.backend.trim().is_empty() {
        errors.push(ValidationError::EmptyBackend);
    } else if config.proxy_type == ProxyType::Http {
        match url::Url::parse(&config.backend) {
            Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {}
            Ok(url) => errors.push(ValidationError::InvalidBackendUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            ))),
            Err(e) => errors.push(ValidationError::InvalidBackendUrl(e.to_string())),
        }
    }

    let mut seen = HashSet::new();
    for name in &config.extensions.enabled {
        if name.trim().is_empty() {
            errors.push(ValidationError::EmptyExtensionName);
        } else if !seen.insert(name.as_str()) {
            errors.push(ValidationError::DuplicateExtension(name.clone()));
        }
    }

    for name in config.extensions.config.keys() {
        if !seen.contains(name.as_str()) {
            tracing::warn!(extension = %name, "Configuration given for an extension that is not enabled");
        }
    }

    if config.pipeline.max_sub_request_depth == 0 {
        errors.push(ValidationError::ZeroSubRequestDepth);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

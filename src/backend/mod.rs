//! Backend subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyRequest (after pre-fetch extensions)
//!     → fetcher.rs (dispatch on protocol tag)
//!         - http.rs   (rewrite target, round trip, buffer body)
//!         - fcgi/     (derive params, TCP then Unix, buffer stdout)
//!         - dummy.rs  (echo derived params as text/plain)
//!     → ProxyResponse (fully buffered, connection already closed)
//! ```
//!
//! # Design Decisions
//! - One connection per fetch; no pooling, no retries
//! - Full buffering so the backend connection is released before the
//!   post-fetch extensions run

pub mod dummy;
pub mod fetcher;
pub mod http;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use fetcher::{BackendFetcher, Fetcher};

/// Protocol used to reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    /// Plain HTTP passthrough.
    Http,
    /// FastCGI responder.
    Fcgi,
    /// Synthetic backend for tests.
    Dummy,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Fcgi => "fcgi",
            ProxyType::Dummy => "dummy",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to reach the backend. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    protocol: ProxyType,
    address: String,
}

impl BackendDescriptor {
    pub fn new(protocol: ProxyType, address: impl Into<String>) -> Self {
        Self {
            protocol,
            address: address.into(),
        }
    }

    /// Descriptor for the synthetic test backend.
    pub fn dummy() -> Self {
        Self::new(ProxyType::Dummy, "")
    }

    pub fn protocol(&self) -> ProxyType {
        self.protocol
    }

    /// host:port, Unix socket path, or URL, depending on the protocol.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)
    }
}

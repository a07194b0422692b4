//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendDescriptor, ProxyType};

/// Environment variable that, when set, supplies the listen port and
/// switches the default backend protocol to FastCGI.
pub const PORT_ENV: &str = "PORT";

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Backend protocol selector.
    pub proxy_type: ProxyType,

    /// Port or socket to listen on (":8081", "127.0.0.1:8081", "/app/listen.sock").
    pub listen: String,

    /// Backend address (host:port, socket path, or URL).
    pub backend: String,

    /// Extension module settings.
    pub extensions: ExtensionsConfig,

    /// Request pipeline settings.
    pub pipeline: PipelineConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let port = std::env::var(PORT_ENV).ok().filter(|p| !p.is_empty());
        let proxy_type = if port.is_some() {
            ProxyType::Fcgi
        } else {
            ProxyType::Http
        };
        Self {
            proxy_type,
            listen: format!(":{}", port.as_deref().unwrap_or("8081")),
            backend: default_backend(proxy_type).to_string(),
            extensions: ExtensionsConfig::default(),
            pipeline: PipelineConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Default backend address for a protocol.
///
/// FastCGI and dummy share the conventional application socket; HTTP needs
/// a URL so it points at a local port instead.
pub fn default_backend(proxy_type: ProxyType) -> &'static str {
    match proxy_type {
        ProxyType::Http => "http://127.0.0.1:8080",
        ProxyType::Fcgi | ProxyType::Dummy => "/run/app.sock",
    }
}

impl ProxyConfig {
    /// The immutable backend descriptor derived from this configuration.
    pub fn backend_descriptor(&self) -> BackendDescriptor {
        BackendDescriptor::new(self.proxy_type, self.backend.clone())
    }
}

/// Extension module configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Directory holding loadable modules.
    pub path: PathBuf,

    /// Ordered list of extension names to enable.
    pub enabled: Vec<String>,

    /// Raw per-extension configuration, keyed by extension name.
    pub config: BTreeMap<String, serde_json::Value>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        let path = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("ext")))
            .unwrap_or_else(|| PathBuf::from("ext"));
        Self {
            path,
            enabled: Vec::new(),
            config: BTreeMap::new(),
        }
    }
}

impl ExtensionsConfig {
    /// Raw configuration bytes for one extension (JSON encoded).
    ///
    /// Extensions without an entry receive an empty blob.
    pub fn raw_config(&self, name: &str) -> Vec<u8> {
        self.config
            .get(name)
            .and_then(|value| serde_json::to_vec(value).ok())
            .unwrap_or_default()
    }
}

/// Request pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deepest sub-request nesting accepted before the pipeline refuses.
    pub max_sub_request_depth: u32,

    /// Largest inbound request body the listener will buffer.
    pub max_body_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_sub_request_depth: 4,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Optional Prometheus exporter address (e.g., "127.0.0.1:9090").
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "extproxy=info,tower_http=info".to_string(),
            metrics_address: None,
        }
    }
}

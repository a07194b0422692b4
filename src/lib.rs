//! Extensible reverse proxy.
//!
//! Forwards inbound HTTP requests to a single HTTP, FastCGI or dummy
//! backend, letting loadable extensions rewrite requests, short-circuit the
//! fetch, fan out sub-requests and rewrite responses.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::server ──▶ pipeline ──▶ backend ──▶ Backend
//!                                                     │   ▲        (http | fcgi | dummy)
//!                                                     ▼   │
//!                                             extension::registry
//!                                          (builtin / shared library)
//!
//!     Cross-cutting: config, error, observability, lifecycle
//! ```

// Core
pub mod backend;
pub mod extension;
pub mod fcgi;
pub mod http;
pub mod pipeline;

// Plumbing
pub mod config;
pub mod error;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::Pipeline;

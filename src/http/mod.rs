//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP / Unix connection
//!     → server.rs (Axum setup, body buffering)
//!     → request.rs (ProxyRequest, request ID, sub-request marker)
//!     → pipeline.rs
//!     → response.rs (ProxyResponse → axum response)
//!     → error_page.rs on failure
//!     → Send to client
//! ```

pub mod error_page;
pub mod request;
pub mod response;
pub mod server;

pub use request::{ProxyRequest, RequestHead, RequestId, RequestKind, X_REQUEST_ID, X_SUB_REQUEST};
pub use response::ProxyResponse;
pub use server::{HttpServer, PROXY_NAME, X_PROXY_NAME};

//! FastCGI backend.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → params.rs (CGI variable set)
//!     → client.rs (connect TCP → Unix, BEGIN/PARAMS/STDIN)
//!     → record.rs (framing both ways)
//!     → cgi.rs (stdout → status, headers, body)
//!     → ProxyResponse
//! ```

pub mod cgi;
pub mod client;
pub mod params;
pub mod record;

use std::sync::Arc;

use crate::backend::BackendDescriptor;
use crate::error::{ProxyError, ProxyResult};
use crate::fcgi::cgi::parse_cgi_response;
use crate::fcgi::client::{FcgiError, FcgiStream};
use crate::fcgi::params::derive_params;
use crate::http::{ProxyRequest, ProxyResponse};

pub use params::FcgiParams;

/// Forwards requests to a FastCGI responder.
#[derive(Debug, Default, Clone)]
pub struct FcgiFetcher;

impl FcgiFetcher {
    pub fn new() -> Self {
        Self
    }

    pub async fn fetch(
        &self,
        req: &mut ProxyRequest,
        backend: &BackendDescriptor,
    ) -> ProxyResult<ProxyResponse> {
        let address = backend.address();
        let params = derive_params(req);

        let stream = FcgiStream::connect(address)
            .await
            .map_err(|e| ProxyError::unreachable(address, e))?;

        tracing::debug!(
            request_id = %req.id(),
            backend = %address,
            params = params.len(),
            "Forwarding to FastCGI backend"
        );

        let output = stream
            .request(&params, req.body())
            .await
            .map_err(|e| match e {
                FcgiError::Protocol(reason) => ProxyError::protocol(address, reason),
                other => ProxyError::unreachable(address, other),
            })?;

        if !output.stderr.is_empty() {
            tracing::warn!(
                request_id = %req.id(),
                backend = %address,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "FastCGI backend wrote to stderr"
            );
        }

        let mut resp =
            parse_cgi_response(&output.stdout).map_err(|e| ProxyError::protocol(address, e))?;
        resp.attach_request(Arc::new(req.head()));
        Ok(resp)
    }
}

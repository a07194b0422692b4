//! Backend fetch dispatch.

use std::time::Instant;

use async_trait::async_trait;

use crate::backend::dummy::dummy_fetch;
use crate::backend::http::HttpFetcher;
use crate::backend::{BackendDescriptor, ProxyType};
use crate::error::ProxyResult;
use crate::fcgi::FcgiFetcher;
use crate::http::{ProxyRequest, ProxyResponse};
use crate::observability::metrics;

/// Turns one request into one backend response.
///
/// Implementations may rewrite the request in place (e.g. its target host).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        req: &mut ProxyRequest,
        backend: &BackendDescriptor,
    ) -> ProxyResult<ProxyResponse>;
}

/// The production fetcher: routes on the descriptor's protocol tag.
pub struct BackendFetcher {
    http: HttpFetcher,
    fcgi: FcgiFetcher,
}

impl BackendFetcher {
    pub fn new() -> Self {
        Self {
            http: HttpFetcher::new(),
            fcgi: FcgiFetcher::new(),
        }
    }
}

impl Default for BackendFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for BackendFetcher {
    async fn fetch(
        &self,
        req: &mut ProxyRequest,
        backend: &BackendDescriptor,
    ) -> ProxyResult<ProxyResponse> {
        let started = Instant::now();
        let result = match backend.protocol() {
            ProxyType::Http => self.http.fetch(req, backend).await,
            ProxyType::Fcgi => self.fcgi.fetch(req, backend).await,
            ProxyType::Dummy => Ok(dummy_fetch(req)),
        };
        metrics::record_backend_fetch(backend.protocol().as_str(), result.is_ok(), started);
        result
    }
}

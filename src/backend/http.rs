//! HTTP passthrough backend.
//!
//! # Responsibilities
//! - Rewrite the request target (scheme, authority, Host) to the backend
//! - Perform one round trip per fetch
//! - Buffer the whole response so the connection can be released
//!
//! # Design Decisions
//! - Idle connections are never kept (no pooling across requests)
//! - Chunked framing from the backend is replaced by an exact Content-Length

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderValue, Method, Request, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::backend::BackendDescriptor;
use crate::error::{ProxyError, ProxyResult};
use crate::http::{ProxyRequest, ProxyResponse};

/// Forwards requests to an `http://` backend.
pub struct HttpFetcher {
    client: Client<HttpConnector, Body>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpConnector::new());
        Self { client }
    }

    pub async fn fetch(
        &self,
        req: &mut ProxyRequest,
        backend: &BackendDescriptor,
    ) -> ProxyResult<ProxyResponse> {
        let address = backend.address();
        let base = url::Url::parse(address).map_err(|e| ProxyError::unreachable(address, e))?;
        let authority = backend_authority(&base)
            .ok_or_else(|| ProxyError::unreachable(address, "backend URL has no host"))?;

        rewrite_target(req, &base, &authority).map_err(|e| ProxyError::unreachable(address, e))?;

        let mut outbound = Request::builder()
            .method(req.method().clone())
            .uri(req.uri().clone())
            .body(Body::from(req.body().clone()))
            .map_err(|e| ProxyError::unreachable(address, e))?;
        *outbound.headers_mut() = req.headers().clone();

        tracing::debug!(
            request_id = %req.id(),
            backend = %address,
            uri = %req.uri(),
            "Forwarding to HTTP backend"
        );

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| ProxyError::unreachable(address, e))?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), usize::MAX)
            .await
            .map_err(|e| ProxyError::protocol(address, e))?;

        let mut resp = ProxyResponse::new(parts.status);
        if let Some(reason) = parts.extensions.get::<hyper::ext::ReasonPhrase>() {
            resp = resp.with_reason(String::from_utf8_lossy(reason.as_bytes()).into_owned());
        }
        *resp.headers_mut() = parts.headers;
        if resp.headers_mut().remove(header::TRANSFER_ENCODING).is_some()
            && req.method() != Method::HEAD
        {
            resp.headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        resp.set_body(body);
        resp.attach_request(Arc::new(req.head()));
        Ok(resp)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// host[:port] of the backend URL.
fn backend_authority(base: &url::Url) -> Option<String> {
    let host = base.host_str()?;
    Some(match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Point the request at the backend: scheme and authority from the backend
/// URL, path and query kept from the request.
fn rewrite_target(
    req: &mut ProxyRequest,
    base: &url::Url,
    authority: &str,
) -> Result<(), String> {
    let mut parts = req.uri().clone().into_parts();
    parts.scheme = Some(Scheme::from_str(base.scheme()).map_err(|e| e.to_string())?);
    parts.authority = Some(Authority::from_str(authority).map_err(|e| e.to_string())?);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    *req.uri_mut() = Uri::from_parts(parts).map_err(|e| e.to_string())?;

    let host = HeaderValue::from_str(authority).map_err(|e| e.to_string())?;
    req.headers_mut().insert(header::HOST, host);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_scheme_host_and_keeps_path() {
        let mut req = ProxyRequest::new(Method::GET, Uri::from_static("/shop/cart?id=7"))
            .with_header(header::HOST, HeaderValue::from_static("www.example.com"));
        let base = url::Url::parse("http://10.0.0.5:3000").unwrap();
        let authority = backend_authority(&base).unwrap();

        rewrite_target(&mut req, &base, &authority).unwrap();

        assert_eq!(req.uri().to_string(), "http://10.0.0.5:3000/shop/cart?id=7");
        assert_eq!(req.headers().get(header::HOST).unwrap(), "10.0.0.5:3000");
    }

    #[test]
    fn authority_without_port() {
        let base = url::Url::parse("http://backend.internal/").unwrap();
        assert_eq!(backend_authority(&base).as_deref(), Some("backend.internal"));
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let fetcher = HttpFetcher::new();
        let mut req = ProxyRequest::new(Method::GET, Uri::from_static("/"));
        // Port 9 (discard) is almost never listening on loopback.
        let backend = BackendDescriptor::new(crate::backend::ProxyType::Http, "http://127.0.0.1:9");

        let err = fetcher.fetch(&mut req, &backend).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BackendUnreachable);
    }
}

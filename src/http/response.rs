//! Response representation.
//!
//! # Responsibilities
//! - Hold the status, headers and fully buffered body of one response
//! - Reference the request that produced it once the pipeline finalizes
//! - Convert to the listener's response type
//!
//! # Design Decisions
//! - Exactly one live response per request; stages hand it on by value
//! - Body is read once with `take_body`

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::http::request::{ProxyRequest, RequestHead};

/// A buffered response travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    request: Option<Arc<RequestHead>>,
}

impl ProxyResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            request: None,
        }
    }

    /// 200 response with a `text/plain` body.
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_body(body)
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Reason phrase: the backend's own if it sent one, else the canonical text.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Peek at the body without consuming it.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replace the body, keeping any `Content-Length` header consistent.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        if self.headers.contains_key(header::CONTENT_LENGTH) {
            self.headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
    }

    /// Read the body, leaving it empty.
    pub fn take_body(&mut self) -> Bytes {
        std::mem::take(&mut self.body)
    }

    /// The request this response answers, once attached.
    pub fn request(&self) -> Option<&RequestHead> {
        self.request.as_deref()
    }

    pub(crate) fn attach_request(&mut self, head: Arc<RequestHead>) {
        self.request = Some(head);
    }

    /// Whether this response is attached to the given request.
    pub fn answers(&self, req: &ProxyRequest) -> bool {
        self.request().map(|head| *head == req.head()).unwrap_or(false)
    }

    /// Convert into the listener's response, adding `extra` headers.
    pub fn into_http(self, extra: &[(header::HeaderName, HeaderValue)]) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        for (name, value) in extra {
            response.headers_mut().append(name.clone(), value.clone());
        }
        response
    }
}

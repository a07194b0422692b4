//! Request handling and transformation.
//!
//! # Responsibilities
//! - Own the request for one processing cycle
//! - Carry the correlation ID and the top-level / sub-request marker
//! - Expose host, path and query the way the backends need them
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Body is fully buffered; extensions may replace it in place
//! - Headers keep insertion order and repeated values

use std::fmt;

use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use bytes::Bytes;

/// Correlation header read from, and written to, requests.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Header set on every request submitted through the sub-request callback.
pub const X_SUB_REQUEST: &str = "x-sub-request";

/// Per-request correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh UUID v4 identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Reuse an inbound `x-request-id` if present and printable.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a request came from the listener or from an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    TopLevel,
    SubRequest { depth: u32 },
}

impl RequestKind {
    /// Nesting depth: zero for top-level requests.
    pub fn depth(&self) -> u32 {
        match self {
            RequestKind::TopLevel => 0,
            RequestKind::SubRequest { depth } => *depth,
        }
    }

    pub fn is_sub_request(&self) -> bool {
        matches!(self, RequestKind::SubRequest { .. })
    }
}

/// A fully parsed inbound request, owned by the pipeline.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    id: RequestId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    kind: RequestKind,
}

impl ProxyRequest {
    /// Create an empty-bodied top-level request.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            id: RequestId::generate(),
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            kind: RequestKind::TopLevel,
        }
    }

    /// Build a request from already-split HTTP parts and a buffered body.
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        Self {
            id: RequestId::from_headers(&parts.headers),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            kind: RequestKind::TopLevel,
        }
    }

    /// Builder-style header append.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Builder-style body replacement.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn method_mut(&mut self) -> &mut Method {
        &mut self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn uri_mut(&mut self) -> &mut Uri {
        &mut self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Host the client addressed: the `Host` header, else the URI authority.
    pub fn host(&self) -> String {
        self.headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| self.uri.authority().map(|a| a.as_str().to_string()))
            .unwrap_or_default()
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// Path plus query, as sent on the request line.
    pub fn request_uri(&self) -> String {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string())
    }

    /// Mark this request as a sub-request one level below `parent_depth`.
    pub fn mark_sub_request(&mut self, parent_depth: u32) {
        self.kind = RequestKind::SubRequest {
            depth: parent_depth.saturating_add(1),
        };
        self.headers
            .insert(X_SUB_REQUEST, HeaderValue::from_static("1"));
    }

    /// Snapshot of the request line and headers, attached to responses.
    pub fn head(&self) -> RequestHead {
        RequestHead {
            id: self.id.clone(),
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            kind: self.kind,
        }
    }
}

/// The identifying part of a request, as referenced by its response.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub id: RequestId,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub kind: RequestKind,
}

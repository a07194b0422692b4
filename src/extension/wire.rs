//! JSON messages exchanged with shared-library extensions.
//!
//! Headers travel as ordered `(name, value)` pairs so repeated headers
//! survive the round trip. Header values must be UTF-8; a value that is not
//! is refused rather than rewritten. Bodies are raw byte arrays.
//!
//! The host's sub-request callback takes a bare `WireRequest` and answers
//! with a `WireResponse`. Its `depth` field is informational only.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};

use crate::error::ExtensionFailure;
use crate::http::{ProxyRequest, ProxyResponse};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    #[serde(default)]
    pub id: String,
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub status: u16,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

/// Reply to `on_request`: the (possibly edited) request and an optional
/// short-circuit response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnRequestReply {
    pub request: WireRequest,
    #[serde(default)]
    pub response: Option<WireResponse>,
}

/// Argument to `on_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnResponseArgs {
    pub response: WireResponse,
    #[serde(default)]
    pub sub_responses: Vec<WireResponse>,
}

fn wire_headers(headers: &HeaderMap) -> Result<Vec<(String, String)>, ExtensionFailure> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = std::str::from_utf8(value.as_bytes()).map_err(|_| {
                ExtensionFailure::new(format!("value of header '{}' is not valid UTF-8", name))
            })?;
            Ok((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn header_map(pairs: &[(String, String)]) -> Result<HeaderMap, ExtensionFailure> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ExtensionFailure::new(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| ExtensionFailure::new(format!("invalid value for header '{}': {}", name, e)))?;
        headers.append(name, value);
    }
    Ok(headers)
}

impl WireRequest {
    pub fn from_request(req: &ProxyRequest) -> Result<Self, ExtensionFailure> {
        Ok(Self {
            id: req.id().to_string(),
            method: req.method().to_string(),
            uri: req.uri().to_string(),
            headers: wire_headers(req.headers())?,
            body: req.body().to_vec(),
            depth: req.kind().depth(),
        })
    }

    /// Copy method, target, headers and body onto an existing request.
    /// Identity and sub-request marker stay with the host.
    pub fn apply_to(&self, req: &mut ProxyRequest) -> Result<(), ExtensionFailure> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| ExtensionFailure::new(format!("invalid method '{}': {}", self.method, e)))?;
        let uri: Uri = self
            .uri
            .parse()
            .map_err(|e| ExtensionFailure::new(format!("invalid uri '{}': {}", self.uri, e)))?;
        let headers = header_map(&self.headers)?;

        *req.method_mut() = method;
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;
        req.set_body(self.body.clone());
        Ok(())
    }

    /// Build a fresh top-level request.
    pub fn into_request(self) -> Result<ProxyRequest, ExtensionFailure> {
        let mut req = ProxyRequest::new(Method::GET, Uri::from_static("/"));
        self.apply_to(&mut req)?;
        Ok(req)
    }
}

impl WireResponse {
    pub fn from_response(resp: &ProxyResponse) -> Result<Self, ExtensionFailure> {
        Ok(Self {
            status: resp.status().as_u16(),
            reason: Some(resp.reason().to_string()).filter(|r| !r.is_empty()),
            headers: wire_headers(resp.headers())?,
            body: resp.body().to_vec(),
        })
    }

    pub fn into_response(self) -> Result<ProxyResponse, ExtensionFailure> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ExtensionFailure::new(format!("invalid status {}: {}", self.status, e)))?;
        let mut resp = ProxyResponse::new(status).with_body(self.body);
        if let Some(reason) = self.reason {
            if Some(reason.as_str()) != status.canonical_reason() {
                resp = resp.with_reason(reason);
            }
        }
        *resp.headers_mut() = header_map(&self.headers)?;
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn request_edits_apply_but_identity_stays() {
        let mut req = ProxyRequest::new(Method::GET, Uri::from_static("/a"));
        let id = req.id().clone();

        let mut wire = WireRequest::from_request(&req).unwrap();
        wire.uri = "/b?x=1".into();
        wire.headers.push(("x-test".into(), "TESTING".into()));
        wire.headers.push(("x-test".into(), "AGAIN".into()));
        wire.id = "forged".into();
        wire.apply_to(&mut req).unwrap();

        assert_eq!(req.uri().path(), "/b");
        assert_eq!(req.headers().get_all("x-test").iter().count(), 2);
        assert_eq!(req.id(), &id);
    }

    #[test]
    fn response_keeps_custom_reason_only() {
        let wire = WireResponse {
            status: 404,
            reason: Some("Not Found".into()),
            headers: vec![(header::CONTENT_TYPE.to_string(), "text/plain".into())],
            body: b"x".to_vec(),
        };
        let resp = wire.into_response().unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.reason(), "Not Found");
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn invalid_header_is_rejected() {
        let wire = WireResponse {
            status: 200,
            reason: None,
            headers: vec![("bad header".into(), "v".into())],
            body: Vec::new(),
        };
        assert!(wire.into_response().is_err());
    }

    #[test]
    fn non_utf8_header_is_refused_not_rewritten() {
        let req = ProxyRequest::new(Method::GET, Uri::from_static("/a")).with_header(
            HeaderName::from_static("x-raw"),
            HeaderValue::from_bytes(b"caf\xe9").unwrap(),
        );
        let err = WireRequest::from_request(&req).unwrap_err();
        assert!(err.to_string().contains("x-raw"));
    }

    #[test]
    fn utf8_header_value_round_trips() {
        let resp = ProxyResponse::new(StatusCode::OK).with_header(
            HeaderName::from_static("x-name"),
            HeaderValue::from_bytes("café".as_bytes()).unwrap(),
        );
        let back = WireResponse::from_response(&resp).unwrap().into_response().unwrap();
        assert_eq!(back.headers().get("x-name").unwrap().as_bytes(), "café".as_bytes());
    }

    #[test]
    fn null_reply_decodes_as_none() {
        let parsed: Option<WireResponse> = serde_json::from_slice(b"null").unwrap();
        assert!(parsed.is_none());
    }
}

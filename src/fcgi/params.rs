//! FastCGI parameter set derivation.
//!
//! The mapping is rebuilt from the request on every fetch. Keys are kept in
//! a `BTreeMap` so the same request always yields the same ordered set.
//!
//! Only the first value of a repeated header is exported as `HTTP_*`;
//! later values are dropped.

use std::collections::BTreeMap;

use axum::http::header;

use crate::http::ProxyRequest;

/// CGI-style variables describing one request.
pub type FcgiParams = BTreeMap<String, String>;

/// Value of `SERVER_SOFTWARE`.
pub const SERVER_SOFTWARE: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the parameter set for a request.
///
/// Sets the standard variables and one `HTTP_*` entry per header name.
pub fn derive_params(req: &ProxyRequest) -> FcgiParams {
    let mut params = FcgiParams::new();
    let host = req.host();

    params.insert("SERVER_SOFTWARE".into(), SERVER_SOFTWARE.into());
    params.insert("SERVER_NAME".into(), host.clone());
    params.insert("SERVER_PROTOCOL".into(), "HTTP/1.1".into());
    params.insert("HTTP_HOST".into(), host);
    params.insert("GATEWAY_INTERFACE".into(), "CGI/1.1".into());
    params.insert("REQUEST_METHOD".into(), req.method().as_str().into());
    params.insert("QUERY_STRING".into(), req.query().into());
    params.insert("REQUEST_URI".into(), req.request_uri());
    params.insert("PATH_INFO".into(), req.uri().path().into());
    params.insert(
        "SERVER_PORT".into(),
        req.uri().port_u16().map(|p| p.to_string()).unwrap_or_default(),
    );
    params.insert("CONTENT_LENGTH".into(), req.body().len().to_string());
    params.insert(
        "CONTENT_TYPE".into(),
        req.headers()
            .get(header::CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default(),
    );

    for name in req.headers().keys() {
        if let Some(first) = req.headers().get(name) {
            params.insert(
                header_param_name(name.as_str()),
                String::from_utf8_lossy(first.as_bytes()).into_owned(),
            );
        }
    }

    params
}

/// `x-forwarded-for` → `HTTP_X_FORWARDED_FOR`.
fn header_param_name(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 5);
    key.push_str("HTTP_");
    for c in name.chars() {
        key.push(if c == '-' { '_' } else { c.to_ascii_uppercase() });
    }
    key
}

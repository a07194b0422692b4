//! CGI/1.1 response parsing.
//!
//! A FastCGI responder writes a CGI document on stdout: header lines, a
//! blank line, then the body. A `Status:` header carries the code and
//! reason; a bare `Location:` means a 302 redirect.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::http::ProxyResponse;

/// Parse a CGI document into a response.
pub fn parse_cgi_response(stdout: &[u8]) -> Result<ProxyResponse, String> {
    let (head, body) = split_head(stdout).ok_or("missing header terminator in CGI output")?;
    let head = std::str::from_utf8(head).map_err(|_| "CGI headers are not valid UTF-8")?;

    let mut resp = ProxyResponse::new(StatusCode::OK);
    let mut status_seen = false;

    for line in head.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("malformed CGI header line '{}'", line))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("status") {
            let (code, reason) = parse_status(value)?;
            resp.set_status(code);
            if let Some(reason) = reason {
                resp = resp.with_reason(reason);
            }
            status_seen = true;
            continue;
        }

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| format!("invalid CGI header name '{}': {}", name, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid value for CGI header '{}': {}", name, e))?;
        resp.headers_mut().append(name, value);
    }

    if !status_seen && resp.headers().contains_key(header::LOCATION) {
        resp.set_status(StatusCode::FOUND);
    }

    resp.set_body(Bytes::copy_from_slice(body));
    Ok(resp)
}

/// Split at the first blank line (`\r\n\r\n` or `\n\n`).
fn split_head(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let (at, sep) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&raw[..at], &raw[at + sep..]))
}

/// `"404 Not Found"` → (404, Some("Not Found")).
fn parse_status(value: &str) -> Result<(StatusCode, Option<String>), String> {
    let (code, reason) = match value.split_once(' ') {
        Some((code, reason)) => (code, Some(reason.trim().to_string())),
        None => (value, None),
    };
    let code = code
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| format!("invalid CGI status '{}'", value))?;
    Ok((code, reason.filter(|r| !r.is_empty())))
}

//! Generic failure page.
//!
//! Internal error text never reaches the client; the page carries only the
//! status line.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

fn page(status: StatusCode) -> String {
    let reason = status.canonical_reason().unwrap_or("Error");
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{code} {reason}</title></head>\n\
         <body>\n<h1>{code} {reason}</h1>\n<p>The request could not be completed.</p>\n</body>\n</html>\n",
        code = status.as_u16(),
        reason = reason,
    )
}

/// Render the failure page for `status`.
pub fn render(status: StatusCode) -> Response {
    let mut response = Response::new(Body::from(page(status)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

//! Synthetic backend used to make pipeline behaviour testable without an
//! upstream. The body lists the FastCGI parameters the request would have
//! produced, one `KEY=value` line each.

use std::sync::Arc;

use crate::fcgi::params::derive_params;
use crate::http::{ProxyRequest, ProxyResponse};

pub fn dummy_fetch(req: &ProxyRequest) -> ProxyResponse {
    let params = derive_params(req);

    let mut body = String::new();
    for (key, value) in &params {
        body.push_str(key);
        body.push('=');
        body.push_str(value);
        body.push('\n');
    }

    let mut resp = ProxyResponse::text(body);
    resp.attach_request(Arc::new(req.head()));
    resp
}

//! Built-in edge-side include extension.
//!
//! Collects one sub-request per `<esi:include src="..."/>` tag in an HTML
//! response and splices each sub-response body in place of its tag.
//! Failed includes (non-2xx) and includes whose `src` is not a valid URI
//! are replaced with nothing.
//!
//! Configuration (JSON, optional):
//! ```json
//! { "max_includes": 32 }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, Method, Uri};
use serde::Deserialize;

use crate::error::ExtensionFailure;
use crate::extension::{Capabilities, Extension, ExtensionContext, ExtensionModule};
use crate::http::{ProxyRequest, ProxyResponse};

const TAG_OPEN: &str = "<esi:include";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EsiConfig {
    pub max_includes: usize,
}

impl Default for EsiConfig {
    fn default() -> Self {
        Self { max_includes: 32 }
    }
}

/// Module entry for the built-in loader.
pub struct EsiModule;

impl EsiModule {
    pub const NAME: &'static str = "esi";
}

#[async_trait]
impl ExtensionModule for EsiModule {
    async fn init(&self, ctx: ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionFailure> {
        let config = if ctx.config.is_empty() {
            EsiConfig::default()
        } else {
            serde_json::from_slice(&ctx.config)
                .map_err(|e| ExtensionFailure::new(format!("invalid esi config: {}", e)))?
        };
        Ok(Arc::new(EsiExtension {
            name: ctx.name,
            config,
        }))
    }
}

pub struct EsiExtension {
    name: String,
    config: EsiConfig,
}

impl EsiExtension {
    pub fn new(config: EsiConfig) -> Self {
        Self {
            name: EsiModule::NAME.to_string(),
            config,
        }
    }
}

/// Position and source of one include tag.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Include {
    start: usize,
    end: usize,
    src: String,
}

fn is_html(resp: &ProxyResponse) -> bool {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

/// Find self-closing include tags, in document order.
fn find_includes(body: &str, limit: usize) -> Vec<Include> {
    let mut includes = Vec::new();
    let mut cursor = 0;
    while includes.len() < limit {
        let Some(offset) = body[cursor..].find(TAG_OPEN) else {
            break;
        };
        let start = cursor + offset;
        let Some(close) = body[start..].find("/>") else {
            break;
        };
        let end = start + close + 2;
        if let Some(src) = attribute(&body[start..end], "src") {
            includes.push(Include {
                start,
                end,
                src: src.to_string(),
            });
        }
        cursor = end;
    }
    includes
}

/// Value of `name="..."` (or single-quoted) inside a tag.
fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = tag;
    loop {
        let at = rest.find(name)?;
        let after = rest[at + name.len()..].trim_start();
        let preceded_by_space = rest[..at].ends_with(char::is_whitespace);
        if preceded_by_space {
            if let Some(value) = after.strip_prefix('=') {
                let value = value.trim_start();
                let quote = value.chars().next()?;
                if quote == '"' || quote == '\'' {
                    let inner = &value[1..];
                    return inner.find(quote).map(|close| &inner[..close]);
                }
            }
        }
        rest = &rest[at + name.len()..];
    }
}

#[async_trait]
impl Extension for EsiExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            collect_sub_requests: true,
        }
    }

    async fn on_request(
        &self,
        _req: &mut ProxyRequest,
    ) -> Result<Option<ProxyResponse>, ExtensionFailure> {
        Ok(None)
    }

    async fn on_collect_sub_requests(
        &self,
        resp: &ProxyResponse,
    ) -> Result<Vec<ProxyRequest>, ExtensionFailure> {
        if !is_html(resp) {
            return Ok(Vec::new());
        }
        let Ok(body) = std::str::from_utf8(resp.body()) else {
            return Ok(Vec::new());
        };

        let host = resp
            .request()
            .and_then(|head| head.headers.get(header::HOST).cloned());

        let mut requests = Vec::new();
        for include in find_includes(body, self.config.max_includes) {
            let uri: Uri = match include.src.parse() {
                Ok(uri) => uri,
                Err(e) => {
                    tracing::warn!(src = %include.src, error = %e, "Skipping include with invalid src");
                    continue;
                }
            };
            let mut req = ProxyRequest::new(Method::GET, uri);
            if let Some(host) = &host {
                req.headers_mut().insert(header::HOST, host.clone());
            }
            requests.push(req);
        }
        Ok(requests)
    }

    async fn on_response(
        &self,
        mut resp: ProxyResponse,
        sub_responses: &[ProxyResponse],
    ) -> Result<Option<ProxyResponse>, ExtensionFailure> {
        if sub_responses.is_empty() {
            return Ok(Some(resp));
        }
        let raw = resp.take_body();
        let Ok(body) = std::str::from_utf8(&raw) else {
            resp.set_body(raw.clone());
            return Ok(Some(resp));
        };

        // sub-responses line up with the includes that had a valid src
        let mut subs = sub_responses.iter();
        let mut assembled = String::with_capacity(body.len());
        let mut cursor = 0;
        for include in find_includes(body, self.config.max_includes) {
            assembled.push_str(&body[cursor..include.start]);
            cursor = include.end;
            if include.src.parse::<Uri>().is_err() {
                continue;
            }
            let Some(sub) = subs.next() else {
                cursor = include.start;
                break;
            };
            if sub.status().is_success() {
                assembled.push_str(&String::from_utf8_lossy(sub.body()));
            } else {
                tracing::debug!(src = %include.src, status = %sub.status(), "Dropping failed include");
            }
        }
        assembled.push_str(&body[cursor..]);

        // set_body keeps an existing Content-Length in step
        resp.set_body(assembled);
        resp.headers_mut().remove(header::ETAG);
        Ok(Some(resp))
    }

    async fn on_unload(&self) -> Result<(), ExtensionFailure> {
        Ok(())
    }
}

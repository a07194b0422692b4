//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! ProxyRequest (top-level from the listener, or a sub-request)
//!     → depth check (sub-requests only)
//!     → PreFetch: on_request per extension, in order
//!         - first Some(response) short-circuits
//!     → Fetching: Fetcher::fetch (skipped after a short-circuit)
//!     → SubRequestCollection: on_collect_sub_requests for capable extensions,
//!       each sub-request handled recursively, grouped per extension
//!     → PostFetch: on_response per extension, in order
//!         - request head re-attached after every call
//!     → ProxyResponse
//! ```
//!
//! # Design Decisions
//! - Stages run strictly sequentially; sub-requests are depth-first
//! - A short-circuit response skips collection but still passes through
//!   every `on_response`
//! - A failed sub-request aborts its parent
//! - The kind of the request being processed is task-local, so callback
//!   sub-requests are nested under it no matter what the extension claims
//! - The only shared mutable state is the sequence counter

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use tracing::{debug, info, Instrument};

use crate::backend::{BackendDescriptor, Fetcher};
use crate::config::PipelineConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::extension::ExtensionRegistry;
use crate::http::{ProxyRequest, ProxyResponse, RequestKind};
use crate::observability::metrics;

tokio::task_local! {
    static CURRENT_KIND: RequestKind;
}

/// Kind of the request the pipeline is processing on this task, if any.
pub(crate) fn current_kind() -> Option<RequestKind> {
    CURRENT_KIND.try_with(|kind| *kind).ok()
}

/// Run blocking `f` with `kind` as the current request kind. Used where a
/// hook leaves the async task, e.g. for calls on the blocking pool.
pub(crate) fn with_kind<R>(kind: Option<RequestKind>, f: impl FnOnce() -> R) -> R {
    match kind {
        Some(kind) => CURRENT_KIND.sync_scope(kind, f),
        None => f(),
    }
}

/// Runs requests through the extension chain and the backend.
pub struct Pipeline {
    backend: BackendDescriptor,
    fetcher: Arc<dyn Fetcher>,
    extensions: Arc<ExtensionRegistry>,
    max_depth: u32,
    sequence: AtomicU64,
}

impl Pipeline {
    pub fn new(
        backend: BackendDescriptor,
        fetcher: Arc<dyn Fetcher>,
        extensions: Arc<ExtensionRegistry>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            backend,
            fetcher,
            extensions,
            max_depth: config.max_sub_request_depth,
            sequence: AtomicU64::new(0),
        }
    }

    /// Handle one request to completion.
    ///
    /// The request is borrowed mutably for the whole cycle; extensions and
    /// the fetcher edit it in place. Boxed because sub-requests re-enter.
    pub fn handle<'a>(&'a self, req: &'a mut ProxyRequest) -> BoxFuture<'a, ProxyResult<ProxyResponse>> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!(
            "request",
            seq,
            request_id = %req.id(),
            depth = req.kind().depth()
        );
        Box::pin(self.run(req).instrument(span))
    }

    async fn run(&self, req: &mut ProxyRequest) -> ProxyResult<ProxyResponse> {
        let started = Instant::now();
        let depth = req.kind().depth();
        if depth > self.max_depth {
            let err = ProxyError::SubRequestDepth {
                depth,
                limit: self.max_depth,
            };
            metrics::record_request(err.kind().as_str(), started);
            return Err(err);
        }

        if req.kind().is_sub_request() {
            debug!(method = %req.method(), uri = %req.uri(), "Handling sub-request");
        } else {
            info!(method = %req.method(), uri = %req.uri(), "Handling request");
        }

        let result = CURRENT_KIND.scope(req.kind(), self.process(req)).await;
        match &result {
            Ok(resp) => {
                info!(
                    status = resp.status().as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request complete"
                );
                metrics::record_request("ok", started);
            }
            Err(e) => metrics::record_request(e.kind().as_str(), started),
        }
        result
    }

    async fn process(&self, req: &mut ProxyRequest) -> ProxyResult<ProxyResponse> {
        let short_circuit = self.pre_fetch(req).await?;
        let fetched = short_circuit.is_none();

        let mut resp = match short_circuit {
            Some(resp) => resp,
            None => {
                debug!(stage = "Backend fetch", backend = %self.backend, "Fetching");
                self.fetcher.fetch(req, &self.backend).await?
            }
        };

        let head = Arc::new(req.head());
        resp.attach_request(head.clone());

        let sub_responses = if fetched {
            self.collect_sub_requests(req, &resp).await?
        } else {
            vec![Vec::new(); self.extensions.len()]
        };

        for (index, ext) in self.extensions.iter().enumerate() {
            debug!(stage = "OnResponse", extension = %ext.name(), "Calling extension");
            let subs = sub_responses.get(index).map(Vec::as_slice).unwrap_or(&[]);
            resp = match ext.extension().on_response(resp, subs).await {
                Ok(Some(next)) => next,
                Ok(None) => {
                    return Err(ProxyError::NullResponse {
                        name: ext.name().to_string(),
                    })
                }
                Err(e) => return Err(ProxyError::extension(ext.name(), e)),
            };
            resp.attach_request(head.clone());
        }

        resp.attach_request(head);
        Ok(resp)
    }

    /// Run `on_request` hooks until one produces a response.
    async fn pre_fetch(&self, req: &mut ProxyRequest) -> ProxyResult<Option<ProxyResponse>> {
        for ext in self.extensions.iter() {
            debug!(stage = "OnRequest", extension = %ext.name(), "Calling extension");
            match ext.extension().on_request(req).await {
                Ok(Some(resp)) => {
                    debug!(extension = %ext.name(), "Extension short-circuited backend fetch");
                    metrics::record_short_circuit(ext.name());
                    return Ok(Some(resp));
                }
                Ok(None) => {}
                Err(e) => return Err(ProxyError::extension(ext.name(), e)),
            }
        }
        Ok(None)
    }

    /// Gather and resolve sub-requests, grouped by the extension that asked.
    async fn collect_sub_requests(
        &self,
        req: &ProxyRequest,
        resp: &ProxyResponse,
    ) -> ProxyResult<Vec<Vec<ProxyResponse>>> {
        let parent_depth = req.kind().depth();
        let mut groups = Vec::with_capacity(self.extensions.len());

        for ext in self.extensions.iter() {
            let mut group = Vec::new();
            if ext.capabilities().collect_sub_requests {
                debug!(stage = "OnCollectSubRequests", extension = %ext.name(), "Calling extension");
                let subs = ext
                    .extension()
                    .on_collect_sub_requests(resp)
                    .await
                    .map_err(|e| ProxyError::extension(ext.name(), e))?;

                for mut sub in subs {
                    sub.mark_sub_request(parent_depth);
                    metrics::record_sub_request();
                    group.push(self.handle(&mut sub).await?);
                }
            }
            groups.push(group);
        }
        Ok(groups)
    }
}

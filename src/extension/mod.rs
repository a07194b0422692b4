//! Extension subsystem.
//!
//! # Data Flow
//! ```text
//! config.extensions.enabled (ordered names)
//!     → ModuleLoader::resolve(dir, name)
//!         - builtin.rs (in-process modules)
//!         - dylib.rs   (shared library at dir/name, C ABI)
//!     → ExtensionModule::init(ExtensionContext { raw config, SubRequester })
//!     → registry.rs (ordered, read-only after startup)
//!     → pipeline.rs calls on_request / on_collect_sub_requests / on_response
//!     → registry.rs unload at shutdown
//! ```
//!
//! # Design Decisions
//! - One trait with a fixed method set; optional capabilities are flagged,
//!   not expressed through separate traits
//! - Symbol lookup lives only in dylib.rs
//! - The pipeline keeps no per-extension state between requests

pub mod builtin;
pub mod dylib;
pub mod esi;
pub mod registry;
pub mod wire;

use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ExtensionFailure, ProxyError, ProxyResult};
use crate::http::{ProxyRequest, ProxyResponse};
use crate::pipeline::{current_kind, Pipeline};

pub use builtin::{BuiltinLoader, LoaderChain};
pub use dylib::DylibLoader;
pub use registry::ExtensionRegistry;

/// Optional capabilities an extension declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `on_collect_sub_requests` is meaningful and should be called.
    pub collect_sub_requests: bool,
}

/// Request/response interception hooks, called in registration order.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Pre-fetch hook. May mutate the request. Returning a response skips
    /// the remaining pre-fetch hooks and the backend fetch.
    async fn on_request(
        &self,
        req: &mut ProxyRequest,
    ) -> Result<Option<ProxyResponse>, ExtensionFailure>;

    /// Derive sub-requests from a fetched response. Only called when
    /// `capabilities().collect_sub_requests` is set.
    async fn on_collect_sub_requests(
        &self,
        resp: &ProxyResponse,
    ) -> Result<Vec<ProxyRequest>, ExtensionFailure> {
        let _ = resp;
        Ok(Vec::new())
    }

    /// Post-fetch hook. Receives the operative response and the responses
    /// to this extension's own sub-requests, in the order they were
    /// produced. Must return a response; `None` aborts the request.
    async fn on_response(
        &self,
        resp: ProxyResponse,
        sub_responses: &[ProxyResponse],
    ) -> Result<Option<ProxyResponse>, ExtensionFailure>;

    /// Shutdown hook.
    async fn on_unload(&self) -> Result<(), ExtensionFailure>;
}

/// What an extension receives when it is initialised.
#[derive(Clone)]
pub struct ExtensionContext {
    /// Name the extension was enabled under.
    pub name: String,
    /// Raw configuration blob (JSON), empty when none was given.
    pub config: Bytes,
    /// Callback for submitting requests back into the pipeline.
    pub sub_requests: SubRequester,
}

/// A resolved, not yet initialised module.
#[async_trait]
pub trait ExtensionModule: Send + Sync {
    async fn init(&self, ctx: ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionFailure>;
}

/// Finds the module for an extension name.
pub trait ModuleLoader: Send + Sync {
    fn resolve(&self, dir: &Path, name: &str) -> ProxyResult<Arc<dyn ExtensionModule>>;
}

/// Re-entry point into the pipeline, handed to extensions at load time.
///
/// Extensions are loaded before the pipeline exists, so the handle starts
/// unbound and is bound once the pipeline has been built.
///
/// A submitted request is nested one level below the request whose hook is
/// running, which the pipeline tracks itself. Submitting from outside a
/// hook (for example from a task the extension spawned) is refused.
#[derive(Clone, Default)]
pub struct SubRequester {
    pipeline: Arc<OnceLock<Weak<Pipeline>>>,
}

impl SubRequester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the handle at a pipeline. Later calls are ignored.
    pub fn bind(&self, pipeline: &Arc<Pipeline>) {
        if self.pipeline.set(Arc::downgrade(pipeline)).is_err() {
            tracing::warn!("Sub-request handle already bound");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.pipeline.get().is_some()
    }

    /// Run `req` through the pipeline as a sub-request of the request being
    /// processed.
    pub async fn submit(&self, mut req: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let pipeline = self
            .pipeline
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| ProxyError::extension("sub-request", "pipeline is not available"))?;
        let parent = current_kind().ok_or_else(|| {
            ProxyError::extension("sub-request", "no request is being processed on this task")
        })?;

        req.mark_sub_request(parent.depth());
        pipeline.handle(&mut req).await
    }
}

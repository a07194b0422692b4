//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with a catch-all handler
//! - Buffer each inbound body up to the configured cap
//! - Hand the request to the pipeline and write its response verbatim
//! - Render the generic error page on failure
//! - Serve on TCP or a Unix socket with graceful shutdown

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Request, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::PipelineConfig;
use crate::http::error_page;
use crate::http::ProxyRequest;
use crate::net::BoundListener;
use crate::pipeline::Pipeline;

/// Proxy identification header added to every response.
pub const X_PROXY_NAME: &str = "x-proxy-name";
pub const PROXY_NAME: &str = "extproxy";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub max_body_bytes: usize,
}

/// HTTP listener for the proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(pipeline: Arc<Pipeline>, config: &PipelineConfig) -> Self {
        let state = AppState {
            pipeline,
            max_body_bytes: config.max_body_bytes,
        };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for serving or driving directly in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: BoundListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(address = %listener.describe(), "HTTP server starting");

        match listener {
            BoundListener::Tcp(l) => {
                axum::serve(l, self.router)
                    .with_graceful_shutdown(shutdown)
                    .await?
            }
            #[cfg(unix)]
            BoundListener::Unix(l) => {
                axum::serve(l, self.router)
                    .with_graceful_shutdown(shutdown)
                    .await?
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn declared_length(req: &Request<Body>) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn proxy_name(mut response: Response) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static(X_PROXY_NAME),
        HeaderValue::from_static(PROXY_NAME),
    );
    response
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    if declared_length(&request).is_some_and(|len| len > state.max_body_bytes) {
        tracing::warn!(limit = state.max_body_bytes, "Request body over limit");
        return proxy_name(error_page::render(StatusCode::PAYLOAD_TOO_LARGE));
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            return proxy_name(error_page::render(StatusCode::BAD_REQUEST));
        }
    };

    let mut req = ProxyRequest::from_parts(parts, body);
    let request_id = req.id().clone();

    match state.pipeline.handle(&mut req).await {
        Ok(resp) => proxy_name(resp.into_http(&[])),
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                kind = %e.kind(),
                extension = e.extension_name().unwrap_or("-"),
                error = %e,
                "Request failed"
            );
            proxy_name(error_page::render(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

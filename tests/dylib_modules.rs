//! Shared-library modules loaded through the C ABI.
//!
//! The fixture crates under `tests/fixtures/` are built on first use into
//! a private target directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use serde_json::json;

use extproxy::backend::BackendDescriptor;
use extproxy::config::ExtensionsConfig;
use extproxy::error::ErrorKind;
use extproxy::extension::{DylibLoader, ExtensionRegistry, ModuleLoader, SubRequester};
use extproxy::http::ProxyRequest;

mod common;

fn fixture_dir() -> &'static Path {
    static BUILT: OnceLock<PathBuf> = OnceLock::new();
    BUILT.get_or_init(|| {
        let target = Path::new(env!("CARGO_TARGET_TMPDIR")).join("extension-fixtures");
        let status = Command::new(env!("CARGO"))
            .current_dir(env!("CARGO_MANIFEST_DIR"))
            .args(["build", "--quiet", "-p", "echo_ext", "-p", "partial_ext", "--target-dir"])
            .arg(&target)
            .status()
            .expect("cargo should run");
        assert!(status.success(), "building extension fixtures failed");
        target.join("debug")
    })
}

fn extensions(config: serde_json::Value) -> ExtensionsConfig {
    ExtensionsConfig {
        path: fixture_dir().to_path_buf(),
        enabled: vec!["echo_ext".into()],
        config: BTreeMap::from([("echo_ext".to_string(), config)]),
    }
}

fn get(path: &'static str) -> ProxyRequest {
    ProxyRequest::new(Method::GET, Uri::from_static(path))
        .with_header(header::HOST, HeaderValue::from_static("127.0.0.1"))
}

fn body_lines(body: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(body).lines().map(str::to_string).collect()
}

// One test drives every hook: the module keeps its host handle in a global.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn module_hooks_run_through_the_pipeline() {
    let sub_requests = SubRequester::new();
    let registry = Arc::new(
        ExtensionRegistry::load(&DylibLoader::new(), &extensions(json!({"tag": "fixture"})), &sub_requests)
            .await
            .unwrap(),
    );
    assert_eq!(registry.names(), vec!["echo"]);

    let pipeline = common::pipeline(BackendDescriptor::dummy(), registry.clone());
    sub_requests.bind(&pipeline);

    // request edits reach the backend; on_response edits reach the client
    let mut req = get("/plain");
    let resp = pipeline.handle(&mut req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_lines(resp.body()).contains(&"HTTP_X_ECHO=fixture".to_string()));
    assert_eq!(resp.headers().get("x-echo-out").unwrap(), "1");
    assert_eq!(req.headers().get("x-echo").unwrap(), "fixture");
    assert!(resp.answers(&req));

    // short-circuit still passes through on_response
    let mut req = get("/short");
    let resp = pipeline.handle(&mut req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
    assert_eq!(resp.body().as_ref(), b"short-circuit");
    assert_eq!(resp.headers().get("x-echo-out").unwrap(), "1");

    // sub-request through the host callback
    let mut req = get("/nested");
    let resp = pipeline.handle(&mut req).await.unwrap();
    let lines = body_lines(resp.body());
    assert!(lines.contains(&"PATH_INFO=/inner".to_string()));
    assert!(lines.contains(&"HTTP_X_SUB_REQUEST=1".to_string()));
    assert!(lines.contains(&"HTTP_X_ECHO=fixture".to_string()));

    // the module cannot reset the depth of its own callbacks
    let mut req = get("/loop");
    let err = pipeline.handle(&mut req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Extension);
    assert!(err.to_string().contains("sub-request depth 5 exceeds limit of 4"));

    registry.unload().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn module_rejecting_its_config_fails_load() {
    let err = ExtensionRegistry::load(&DylibLoader::new(), &extensions(json!({"tag": 7})), &SubRequester::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::ExtensionLoad);
    assert_eq!(err.extension_name(), Some("echo_ext"));
    assert!(err.to_string().contains("on_load returned error code 1"));
}

#[test]
fn missing_required_symbol_is_load_error() {
    let err = DylibLoader::new().resolve(fixture_dir(), "partial_ext").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ExtensionLoad);
    assert_eq!(err.extension_name(), Some("partial_ext"));
    assert!(err.to_string().contains("missing required symbol 'extproxy_on_request'"));
}

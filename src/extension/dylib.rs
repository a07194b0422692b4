//! Shared-library extension adapter.
//!
//! A module is a shared library at `<dir>/<name>` (or the platform file
//! name for `<name>`, e.g. `lib<name>.so`) exporting a C ABI. All symbol
//! lookup and `unsafe` code for extensions is confined to this file.
//!
//! # Exported symbols
//! ```text
//! required:
//!   extproxy_on_load(host: *const HostApi, config: ExtSlice) -> i32
//!   extproxy_on_request(req: ExtSlice, out: *mut ExtBuf) -> i32
//!   extproxy_on_response(args: ExtSlice, out: *mut ExtBuf) -> i32
//!   extproxy_on_unload() -> i32
//!   extproxy_free(buf: ExtBuf)
//! optional:
//!   extproxy_on_collect_sub_requests(resp: ExtSlice, out: *mut ExtBuf) -> i32
//!   extproxy_name() -> *const c_char
//! ```
//!
//! Payloads are JSON (see `wire.rs`). A non-zero return code means
//! failure and `out`, if set, holds a UTF-8 error message. Buffers written
//! to `out` are released with the module's `extproxy_free`; buffers the
//! host hands back from `HostApi::submit` are released with
//! `HostApi::free`.
//!
//! Calls into the module run on the blocking thread pool so a slow module
//! never stalls the async workers; the sub-request callback blocks that
//! thread on the pipeline. The callback takes a `WireRequest` and nests it
//! below the request whose hook made the call; the module has no say in
//! the depth.

use std::ffi::{c_char, c_void, CStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use libloading::{Library, Symbol};
use tokio::runtime::Handle;

use crate::error::{ExtensionFailure, ProxyError, ProxyResult};
use crate::extension::wire::{OnRequestReply, OnResponseArgs, WireRequest, WireResponse};
use crate::extension::{
    Capabilities, Extension, ExtensionContext, ExtensionModule, ModuleLoader, SubRequester,
};
use crate::http::{ProxyRequest, ProxyResponse};
use crate::pipeline;

/// Borrowed byte range passed into the module.
#[repr(C)]
pub struct ExtSlice {
    pub ptr: *const u8,
    pub len: usize,
}

impl ExtSlice {
    fn of(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }
}

/// Owned byte buffer handed across the boundary.
#[repr(C)]
pub struct ExtBuf {
    pub ptr: *mut u8,
    pub len: usize,
}

impl ExtBuf {
    fn empty() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
        }
    }
}

/// Host services offered to a module at load time.
#[repr(C)]
pub struct HostApi {
    pub ctx: *const c_void,
    pub submit: unsafe extern "C" fn(ctx: *const c_void, args: ExtSlice, out: *mut ExtBuf) -> i32,
    pub free: unsafe extern "C" fn(buf: ExtBuf),
}

type OnLoadFn = unsafe extern "C" fn(*const HostApi, ExtSlice) -> i32;
type CallFn = unsafe extern "C" fn(ExtSlice, *mut ExtBuf) -> i32;
type UnloadFn = unsafe extern "C" fn() -> i32;
type FreeFn = unsafe extern "C" fn(ExtBuf);
type NameFn = unsafe extern "C" fn() -> *const c_char;

const SYM_ON_LOAD: &[u8] = b"extproxy_on_load";
const SYM_ON_REQUEST: &[u8] = b"extproxy_on_request";
const SYM_ON_RESPONSE: &[u8] = b"extproxy_on_response";
const SYM_ON_UNLOAD: &[u8] = b"extproxy_on_unload";
const SYM_FREE: &[u8] = b"extproxy_free";
const SYM_COLLECT: &[u8] = b"extproxy_on_collect_sub_requests";
const SYM_NAME: &[u8] = b"extproxy_name";

/// Resolves extensions to shared libraries on disk.
#[derive(Debug, Default, Clone)]
pub struct DylibLoader;

impl DylibLoader {
    pub fn new() -> Self {
        Self
    }

    /// `<dir>/<name>`, else `<dir>/<platform file name for name>`.
    pub fn module_path(dir: &Path, name: &str) -> Option<PathBuf> {
        let exact = dir.join(name);
        if exact.is_file() {
            return Some(exact);
        }
        let platform = dir.join(libloading::library_filename(name));
        platform.is_file().then_some(platform)
    }
}

impl ModuleLoader for DylibLoader {
    fn resolve(&self, dir: &Path, name: &str) -> ProxyResult<Arc<dyn ExtensionModule>> {
        let path = Self::module_path(dir, name).ok_or_else(|| {
            ProxyError::extension_load(
                name,
                format!("module not found in '{}'", dir.display()),
            )
        })?;

        let symbols = unsafe { Symbols::open(&path) }
            .map_err(|e| ProxyError::extension_load(name, e))?;

        tracing::debug!(extension = %name, path = %path.display(), "Module resolved");
        Ok(Arc::new(DylibModule {
            symbols: Arc::new(symbols),
        }))
    }
}

/// Resolved entry points. The library stays open as long as this lives.
struct Symbols {
    on_load: OnLoadFn,
    on_request: CallFn,
    on_response: CallFn,
    on_unload: UnloadFn,
    free: FreeFn,
    collect: Option<CallFn>,
    name: Option<NameFn>,
    _library: Library,
}

impl Symbols {
    /// # Safety
    /// Running the library's initialisers and trusting the exported
    /// signatures is inherently unchecked.
    unsafe fn open(path: &Path) -> Result<Self, String> {
        let library = Library::new(path).map_err(|e| format!("failed to open '{}': {}", path.display(), e))?;

        unsafe fn required<T: Copy>(library: &Library, symbol: &[u8]) -> Result<T, String> {
            let sym: Symbol<T> = library.get(symbol).map_err(|e| {
                format!(
                    "missing required symbol '{}': {}",
                    String::from_utf8_lossy(symbol),
                    e
                )
            })?;
            Ok(*sym)
        }

        unsafe fn optional<T: Copy>(library: &Library, symbol: &[u8]) -> Option<T> {
            library.get::<T>(symbol).ok().map(|sym| *sym)
        }

        Ok(Self {
            on_load: required(&library, SYM_ON_LOAD)?,
            on_request: required(&library, SYM_ON_REQUEST)?,
            on_response: required(&library, SYM_ON_RESPONSE)?,
            on_unload: required(&library, SYM_ON_UNLOAD)?,
            free: required(&library, SYM_FREE)?,
            collect: optional(&library, SYM_COLLECT),
            name: optional(&library, SYM_NAME),
            _library: library,
        })
    }

    /// Call a `(ExtSlice, *mut ExtBuf) -> i32` entry point.
    fn call(&self, entry: CallFn, input: &[u8]) -> Result<Vec<u8>, ExtensionFailure> {
        let mut out = ExtBuf::empty();
        let code = unsafe { entry(ExtSlice::of(input), &mut out) };
        let bytes = unsafe { self.take(out) };
        if code != 0 {
            let message = String::from_utf8_lossy(&bytes).into_owned();
            return Err(ExtensionFailure::new(if message.is_empty() {
                format!("module returned error code {}", code)
            } else {
                message
            }));
        }
        Ok(bytes)
    }

    /// Copy a module-owned buffer and hand it back to the module.
    unsafe fn take(&self, buf: ExtBuf) -> Vec<u8> {
        if buf.ptr.is_null() {
            return Vec::new();
        }
        let bytes = std::slice::from_raw_parts(buf.ptr, buf.len).to_vec();
        (self.free)(buf);
        bytes
    }

    fn module_name(&self) -> Option<String> {
        let name_fn = self.name?;
        let ptr = unsafe { name_fn() };
        if ptr.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(ptr) };
        name.to_str().ok().filter(|n| !n.is_empty()).map(str::to_string)
    }
}

struct DylibModule {
    symbols: Arc<Symbols>,
}

#[async_trait]
impl ExtensionModule for DylibModule {
    async fn init(&self, ctx: ExtensionContext) -> Result<Arc<dyn Extension>, ExtensionFailure> {
        let host = HostBinding::new(ctx.sub_requests.clone());
        let symbols = self.symbols.clone();
        let config = ctx.config.clone();
        let api = host.api_ptr();

        let code = tokio::task::spawn_blocking(move || unsafe {
            (symbols.on_load)(api.get(), ExtSlice::of(&config))
        })
        .await
        .map_err(|e| ExtensionFailure::new(format!("on_load panicked: {}", e)))?;

        if code != 0 {
            return Err(ExtensionFailure::new(format!("on_load returned error code {}", code)));
        }

        let name = self.symbols.module_name().unwrap_or(ctx.name);
        Ok(Arc::new(DylibExtension {
            name,
            symbols: self.symbols.clone(),
            _host: host,
        }))
    }
}

/// Keeps the `HostApi` and its context alive for as long as the module
/// may call back into the host.
struct HostBinding {
    api: Box<HostApi>,
    _ctx: Box<HostContext>,
}

struct HostContext {
    sub_requests: SubRequester,
    runtime: Handle,
}

#[derive(Clone, Copy)]
struct ApiPtr(*const HostApi);

impl ApiPtr {
    fn get(self) -> *const HostApi {
        self.0
    }
}

// The pointee is immutable and owned by `HostBinding`, which outlives
// every call that receives the pointer.
unsafe impl Send for ApiPtr {}
unsafe impl Sync for HostBinding {}
unsafe impl Send for HostBinding {}

impl HostBinding {
    fn new(sub_requests: SubRequester) -> Self {
        let ctx = Box::new(HostContext {
            sub_requests,
            runtime: Handle::current(),
        });
        let api = Box::new(HostApi {
            ctx: &*ctx as *const HostContext as *const c_void,
            submit: host_submit,
            free: host_free,
        });
        Self { api, _ctx: ctx }
    }

    fn api_ptr(&self) -> ApiPtr {
        ApiPtr(&*self.api as *const HostApi)
    }
}

fn into_ext_buf(bytes: Vec<u8>) -> ExtBuf {
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    let ptr = Box::into_raw(boxed) as *mut u8;
    ExtBuf { ptr, len }
}

unsafe extern "C" fn host_free(buf: ExtBuf) {
    if !buf.ptr.is_null() {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(buf.ptr, buf.len)));
    }
}

/// Sub-request callback exposed to modules. Must be called from the
/// thread the host invoked the module on, during a hook call.
unsafe extern "C" fn host_submit(ctx: *const c_void, args: ExtSlice, out: *mut ExtBuf) -> i32 {
    if ctx.is_null() || out.is_null() || (args.ptr.is_null() && args.len != 0) {
        return -1;
    }
    let ctx = &*(ctx as *const HostContext);
    let input = if args.len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(args.ptr, args.len)
    };

    let result = (|| -> Result<Vec<u8>, String> {
        let wire: WireRequest = serde_json::from_slice(input).map_err(|e| e.to_string())?;
        let req = wire.into_request().map_err(|e| e.to_string())?;
        let resp = ctx
            .runtime
            .block_on(ctx.sub_requests.submit(req))
            .map_err(|e| e.to_string())?;
        let wire = WireResponse::from_response(&resp).map_err(|e| e.to_string())?;
        serde_json::to_vec(&wire).map_err(|e| e.to_string())
    })();

    match result {
        Ok(bytes) => {
            *out = into_ext_buf(bytes);
            0
        }
        Err(message) => {
            *out = into_ext_buf(message.into_bytes());
            1
        }
    }
}

struct DylibExtension {
    name: String,
    symbols: Arc<Symbols>,
    _host: HostBinding,
}

impl DylibExtension {
    async fn invoke(&self, entry: CallFn, input: Vec<u8>) -> Result<Vec<u8>, ExtensionFailure> {
        let symbols = self.symbols.clone();
        let kind = pipeline::current_kind();
        tokio::task::spawn_blocking(move || pipeline::with_kind(kind, || symbols.call(entry, &input)))
            .await
            .map_err(|e| ExtensionFailure::new(format!("module call panicked: {}", e)))?
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ExtensionFailure> {
    serde_json::to_vec(value).map_err(|e| ExtensionFailure::new(format!("encode failed: {}", e)))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ExtensionFailure> {
    serde_json::from_slice(bytes).map_err(|e| ExtensionFailure::new(format!("decode failed: {}", e)))
}

#[async_trait]
impl Extension for DylibExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            collect_sub_requests: self.symbols.collect.is_some(),
        }
    }

    async fn on_request(
        &self,
        req: &mut ProxyRequest,
    ) -> Result<Option<ProxyResponse>, ExtensionFailure> {
        let input = encode(&WireRequest::from_request(req)?)?;
        let output = self.invoke(self.symbols.on_request, input).await?;
        let reply: OnRequestReply = decode(&output)?;

        reply.request.apply_to(req)?;
        reply.response.map(WireResponse::into_response).transpose()
    }

    async fn on_collect_sub_requests(
        &self,
        resp: &ProxyResponse,
    ) -> Result<Vec<ProxyRequest>, ExtensionFailure> {
        let Some(collect) = self.symbols.collect else {
            return Ok(Vec::new());
        };
        let input = encode(&WireResponse::from_response(resp)?)?;
        let output = self.invoke(collect, input).await?;
        let requests: Vec<WireRequest> = decode(&output)?;
        requests.into_iter().map(WireRequest::into_request).collect()
    }

    async fn on_response(
        &self,
        resp: ProxyResponse,
        sub_responses: &[ProxyResponse],
    ) -> Result<Option<ProxyResponse>, ExtensionFailure> {
        let args = OnResponseArgs {
            response: WireResponse::from_response(&resp)?,
            sub_responses: sub_responses
                .iter()
                .map(WireResponse::from_response)
                .collect::<Result<_, _>>()?,
        };
        let output = self.invoke(self.symbols.on_response, encode(&args)?).await?;
        let reply: Option<WireResponse> = decode(&output)?;
        reply.map(WireResponse::into_response).transpose()
    }

    async fn on_unload(&self) -> Result<(), ExtensionFailure> {
        let symbols = self.symbols.clone();
        let code = tokio::task::spawn_blocking(move || unsafe { (symbols.on_unload)() })
            .await
            .map_err(|e| ExtensionFailure::new(format!("on_unload panicked: {}", e)))?;
        if code != 0 {
            return Err(ExtensionFailure::new(format!("on_unload returned error code {}", code)));
        }
        Ok(())
    }
}

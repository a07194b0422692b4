//! Test module for the shared-library extension ABI.
//!
//! Tags every request with `x-echo: <tag>` and every response with
//! `x-echo-out: 1`. By path:
//! - `/short`  answers 203 itself
//! - `/nested` fetches `/inner` through the host callback and answers with it
//! - `/loop`   re-submits itself through the host callback until refused
//!
//! Config: `{"tag": "<string>"}`, default tag `echo`.

use std::ffi::{c_char, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

#[repr(C)]
pub struct ExtSlice {
    pub ptr: *const u8,
    pub len: usize,
}

#[repr(C)]
pub struct ExtBuf {
    pub ptr: *mut u8,
    pub len: usize,
}

#[repr(C)]
pub struct HostApi {
    pub ctx: *const c_void,
    pub submit: unsafe extern "C" fn(ctx: *const c_void, args: ExtSlice, out: *mut ExtBuf) -> i32,
    pub free: unsafe extern "C" fn(buf: ExtBuf),
}

static HOST: AtomicPtr<HostApi> = AtomicPtr::new(std::ptr::null_mut());
static TAG: Mutex<String> = Mutex::new(String::new());

unsafe fn input<'a>(slice: &ExtSlice) -> &'a [u8] {
    if slice.ptr.is_null() || slice.len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(slice.ptr, slice.len)
    }
}

unsafe fn write(out: *mut ExtBuf, bytes: Vec<u8>) {
    if out.is_null() {
        return;
    }
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    *out = ExtBuf {
        ptr: Box::into_raw(boxed) as *mut u8,
        len,
    };
}

/// Write `result` to `out`: JSON on success, the message on failure.
unsafe fn reply(out: *mut ExtBuf, result: Result<Value, String>) -> i32 {
    match result.and_then(|value| serde_json::to_vec(&value).map_err(|e| e.to_string())) {
        Ok(bytes) => {
            write(out, bytes);
            0
        }
        Err(message) => {
            write(out, message.into_bytes());
            1
        }
    }
}

fn tag() -> String {
    TAG.lock().map(|t| t.clone()).unwrap_or_default()
}

fn push_header(message: &mut Value, name: &str, value: &str) {
    if let Some(headers) = message.get_mut("headers").and_then(Value::as_array_mut) {
        headers.push(json!([name, value]));
    } else {
        message["headers"] = json!([[name, value]]);
    }
}

fn submit(request: &Value) -> Result<Value, String> {
    let host = HOST.load(Ordering::Acquire);
    if host.is_null() {
        return Err("host api not bound".into());
    }
    let payload = serde_json::to_vec(request).map_err(|e| e.to_string())?;
    let mut out = ExtBuf {
        ptr: std::ptr::null_mut(),
        len: 0,
    };
    let (code, bytes) = unsafe {
        let api = &*host;
        let code = (api.submit)(
            api.ctx,
            ExtSlice {
                ptr: payload.as_ptr(),
                len: payload.len(),
            },
            &mut out,
        );
        let bytes = if out.ptr.is_null() {
            Vec::new()
        } else {
            let copy = std::slice::from_raw_parts(out.ptr, out.len).to_vec();
            (api.free)(out);
            copy
        };
        (code, bytes)
    };
    if code != 0 {
        return Err(String::from_utf8_lossy(&bytes).into_owned());
    }
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

fn handle_request(mut request: Value) -> Result<Value, String> {
    push_header(&mut request, "x-echo", &tag());
    let uri = request["uri"].as_str().unwrap_or("/").to_string();

    let response = match uri.as_str() {
        "/short" => json!({
            "status": 203,
            "headers": [["content-type", "text/plain"]],
            "body": b"short-circuit".to_vec(),
        }),
        "/nested" => submit(&json!({
            "method": "GET",
            "uri": "/inner",
            "headers": [["host", "127.0.0.1"]],
        }))?,
        "/loop" => submit(&json!({ "method": "GET", "uri": "/loop" }))?,
        _ => Value::Null,
    };
    Ok(json!({ "request": request, "response": response }))
}

#[no_mangle]
pub unsafe extern "C" fn extproxy_on_load(host: *const HostApi, config: ExtSlice) -> i32 {
    let raw = input(&config);
    let tag = if raw.is_empty() {
        "echo".to_string()
    } else {
        match serde_json::from_slice::<Value>(raw)
            .ok()
            .and_then(|c| c.get("tag").and_then(Value::as_str).map(str::to_string))
        {
            Some(tag) => tag,
            None => return 1,
        }
    };
    if let Ok(mut slot) = TAG.lock() {
        *slot = tag;
    }
    HOST.store(host as *mut HostApi, Ordering::Release);
    0
}

#[no_mangle]
pub unsafe extern "C" fn extproxy_on_request(req: ExtSlice, out: *mut ExtBuf) -> i32 {
    let result = serde_json::from_slice::<Value>(input(&req))
        .map_err(|e| e.to_string())
        .and_then(handle_request);
    reply(out, result)
}

#[no_mangle]
pub unsafe extern "C" fn extproxy_on_response(args: ExtSlice, out: *mut ExtBuf) -> i32 {
    let result = serde_json::from_slice::<Value>(input(&args))
        .map_err(|e| e.to_string())
        .map(|mut args| {
            let mut response = args["response"].take();
            push_header(&mut response, "x-echo-out", "1");
            response
        });
    reply(out, result)
}

#[no_mangle]
pub unsafe extern "C" fn extproxy_on_unload() -> i32 {
    HOST.store(std::ptr::null_mut(), Ordering::Release);
    0
}

#[no_mangle]
pub unsafe extern "C" fn extproxy_free(buf: ExtBuf) {
    if !buf.ptr.is_null() {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(buf.ptr, buf.len)));
    }
}

#[no_mangle]
pub extern "C" fn extproxy_name() -> *const c_char {
    b"echo\0".as_ptr() as *const c_char
}

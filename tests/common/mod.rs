//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use extproxy::backend::{BackendDescriptor, BackendFetcher};
use extproxy::config::PipelineConfig;
use extproxy::extension::ExtensionRegistry;
use extproxy::lifecycle::Shutdown;
use extproxy::{net, HttpServer, Pipeline};

/// A request as seen by a mock HTTP backend.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> &str {
        self.request_line.split(' ').nth(1).unwrap_or("")
    }
}

/// A canned backend reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    pub fn ok(content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            status: "200 OK",
            content_type,
            body: body.into(),
        }
    }

    pub fn status(status: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
        }
    }
}

async fn read_http_request(socket: &mut TcpStream) -> Option<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(SeenRequest {
        request_line,
        headers,
        body,
    })
}

/// Start a mock HTTP backend that answers by path. Returns its address and
/// the log of requests it received.
pub async fn start_http_backend<F>(route: F) -> (SocketAddr, Arc<Mutex<Vec<SeenRequest>>>)
where
    F: Fn(&SeenRequest) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let route = Arc::new(route);

    let log = seen.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let route = route.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let Some(request) = read_http_request(&mut socket).await else {
                    return;
                };
                let reply = route(&request);
                log.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.status,
                    reply.content_type,
                    reply.body.len(),
                    reply.body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, seen)
}

/// What a mock FastCGI responder received.
#[derive(Debug, Clone, Default)]
pub struct SeenFcgi {
    pub params: BTreeMap<String, String>,
    pub stdin: Vec<u8>,
}

fn read_length(data: &[u8], pos: &mut usize) -> usize {
    let first = data[*pos];
    if first & 0x80 == 0 {
        *pos += 1;
        first as usize
    } else {
        let len = u32::from_be_bytes([first & 0x7f, data[*pos + 1], data[*pos + 2], data[*pos + 3]]);
        *pos += 4;
        len as usize
    }
}

fn decode_params(data: &[u8]) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut pos = 0;
    while pos < data.len() {
        let name_len = read_length(data, &mut pos);
        let value_len = read_length(data, &mut pos);
        let name = String::from_utf8_lossy(&data[pos..pos + name_len]).into_owned();
        pos += name_len;
        let value = String::from_utf8_lossy(&data[pos..pos + value_len]).into_owned();
        pos += value_len;
        params.insert(name, value);
    }
    params
}

fn fcgi_record(record_type: u8, request_id: u16, content: &[u8]) -> Vec<u8> {
    let padding = (8 - content.len() % 8) % 8;
    let mut out = vec![1, record_type];
    out.extend_from_slice(&request_id.to_be_bytes());
    out.extend_from_slice(&(content.len() as u16).to_be_bytes());
    out.push(padding as u8);
    out.push(0);
    out.extend_from_slice(content);
    out.extend(std::iter::repeat(0).take(padding));
    out
}

async fn serve_fcgi(socket: &mut TcpStream, stdout: &[u8], stderr: &[u8]) -> Option<SeenFcgi> {
    let mut seen = SeenFcgi::default();
    let mut params = Vec::new();
    let mut request_id = 1u16;

    loop {
        let mut header = [0u8; 8];
        socket.read_exact(&mut header).await.ok()?;
        let record_type = header[1];
        request_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let padding = header[6] as usize;

        let mut content = vec![0u8; length + padding];
        socket.read_exact(&mut content).await.ok()?;
        content.truncate(length);

        match record_type {
            4 => params.extend_from_slice(&content),
            5 if content.is_empty() => break,
            5 => seen.stdin.extend_from_slice(&content),
            _ => {}
        }
    }
    seen.params = decode_params(&params);

    let mut reply = Vec::new();
    if !stderr.is_empty() {
        reply.extend(fcgi_record(7, request_id, stderr));
    }
    reply.extend(fcgi_record(6, request_id, stdout));
    reply.extend(fcgi_record(6, request_id, &[]));
    reply.extend(fcgi_record(3, request_id, &[0, 0, 0, 0, 0, 0, 0, 0]));
    socket.write_all(&reply).await.ok()?;
    let _ = socket.shutdown().await;
    Some(seen)
}

/// Start a mock FastCGI responder on TCP that replies with `stdout` as the
/// CGI output of every request.
pub async fn start_fcgi_backend(
    stdout: &'static str,
    stderr: &'static str,
) -> (SocketAddr, Arc<Mutex<Vec<SeenFcgi>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move {
                if let Some(request) = serve_fcgi(&mut socket, stdout.as_bytes(), stderr.as_bytes()).await {
                    log.lock().unwrap().push(request);
                }
            });
        }
    });

    (addr, seen)
}

/// Build a pipeline over the real backend fetcher.
pub fn pipeline(backend: BackendDescriptor, registry: Arc<ExtensionRegistry>) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        backend,
        Arc::new(BackendFetcher::new()),
        registry,
        &PipelineConfig::default(),
    ))
}

/// Serve `pipeline` on an ephemeral local port. Trigger the returned
/// `Shutdown` to stop it.
pub async fn start_proxy(pipeline: Arc<Pipeline>) -> (SocketAddr, Shutdown) {
    let listener = net::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.tcp_addr().unwrap();
    let shutdown = Shutdown::new();
    let stopped = shutdown.signalled();

    let server = HttpServer::new(pipeline, &PipelineConfig::default());
    tokio::spawn(async move {
        let _ = server.run(listener, stopped).await;
    });

    (addr, shutdown)
}

/// A reqwest client that never pools or uses system proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

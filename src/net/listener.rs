//! Listener binding.
//!
//! # Responsibilities
//! - Interpret the configured listen string
//! - Bind TCP when it names a port or socket address
//! - Fall back to a Unix-domain socket at that path otherwise
//!
//! # Design Decisions
//! - `":8081"` and `"8081"` mean every interface on that port
//! - A stale Unix socket file is not removed; binding fails instead

use std::fmt;
use std::net::SocketAddr;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind a TCP address.
    Bind(std::io::Error),
    /// Neither transport could be bound.
    BindEither {
        tcp: std::io::Error,
        unix: std::io::Error,
    },
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::BindEither { tcp, unix } => {
                write!(f, "Failed to bind (tcp: {}; unix: {})", tcp, unix)
            }
        }
    }
}

impl std::error::Error for ListenerError {}

/// A bound inbound socket.
#[derive(Debug)]
pub enum BoundListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl BoundListener {
    /// Human-readable local address for logs.
    pub fn describe(&self) -> String {
        match self {
            BoundListener::Tcp(l) => l
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp:?".to_string()),
            #[cfg(unix)]
            BoundListener::Unix(l) => l
                .local_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "unix:?".to_string()),
        }
    }

    /// Local TCP address, if bound to TCP.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            BoundListener::Tcp(l) => l.local_addr().ok(),
            #[cfg(unix)]
            BoundListener::Unix(_) => None,
        }
    }
}

/// Turn `":port"` / `"port"` into a wildcard socket address string.
fn normalize(listen: &str) -> String {
    if let Some(port) = listen.strip_prefix(':') {
        return format!("0.0.0.0:{}", port);
    }
    if !listen.is_empty() && listen.bytes().all(|b| b.is_ascii_digit()) {
        return format!("0.0.0.0:{}", listen);
    }
    listen.to_string()
}

/// Bind the configured listen address.
pub async fn bind(listen: &str) -> Result<BoundListener, ListenerError> {
    let addr = normalize(listen);

    if addr.parse::<SocketAddr>().is_ok() {
        let listener = TcpListener::bind(&addr).await.map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "Listener bound (tcp)");
        return Ok(BoundListener::Tcp(listener));
    }

    let tcp_err = match TcpListener::bind(&addr).await {
        Ok(listener) => {
            tracing::info!(address = %addr, "Listener bound (tcp)");
            return Ok(BoundListener::Tcp(listener));
        }
        Err(e) => e,
    };

    #[cfg(unix)]
    {
        match UnixListener::bind(listen) {
            Ok(listener) => {
                tracing::info!(path = %listen, "Listener bound (unix)");
                Ok(BoundListener::Unix(listener))
            }
            Err(unix) => Err(ListenerError::BindEither { tcp: tcp_err, unix }),
        }
    }

    #[cfg(not(unix))]
    {
        Err(ListenerError::Bind(tcp_err))
    }
}

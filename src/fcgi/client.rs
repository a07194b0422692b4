//! FastCGI client transport.
//!
//! # Responsibilities
//! - Connect to the backend over TCP, falling back to a Unix socket
//! - Send BEGIN_REQUEST, PARAMS and STDIN for a single request
//! - Collect STDOUT/STDERR until END_REQUEST
//!
//! # Design Decisions
//! - One request per connection, request id 1, connection closed afterwards
//! - A single connect attempt per transport; no retries

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::fcgi::params::FcgiParams;
use crate::fcgi::record::{
    encode_params, put_begin_request, put_stream, EndRequest, RecordHeader, RecordType,
    HEADER_LEN, REQUEST_COMPLETE, VERSION_1,
};

const REQUEST_ID: u16 = 1;

#[derive(Debug, Error)]
pub enum FcgiError {
    /// Neither transport accepted the connection.
    #[error("connect failed (tcp: {tcp}; unix: {unix})")]
    Connect { tcp: String, unix: String },

    /// The connection broke during the exchange.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend sent something that is not valid FastCGI.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Everything the responder wrote for one request.
#[derive(Debug, Default)]
pub struct FcgiOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub app_status: u32,
}

/// A connected FastCGI transport.
pub enum FcgiStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl FcgiStream {
    /// Try `address` as a TCP endpoint, then as a Unix socket path.
    pub async fn connect(address: &str) -> Result<Self, FcgiError> {
        let tcp_err = match TcpStream::connect(address).await {
            Ok(stream) => return Ok(FcgiStream::Tcp(stream)),
            Err(e) => e,
        };

        #[cfg(unix)]
        {
            match tokio::net::UnixStream::connect(address).await {
                Ok(stream) => Ok(FcgiStream::Unix(stream)),
                Err(unix_err) => Err(FcgiError::Connect {
                    tcp: tcp_err.to_string(),
                    unix: unix_err.to_string(),
                }),
            }
        }

        #[cfg(not(unix))]
        {
            Err(FcgiError::Connect {
                tcp: tcp_err.to_string(),
                unix: "unix sockets unsupported on this platform".to_string(),
            })
        }
    }

    /// Run one request over this connection.
    pub async fn request(self, params: &FcgiParams, stdin: &[u8]) -> Result<FcgiOutput, FcgiError> {
        match self {
            FcgiStream::Tcp(stream) => exchange(stream, params, stdin).await,
            #[cfg(unix)]
            FcgiStream::Unix(stream) => exchange(stream, params, stdin).await,
        }
    }
}

/// Write the request records and read the response records.
pub async fn exchange<S>(mut stream: S, params: &FcgiParams, stdin: &[u8]) -> Result<FcgiOutput, FcgiError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    put_begin_request(&mut buf, REQUEST_ID);
    put_stream(&mut buf, RecordType::Params, REQUEST_ID, &encode_params(params));
    put_stream(&mut buf, RecordType::Stdin, REQUEST_ID, stdin);
    stream.write_all(&buf).await?;
    stream.flush().await?;

    let mut output = FcgiOutput::default();
    let mut raw = [0u8; HEADER_LEN];
    loop {
        match stream.read_exact(&mut raw).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(FcgiError::Protocol(
                    "connection closed before END_REQUEST".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }
        let header = RecordHeader::parse(&raw);
        if header.version != VERSION_1 {
            return Err(FcgiError::Protocol(format!(
                "unsupported record version {}",
                header.version
            )));
        }

        let mut content = vec![0u8; header.content_length as usize];
        stream.read_exact(&mut content).await?;
        let mut padding = vec![0u8; header.padding_length as usize];
        stream.read_exact(&mut padding).await?;

        if header.request_id != REQUEST_ID {
            tracing::debug!(request_id = header.request_id, "Ignoring record for another request");
            continue;
        }

        match header.record_type {
            RecordType::Stdout => output.stdout.extend_from_slice(&content),
            RecordType::Stderr => output.stderr.extend_from_slice(&content),
            RecordType::EndRequest => {
                let end = EndRequest::parse(&content).ok_or_else(|| {
                    FcgiError::Protocol("short END_REQUEST body".to_string())
                })?;
                if end.protocol_status != REQUEST_COMPLETE {
                    return Err(FcgiError::Protocol(format!(
                        "request rejected with protocol status {}",
                        end.protocol_status
                    )));
                }
                output.app_status = end.app_status;
                return Ok(output);
            }
            other => {
                tracing::debug!(record_type = ?other, "Ignoring unexpected FastCGI record");
            }
        }
    }
}

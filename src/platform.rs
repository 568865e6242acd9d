//! Host-supplied transport primitives.
//!
//! The client does not implement TLS or SSH cryptography itself; the host
//! environment injects the primitives it has through [`Platform`]. Each
//! capability is optional, and dispatching a URL whose scheme needs an
//! absent capability is a config error. A plain TCP connector backed by
//! tokio ships with the crate behind the `tokio-net` feature.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errors::TransportError;
use crate::protocol::types::ByteStream;
use crate::remote::ParsedRemote;

/// A connected duplex byte channel split into halves.
pub struct ByteChannel {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl std::fmt::Debug for ByteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteChannel").finish_non_exhaustive()
    }
}

/// Opens raw TCP connections for the `git://` carrier.
#[async_trait]
pub trait TcpConnector: Send + Sync {
    async fn connect(&self, hostname: &str, port: u16) -> Result<ByteChannel, TransportError>;
}

/// An established SSH session able to execute remote commands.
#[async_trait]
pub trait SshSession: Send {
    /// Execute a remote command and expose its stdio as a byte channel.
    async fn exec(&mut self, command: &str) -> Result<ByteChannel, TransportError>;

    /// Close the session.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens SSH sessions for the `ssh://` carrier.
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, remote: &ParsedRemote) -> Result<Box<dyn SshSession>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// Request body: fully buffered, or streamed for chunked transfer.
pub enum HttpBody {
    Full(Bytes),
    Stream(ByteStream),
}

/// One HTTP request as the carrier issues it.
///
/// `auth` carries `user` or `user:password` for basic authentication; the
/// client implementation is responsible for encoding it.
pub struct HttpRequest {
    pub method: HttpMethod,
    pub tls: bool,
    pub hostname: String,
    pub port: u16,
    pub path: String,
    pub auth: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<HttpBody>,
}

/// Response with lowercase header names and a streaming body.
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Issues HTTP(S) requests for the smart-HTTP carrier.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// The set of transport capabilities the host environment provides.
#[derive(Clone, Default)]
pub struct Platform {
    pub tcp: Option<Arc<dyn TcpConnector>>,
    pub ssh: Option<Arc<dyn SshConnector>>,
    pub http: Option<Arc<dyn HttpClient>>,
}

impl Platform {
    /// A platform with no capabilities; add them with the `with_*` methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform with the built-in TCP connector.
    #[cfg(feature = "tokio-net")]
    pub fn with_defaults() -> Self {
        Self::new().with_tcp(TokioTcpConnector)
    }

    pub fn with_tcp(mut self, connector: impl TcpConnector + 'static) -> Self {
        self.tcp = Some(Arc::new(connector));
        self
    }

    pub fn with_ssh(mut self, connector: impl SshConnector + 'static) -> Self {
        self.ssh = Some(Arc::new(connector));
        self
    }

    pub fn with_http(mut self, client: impl HttpClient + 'static) -> Self {
        self.http = Some(Arc::new(client));
        self
    }
}

/// TCP connector backed by `tokio::net::TcpStream`.
#[cfg(feature = "tokio-net")]
pub struct TokioTcpConnector;

#[cfg(feature = "tokio-net")]
#[async_trait]
impl TcpConnector for TokioTcpConnector {
    async fn connect(&self, hostname: &str, port: u16) -> Result<ByteChannel, TransportError> {
        let stream = tokio::net::TcpStream::connect((hostname, port))
            .await
            .map_err(|e| TransportError::transport(format!("connect {hostname}:{port}: {e}")))?;
        let (reader, writer) = stream.into_split();
        Ok(ByteChannel {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}

//! Error types for the git-transport crate.
//!
//! One unified enumeration covers the whole client: framing and grammar
//! violations, explicit server-sent errors, carrier failures, missing
//! platform capabilities, and misuse of the single-reader streams. Every
//! failure surfaces to the nearest caller; the only automatic retry in the
//! crate is the single HTTP redirect follow.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the git-transport client.
pub enum TransportError {
    /// Malformed framing, unexpected tokens, or wrong response headers from the remote.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Explicit `ERR` line sent by the remote end.
    #[error("Server error: {0}")]
    Server(String),

    /// Socket or channel failure outside this crate's control.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error from the underlying reader or writer.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing required remote fields, an unparseable remote, or a scheme
    /// the configured platform cannot serve.
    #[error("Config error: {0}")]
    Config(String),

    /// A second read was issued while another one was still pending.
    #[error("Only one read at a time")]
    ConcurrentRead,

    /// The connection was aborted while an operation was in flight.
    #[error("Connection aborted")]
    Aborted,
}

impl TransportError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        TransportError::Protocol(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        TransportError::Server(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        TransportError::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TransportError::Config(msg.into())
    }
}

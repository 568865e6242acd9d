//! Git-Transport: a client for the Git smart transport protocol — ref
//! discovery, want/have negotiation, and side-band pack streaming over
//! TCP, SSH, and HTTP(S).
//!
//! Goals
//! - Speak the byte-exact pkt-line wire grammar over three unrelated
//!   carriers behind one uniform interface.
//! - Run the asynchronous negotiation state machine that differs subtly
//!   per carrier: connection lifecycle, preambles, redirects.
//! - Demultiplex the side-band response stream so callers receive pack
//!   bytes while progress and error text flow to side channels.
//!
//! Core Capabilities
//! - Discovery: parse a ref advertisement into a ref map plus capability
//!   set, including the empty-repository placeholder.
//! - Fetch: want/have/done negotiation with shallow support, returning a
//!   single-reader pack stream bound to the connection.
//! - Carriers: `git://` daemon sockets, SSH exec channels, and smart
//!   HTTP(S) with a single redirect follow and optional chunked upload.
//!
//! Modules
//! - `protocol`: pkt-line codec, pull-stream adapter, discovery, fetch.
//! - `transport`: the three carriers and the scheme dispatcher.
//! - `remote`: URL and SCP-style remote parsing.
//! - `platform`: host-injected transport primitives (TCP/SSH/HTTP).
//! - `errors`: unified error type.
//!
//! Typical Usage
//! - Build a [`Platform`] with the capabilities the host has, then
//!   `transport::open(&platform, url)` and call `discover`, `fetch`,
//!   `close` on the returned carrier. Pack bytes from
//!   [`PackReader::read`] go to the repository layer; this crate never
//!   decodes them.
//!
//! The crate performs no TLS or SSH cryptography itself; those arrive as
//! injected primitives. There are no timeouts at this layer, and the only
//! automatic retry is the single HTTP redirect follow.

pub mod errors;
pub mod platform;
pub mod protocol;
pub mod remote;
pub mod transport;

pub use errors::TransportError;
pub use platform::{
    ByteChannel, HttpBody, HttpClient, HttpMethod, HttpRequest, HttpResponse, Platform,
    SshConnector, SshSession, TcpConnector,
};
pub use protocol::{
    Capabilities, Connection, FetchOptions, PackReader, PackStreamItem, Pkt, RefAdvertisement,
    RefStore,
};
pub use remote::{ParsedRemote, Scheme};
pub use transport::{Transport, open};

#[cfg(feature = "tokio-net")]
pub use platform::TokioTcpConnector;

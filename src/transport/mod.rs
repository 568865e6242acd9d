//! Transport carriers and the scheme dispatcher.
//!
//! Every carrier exposes the same three operations: `discover` the remote's
//! refs, `fetch` missing objects through a negotiated pack stream, and
//! `close`. [`open`] picks the carrier from the URL scheme, gated by the
//! capabilities the host platform provides.

pub mod http;
pub mod ssh;
pub mod tcp;
mod wire;

use async_trait::async_trait;

pub use self::http::HttpTransport;
pub use self::ssh::SshTransport;
pub use self::tcp::TcpTransport;
pub use self::wire::WireConnection;
use crate::errors::TransportError;
use crate::platform::Platform;
use crate::protocol::core::RefStore;
use crate::protocol::fetch::{FetchOptions, PackReader};
use crate::protocol::types::RefAdvertisement;
use crate::remote::{ParsedRemote, Scheme};

/// Uniform interface over the TCP, SSH, and HTTP carriers.
#[async_trait]
pub trait Transport: Send + std::fmt::Debug {
    /// Run ref discovery, connecting first if the carrier needs it.
    async fn discover(&mut self) -> Result<RefAdvertisement, TransportError>;

    /// Negotiate and stream missing objects; `None` when `wants` was empty.
    async fn fetch(
        &mut self,
        repo: &dyn RefStore,
        opts: FetchOptions,
    ) -> Result<Option<PackReader>, TransportError>;

    /// Release the carrier's resources.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Open a transport for `url` using the capabilities `platform` provides.
pub fn open(platform: &Platform, url: &str) -> Result<Box<dyn Transport>, TransportError> {
    let remote = ParsedRemote::parse(url)?;
    match remote.scheme {
        Scheme::Git => {
            let connector = platform
                .tcp
                .clone()
                .ok_or_else(|| TransportError::config("platform does not support git: urls"))?;
            Ok(Box::new(TcpTransport::new(remote, connector)))
        }
        Scheme::Http | Scheme::Https => {
            let client = platform
                .http
                .clone()
                .ok_or_else(|| TransportError::config("platform does not support http(s): urls"))?;
            Ok(Box::new(HttpTransport::new(remote, client)))
        }
        Scheme::Ssh => {
            let connector = platform
                .ssh
                .clone()
                .ok_or_else(|| TransportError::config("platform does not support ssh: urls"))?;
            Ok(Box::new(SshTransport::new(remote, connector)?))
        }
        Scheme::Ws | Scheme::Wss => {
            Err(TransportError::config("platform does not support ws(s): urls"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::platform::{ByteChannel, TcpConnector};

    struct NullTcp;

    #[async_trait]
    impl TcpConnector for NullTcp {
        async fn connect(&self, _hostname: &str, _port: u16) -> Result<ByteChannel, TransportError> {
            Err(TransportError::transport("unreachable in this test"))
        }
    }

    #[test]
    fn missing_capability_is_a_config_error() {
        let platform = Platform::new();
        for url in [
            "git://host/repo.git",
            "https://host/repo.git",
            "ssh://git@host/repo.git",
        ] {
            let err = open(&platform, url).unwrap_err();
            assert!(matches!(err, TransportError::Config(_)), "{url}");
        }
    }

    #[test]
    fn ws_schemes_have_no_carrier() {
        let platform = Platform::new();
        let err = open(&platform, "ws://host/repo").unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn unknown_remote_format_is_a_config_error() {
        let platform = Platform::new();
        let err = open(&platform, "ftp://host/repo").unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn git_scheme_dispatches_when_tcp_is_present() {
        let platform = Platform {
            tcp: Some(Arc::new(NullTcp)),
            ..Platform::new()
        };
        assert!(open(&platform, "git://host/repo.git").is_ok());
    }
}

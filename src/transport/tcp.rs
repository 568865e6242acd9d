//! Raw `git://` daemon carrier.
//!
//! Opens a socket on first use, writes the `git-upload-pack` preamble, and
//! keeps the same connection for the fetch that follows discovery.

use std::sync::Arc;

use async_trait::async_trait;

use super::Transport;
use super::wire::WireConnection;
use crate::errors::TransportError;
use crate::platform::TcpConnector;
use crate::protocol::core::{Connection, RefStore};
use crate::protocol::discovery;
use crate::protocol::fetch::{self, FetchOptions, PackReader};
use crate::protocol::types::{Pkt, RefAdvertisement};
use crate::remote::ParsedRemote;

pub struct TcpTransport {
    remote: ParsedRemote,
    connector: Arc<dyn TcpConnector>,
    conn: Option<Arc<WireConnection>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    pub fn new(remote: ParsedRemote, connector: Arc<dyn TcpConnector>) -> Self {
        Self {
            remote,
            connector,
            conn: None,
        }
    }

    async fn connection(&mut self) -> Result<Arc<WireConnection>, TransportError> {
        if let Some(conn) = &self.conn {
            return Ok(conn.clone());
        }
        tracing::debug!(
            host = %self.remote.hostname,
            port = self.remote.port,
            "opening git daemon connection"
        );
        let channel = self
            .connector
            .connect(&self.remote.hostname, self.remote.port)
            .await?;
        let conn = Arc::new(WireConnection::new(channel));
        self.conn = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn discover(&mut self) -> Result<RefAdvertisement, TransportError> {
        let conn = self.connection().await?;
        let preamble = format!(
            "git-upload-pack {}\0host={}\0",
            self.remote.pathname, self.remote.hostname
        );
        conn.send(Pkt::data(preamble)).await?;
        discovery::discover(conn.input()).await
    }

    async fn fetch(
        &mut self,
        repo: &dyn RefStore,
        opts: FetchOptions,
    ) -> Result<Option<PackReader>, TransportError> {
        let conn = self
            .conn
            .clone()
            .ok_or_else(|| TransportError::config("connect before fetching"))?;
        fetch::negotiate(conn, repo, opts).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(conn) = self.conn.take() {
            conn.shutdown_output().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::{AsyncWriteExt, DuplexStream, duplex, split};
    use tokio::sync::Mutex;

    use super::*;
    use crate::platform::ByteChannel;
    use crate::protocol::pktline::{PktDecoder, encode_data, encode_flush};

    const SHA: &str = "8a4f3e0c2b1d5a6978695a4b3c2d1e0f9a8b7c6d";

    /// Hands out one pre-wired in-memory channel, then refuses.
    struct OneShotConnector {
        channel: Mutex<Option<ByteChannel>>,
        seen: std::sync::Mutex<Vec<(String, u16)>>,
    }

    impl OneShotConnector {
        fn new(stream: DuplexStream) -> Self {
            let (reader, writer) = split(stream);
            Self {
                channel: Mutex::new(Some(ByteChannel {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                })),
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TcpConnector for OneShotConnector {
        async fn connect(&self, hostname: &str, port: u16) -> Result<ByteChannel, TransportError> {
            self.seen
                .lock()
                .unwrap()
                .push((hostname.to_string(), port));
            self.channel
                .lock()
                .await
                .take()
                .ok_or_else(|| TransportError::transport("already connected"))
        }
    }

    async fn read_frames(stream: &mut DuplexStream, want: usize) -> Vec<Pkt> {
        use tokio::io::AsyncReadExt;
        let mut decoder = PktDecoder::new();
        let mut frames = std::collections::VecDeque::new();
        let mut buf = [0u8; 4096];
        while frames.len() < want {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed early");
            decoder.push(&buf[..n], &mut frames).unwrap();
        }
        frames.into_iter().collect()
    }

    #[tokio::test]
    async fn discover_writes_preamble_and_parses_advertisement() {
        let (client_end, mut server_end) = duplex(64 * 1024);
        let connector = Arc::new(OneShotConnector::new(client_end));
        let remote = ParsedRemote::parse("git://daemon.example.com/srv/repo.git").unwrap();
        let mut transport = TcpTransport::new(remote, connector.clone());

        let server = tokio::spawn(async move {
            let frames = read_frames(&mut server_end, 1).await;
            assert_eq!(
                frames,
                vec![Pkt::Data(Bytes::from_static(
                    b"git-upload-pack /srv/repo.git\0host=daemon.example.com\0"
                ))]
            );
            let mut reply = Vec::new();
            reply.extend_from_slice(
                &encode_data(format!("{SHA} HEAD\0multi_ack\n").as_bytes()).unwrap(),
            );
            reply.extend_from_slice(&encode_flush());
            server_end.write_all(&reply).await.unwrap();
            server_end
        });

        let adv = transport.discover().await.unwrap();
        assert_eq!(adv.refs["HEAD"], SHA);
        assert!(adv.caps.contains("multi_ack"));
        assert_eq!(
            *connector.seen.lock().unwrap(),
            vec![("daemon.example.com".to_string(), 9418)]
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn fetch_before_discover_is_a_config_error() {
        let (client_end, _server_end) = duplex(1024);
        let connector = Arc::new(OneShotConnector::new(client_end));
        let remote = ParsedRemote::parse("git://host/repo.git").unwrap();
        let mut transport = TcpTransport::new(remote, connector);

        struct NoRefs;
        #[async_trait]
        impl RefStore for NoRefs {
            async fn list_refs(
                &self,
                _prefix: &str,
            ) -> Result<Vec<(String, String)>, TransportError> {
                Ok(vec![])
            }
            async fn create_ref(&self, _name: &str, _hash: &str) -> Result<(), TransportError> {
                Ok(())
            }
        }

        let err = transport
            .fetch(&NoRefs, FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[tokio::test]
    async fn close_without_connection_is_a_no_op() {
        let (client_end, _server_end) = duplex(1024);
        let connector = Arc::new(OneShotConnector::new(client_end));
        let remote = ParsedRemote::parse("git://host/repo.git").unwrap();
        let mut transport = TcpTransport::new(remote, connector);
        transport.close().await.unwrap();
    }
}

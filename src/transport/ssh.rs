//! SSH exec-channel carrier.
//!
//! Lazily opens a session through the injected [`SshConnector`] and execs
//! `git-upload-pack '<pathname>'`; the channel's stdio gets the same
//! pkt-line wiring as the TCP carrier. Fetch requires a prior successful
//! discover — the connection is never established implicitly.

use std::sync::Arc;

use async_trait::async_trait;

use super::Transport;
use super::wire::WireConnection;
use crate::errors::TransportError;
use crate::platform::{SshConnector, SshSession};
use crate::protocol::core::RefStore;
use crate::protocol::discovery;
use crate::protocol::fetch::{self, FetchOptions, PackReader};
use crate::protocol::types::RefAdvertisement;
use crate::remote::ParsedRemote;

pub struct SshTransport {
    remote: ParsedRemote,
    connector: Arc<dyn SshConnector>,
    session: Option<Box<dyn SshSession>>,
    conn: Option<Arc<WireConnection>>,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl SshTransport {
    pub fn new(remote: ParsedRemote, connector: Arc<dyn SshConnector>) -> Result<Self, TransportError> {
        if remote.hostname.is_empty() {
            return Err(TransportError::config("hostname is a required option"));
        }
        if remote.pathname.is_empty() {
            return Err(TransportError::config("pathname is a required option"));
        }
        Ok(Self {
            remote,
            connector,
            session: None,
            conn: None,
        })
    }

    async fn connection(&mut self) -> Result<Arc<WireConnection>, TransportError> {
        if let Some(conn) = &self.conn {
            return Ok(conn.clone());
        }
        tracing::debug!(host = %self.remote.hostname, "opening ssh session");
        let mut session = self.connector.connect(&self.remote).await?;
        let command = format!("git-upload-pack '{}'", self.remote.pathname);
        let channel = session.exec(&command).await?;
        let conn = Arc::new(WireConnection::new(channel));
        self.session = Some(session);
        self.conn = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn discover(&mut self) -> Result<RefAdvertisement, TransportError> {
        let conn = self.connection().await?;
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
        if let Some(mut session) = self.session.take() {
            session.close().await?;
        }
        Ok(())
    }
}

//! Collaborator and connection traits consumed by discovery and negotiation.
//!
//! The transport layer never decodes objects itself: fetched pack bytes are
//! handed to the repository collaborator behind [`RefStore`], and every
//! carrier funnels through the pkt-oriented [`Connection`] contract.

use async_trait::async_trait;

use super::types::Pkt;
use crate::errors::TransportError;

/// Storage-side collaborator used during negotiation.
#[async_trait]
pub trait RefStore: Send + Sync {
    /// List local refs under `prefix` as `(name, hash)` pairs.
    async fn list_refs(&self, prefix: &str) -> Result<Vec<(String, String)>, TransportError>;

    /// Record a ref, e.g. the shallow boundaries reported by the server.
    async fn create_ref(&self, name: &str, hash: &str) -> Result<(), TransportError>;
}

/// One duplex pkt-line channel to the remote.
///
/// Writes for a negotiation complete strictly before its read loop starts;
/// that ordering is program order, not locking. Exactly one read may be
/// outstanding at a time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Queue one pkt for the remote end.
    async fn send(&self, pkt: Pkt) -> Result<(), TransportError>;

    /// Next pkt from the remote, `None` at end of stream.
    async fn recv(&self) -> Result<Option<Pkt>, TransportError>;

    /// Tear the channel down, unblocking any pending read with an error.
    fn abort(&self);
}

//! Socket-shaped pkt-line connection shared by the TCP and SSH carriers.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::errors::TransportError;
use crate::platform::ByteChannel;
use crate::protocol::core::Connection;
use crate::protocol::pktline;
use crate::protocol::stream::PktStream;
use crate::protocol::types::Pkt;

/// A duplex byte channel with pkt-line framing in both directions.
pub struct WireConnection {
    input: PktStream,
    output: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl WireConnection {
    pub fn new(channel: ByteChannel) -> Self {
        Self {
            input: PktStream::from_reader(channel.reader),
            output: Mutex::new(Some(channel.writer)),
        }
    }

    /// The decoded input side, for running discovery directly.
    pub fn input(&self) -> &PktStream {
        &self.input
    }

    /// Signal end of output to the remote.
    pub async fn shutdown_output(&self) -> Result<(), TransportError> {
        let mut output = self.output.lock().await;
        if let Some(writer) = output.as_mut() {
            writer.shutdown().await?;
            *output = None;
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for WireConnection {
    async fn send(&self, pkt: Pkt) -> Result<(), TransportError> {
        let frame = pktline::encode(&pkt)?;
        let mut output = self.output.lock().await;
        let writer = output
            .as_mut()
            .ok_or_else(|| TransportError::transport("connection output already closed"))?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        tracing::trace!(bytes = frame.len(), "wire frame sent");
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Pkt>, TransportError> {
        self.input.read().await
    }

    fn abort(&self) {
        self.input.abort();
    }
}

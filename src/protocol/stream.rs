//! Pull adapter turning raw byte chunks into a stream of decoded pkt-lines.
//!
//! `PktStream` holds a FIFO of already-decoded, not-yet-delivered frames.
//! A read drains the FIFO first; only when it is empty does it pull exactly
//! one chunk from the underlying source and feed the decoder, which may
//! enqueue zero or more frames. At most one read may be in flight; a second
//! concurrent read fails immediately instead of queueing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, Notify};

use super::pktline::PktDecoder;
use super::types::{ByteStream, Pkt};
use crate::errors::TransportError;

const READ_CHUNK: usize = 8 * 1024;

/// Pull source yielding raw byte chunks, `None` at end of input.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Source over any `AsyncRead` half.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ChunkSource for ReaderSource<R> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = self.reader.read_buf(&mut buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(buf.freeze()))
        }
    }
}

/// Source over a boxed byte stream, e.g. an HTTP response body.
pub struct StreamSource {
    inner: ByteStream,
}

impl StreamSource {
    pub fn new(inner: ByteStream) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ChunkSource for StreamSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.inner.next().await.transpose()
    }
}

struct StreamState {
    source: Box<dyn ChunkSource>,
    decoder: PktDecoder,
    queue: VecDeque<Pkt>,
    eof: bool,
    failed: bool,
}

/// Single-reader pull stream of decoded pkt-lines.
pub struct PktStream {
    state: Mutex<StreamState>,
    abort_signal: Notify,
    aborted: AtomicBool,
}

impl PktStream {
    pub fn new(source: Box<dyn ChunkSource>) -> Self {
        Self {
            state: Mutex::new(StreamState {
                source,
                decoder: PktDecoder::new(),
                queue: VecDeque::new(),
                eof: false,
                failed: false,
            }),
            abort_signal: Notify::new(),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn from_reader(reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Self::new(Box::new(ReaderSource::new(reader)))
    }

    pub fn from_stream(stream: ByteStream) -> Self {
        Self::new(Box::new(StreamSource::new(stream)))
    }

    /// Next decoded pkt, or `None` once the source is drained.
    ///
    /// Fails with [`TransportError::ConcurrentRead`] if another read is
    /// still pending, and with [`TransportError::Aborted`] once the stream
    /// was aborted. After a source or framing failure the stream stays
    /// unusable.
    pub async fn read(&self) -> Result<Option<Pkt>, TransportError> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| TransportError::ConcurrentRead)?;
        if self.aborted.load(Ordering::Acquire) {
            return Err(TransportError::Aborted);
        }
        if state.failed {
            return Err(TransportError::transport(
                "stream is unusable after an earlier failure",
            ));
        }

        let StreamState {
            source,
            decoder,
            queue,
            eof,
            failed,
        } = &mut *state;
        loop {
            if let Some(pkt) = queue.pop_front() {
                return Ok(Some(pkt));
            }
            if *eof {
                return Ok(None);
            }
            let chunk = tokio::select! {
                _ = self.abort_signal.notified() => return Err(TransportError::Aborted),
                chunk = source.next_chunk() => chunk,
            };
            match chunk {
                Ok(Some(chunk)) => {
                    tracing::trace!(bytes = chunk.len(), "pkt stream chunk");
                    if let Err(err) = decoder.push(&chunk, queue) {
                        *failed = true;
                        return Err(err);
                    }
                }
                Ok(None) => {
                    *eof = true;
                    if let Err(err) = decoder.finish() {
                        *failed = true;
                        return Err(err);
                    }
                }
                Err(err) => {
                    *failed = true;
                    return Err(err);
                }
            }
        }
    }

    /// Wake any pending read with an error and mark the stream dead.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.abort_signal.notify_one();
    }
}

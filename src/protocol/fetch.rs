//! Want/have negotiation and the demultiplexed pack stream it yields.
//!
//! The negotiator writes the full request first (want lines, optional
//! deepen, flush, have lines, `done`), then enters the response loop.
//! `shallow` lines are recorded through the repository collaborator; an
//! `ACK` or `NAK` completes the negotiation and hands back a [`PackReader`]
//! bound to the same connection.

use std::sync::Arc;

use bstr::ByteSlice;
use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;

use super::core::{Connection, RefStore};
use super::types::{CAP_SIDE_BAND, CAP_SIDE_BAND_64K, PackStreamItem, Pkt, SideBand};
use crate::errors::TransportError;

/// Side-channel callback for progress or error text.
pub type TextSink = Box<dyn FnMut(Bytes) + Send>;

/// Options for one fetch negotiation.
#[derive(Default)]
pub struct FetchOptions {
    /// Object hashes the caller wants.
    pub wants: Vec<String>,
    /// History depth for a shallow fetch.
    pub depth: Option<u32>,
    /// Capability tokens to request on the first want line.
    pub caps: Vec<String>,
    /// Receives side-band progress text.
    pub on_progress: Option<TextSink>,
    /// Receives side-band error text.
    pub on_error: Option<TextSink>,
    /// Line-buffer progress/error text before invoking the callbacks.
    pub deline: bool,
}

impl FetchOptions {
    pub fn new(wants: Vec<String>) -> Self {
        Self {
            wants,
            ..Default::default()
        }
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn caps<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.caps = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_progress(mut self, sink: impl FnMut(Bytes) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(sink));
        self
    }

    pub fn on_error(mut self, sink: impl FnMut(Bytes) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(sink));
        self
    }

    pub fn deline(mut self, deline: bool) -> Self {
        self.deline = deline;
        self
    }
}

/// Run one want/have negotiation over `conn`.
///
/// Returns `None` when `wants` is empty: the request is closed out with a
/// flush and `done`, and no response is read. Otherwise the local have set
/// is every ref the collaborator lists under `refs`, related to the fetch
/// or not.
pub async fn negotiate(
    conn: Arc<dyn Connection>,
    repo: &dyn RefStore,
    opts: FetchOptions,
) -> Result<Option<PackReader>, TransportError> {
    let FetchOptions {
        wants,
        depth,
        caps,
        mut on_progress,
        mut on_error,
        deline,
    } = opts;

    if deline {
        on_progress = on_progress.map(deline_sink);
        on_error = on_error.map(deline_sink);
    }

    if wants.is_empty() {
        conn.send(Pkt::Flush).await?;
        conn.send(Pkt::data("done\n")).await?;
        return Ok(None);
    }

    let side_band = caps
        .iter()
        .any(|cap| cap == CAP_SIDE_BAND || cap == CAP_SIDE_BAND_64K);

    let local_refs = repo.list_refs("refs").await?;

    for (index, want) in wants.iter().enumerate() {
        let line = if index == 0 && !caps.is_empty() {
            format!("want {want} {}\n", caps.join(" "))
        } else {
            format!("want {want}\n")
        };
        conn.send(Pkt::data(line)).await?;
    }
    if let Some(depth) = depth {
        conn.send(Pkt::data(format!("deepen {depth}\n"))).await?;
    }
    conn.send(Pkt::Flush).await?;

    for (_, hash) in &local_refs {
        conn.send(Pkt::data(format!("have {hash}\n"))).await?;
    }
    conn.send(Pkt::data("done\n")).await?;
    tracing::debug!(
        wants = wants.len(),
        haves = local_refs.len(),
        "negotiation request sent"
    );

    loop {
        let line = match conn.recv().await? {
            None => {
                return Err(TransportError::transport(
                    "server disconnected during negotiation",
                ));
            }
            Some(Pkt::Flush) => continue,
            Some(Pkt::Data(line)) => line,
        };
        let line = line.trim();
        let (command, value) = match line.find_byte(b' ') {
            Some(space) => (&line[..space], Some(&line[space + 1..])),
            None => (line, None),
        };
        match &*command.to_str_lossy() {
            "shallow" => {
                let hash = value.filter(|v| !v.is_empty()).ok_or_else(|| {
                    TransportError::protocol("shallow line without an object hash")
                })?;
                repo.create_ref("shallow", &hash.to_str_lossy()).await?;
            }
            "NAK" | "ACK" => {
                tracing::debug!(
                    command = %command.as_bstr(),
                    "negotiation complete, pack stream follows"
                );
                return Ok(Some(PackReader {
                    conn,
                    side_band,
                    state: Mutex::new(ReaderState {
                        on_progress,
                        on_error,
                    }),
                }));
            }
            _ => {
                return Err(TransportError::protocol(format!(
                    "unknown command {:?} in negotiation response",
                    line.as_bstr()
                )));
            }
        }
    }
}

struct ReaderState {
    on_progress: Option<TextSink>,
    on_error: Option<TextSink>,
}

/// Demultiplexed reader over the pack section of the response.
///
/// Side-band frames carrying progress or error text are routed to the
/// configured callbacks and the read continues transparently; only pack
/// data reaches the caller. At most one read may be in flight.
pub struct PackReader {
    conn: Arc<dyn Connection>,
    side_band: bool,
    state: Mutex<ReaderState>,
}

impl std::fmt::Debug for PackReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackReader")
            .field("side_band", &self.side_band)
            .finish_non_exhaustive()
    }
}

impl PackReader {
    /// Next chunk of raw pack bytes, `None` at end of stream.
    pub async fn read(&self) -> Result<Option<Bytes>, TransportError> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| TransportError::ConcurrentRead)?;
        loop {
            let payload = match self.conn.recv().await? {
                None => return Ok(None),
                Some(Pkt::Flush) => continue,
                Some(Pkt::Data(payload)) => payload,
            };
            match self.demux(payload)? {
                PackStreamItem::Data(data) => return Ok(Some(data)),
                PackStreamItem::Progress(text) => {
                    if let Some(sink) = state.on_progress.as_mut() {
                        sink(text);
                    }
                }
                PackStreamItem::Error(text) => {
                    if let Some(sink) = state.on_error.as_mut() {
                        sink(text);
                    }
                }
            }
        }
    }

    fn demux(&self, payload: Bytes) -> Result<PackStreamItem, TransportError> {
        if !self.side_band {
            return Ok(PackStreamItem::Data(payload));
        }
        let band = payload
            .first()
            .ok_or_else(|| TransportError::protocol("empty side-band frame"))?;
        match SideBand::from_value(*band) {
            Some(SideBand::PackfileData) => Ok(PackStreamItem::Data(payload.slice(1..))),
            Some(SideBand::Progress) => Ok(PackStreamItem::Progress(payload.slice(1..))),
            Some(SideBand::Error) => Ok(PackStreamItem::Error(payload.slice(1..))),
            None => Err(TransportError::protocol(format!(
                "invalid side-band indicator {band}"
            ))),
        }
    }

    /// Abort the underlying connection, unblocking any pending read.
    pub fn abort(&self) {
        self.conn.abort();
    }
}

/// Buffer text until a `\r` or `\n` boundary before invoking `sink`.
fn deline_sink(mut sink: TextSink) -> TextSink {
    let mut buffer = BytesMut::new();
    Box::new(move |chunk: Bytes| {
        let mut start = 0;
        for end in memchr::memchr2_iter(b'\r', b'\n', &chunk) {
            buffer.extend_from_slice(&chunk[start..=end]);
            start = end + 1;
            sink(buffer.split().freeze());
        }
        buffer.extend_from_slice(&chunk[start..]);
    })
}

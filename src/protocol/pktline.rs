//! Length-prefixed pkt-line framing.
//!
//! Each frame is a 4-digit ASCII-hex length (counting the header itself)
//! followed by the payload; the literal `0000` is a flush-pkt. The decoder
//! is incremental: it accepts chunks at whatever boundaries the carrier
//! delivers them and emits complete frames as they become available.

use std::collections::VecDeque;

use bstr::ByteSlice;
use bytes::{Buf, Bytes, BytesMut};

use super::types::{FLUSH_PKT, MAX_PKT_PAYLOAD, Pkt};
use crate::errors::TransportError;

/// Encode one data payload as a pkt-line frame.
pub fn encode_data(payload: &[u8]) -> Result<Bytes, TransportError> {
    if payload.len() > MAX_PKT_PAYLOAD {
        return Err(TransportError::protocol(format!(
            "pkt-line payload of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_PKT_PAYLOAD
        )));
    }
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    buf.extend_from_slice(format!("{:04x}", payload.len() + 4).as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// The flush-pkt frame.
pub fn encode_flush() -> Bytes {
    Bytes::from_static(FLUSH_PKT)
}

/// Encode any pkt as its wire frame.
pub fn encode(pkt: &Pkt) -> Result<Bytes, TransportError> {
    match pkt {
        Pkt::Data(payload) => encode_data(payload),
        Pkt::Flush => Ok(encode_flush()),
    }
}

/// Incremental pkt-line decoder fed by arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub struct PktDecoder {
    buf: BytesMut,
}

impl PktDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk, appending every now-complete frame to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut VecDeque<Pkt>) -> Result<(), TransportError> {
        self.buf.extend_from_slice(chunk);
        while let Some(pkt) = self.next_frame()? {
            out.push_back(pkt);
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Pkt>, TransportError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = parse_hex4(&self.buf[..4])?;
        if len == 0 {
            self.buf.advance(4);
            return Ok(Some(Pkt::Flush));
        }
        if len < 4 {
            return Err(TransportError::protocol(format!(
                "invalid pkt-line length {len}"
            )));
        }
        if len - 4 > MAX_PKT_PAYLOAD {
            return Err(TransportError::protocol(format!(
                "pkt-line length {len} exceeds the frame limit"
            )));
        }
        if self.buf.len() < len {
            return Ok(None);
        }
        self.buf.advance(4);
        let payload = self.buf.split_to(len - 4).freeze();
        Ok(Some(Pkt::Data(payload)))
    }

    /// Signal end of input. Errors if the stream stopped inside a frame.
    pub fn finish(&self) -> Result<(), TransportError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(TransportError::protocol(format!(
                "stream ended inside a pkt-line frame ({} bytes pending)",
                self.buf.len()
            )))
        }
    }
}

fn parse_hex4(header: &[u8]) -> Result<usize, TransportError> {
    let mut len = 0usize;
    for &digit in header {
        let value = (digit as char).to_digit(16).ok_or_else(|| {
            TransportError::protocol(format!(
                "invalid pkt-line length header {:?}",
                header.as_bstr()
            ))
        })?;
        len = len * 16 + value as usize;
    }
    Ok(len)
}

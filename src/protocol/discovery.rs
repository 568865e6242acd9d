//! Ref advertisement parsing.
//!
//! The advertisement is a sequence of `"<sha1> <refname>"` lines terminated
//! by a flush-pkt. The first line additionally carries the capability list
//! behind a NUL byte. A remote may answer with an `ERR <message>` line
//! instead, which surfaces as a server error.

use bstr::ByteSlice;

use super::stream::PktStream;
use super::types::{Capabilities, Pkt, RefAdvertisement};
use crate::errors::TransportError;

/// Read one ref advertisement from `input` until the terminating flush.
///
/// An advertisement for an empty repository still carries one ref line
/// naming the `capabilities^{}` placeholder; it is kept in the map like
/// any other ref.
pub async fn discover(input: &PktStream) -> Result<RefAdvertisement, TransportError> {
    let mut advertisement = RefAdvertisement::default();
    let mut caps_seen = false;

    loop {
        let line = match input.read().await? {
            None => {
                return Err(TransportError::protocol(
                    "stream ended before the ref advertisement was complete",
                ));
            }
            Some(Pkt::Flush) => {
                tracing::debug!(
                    refs = advertisement.refs.len(),
                    caps = advertisement.caps.len(),
                    "ref discovery complete"
                );
                return Ok(advertisement);
            }
            Some(Pkt::Data(line)) => line,
        };

        if let Some(rest) = line.strip_prefix(b"ERR ") {
            return Err(TransportError::server(rest.trim().to_str_lossy()));
        }

        let trimmed = line.trim();
        let ref_line = if caps_seen {
            trimmed
        } else {
            caps_seen = true;
            match trimmed.find_byte(0) {
                Some(nul) => {
                    advertisement.caps = Capabilities::parse(&trimmed[nul + 1..]);
                    &trimmed[..nul]
                }
                None => trimmed,
            }
        };

        let space = ref_line.find_byte(b' ').ok_or_else(|| {
            TransportError::protocol(format!("malformed ref line {:?}", ref_line.as_bstr()))
        })?;
        let (hash, name) = (&ref_line[..space], &ref_line[space + 1..]);
        advertisement.refs.insert(
            name.to_str_lossy().into_owned(),
            hash.to_str_lossy().into_owned(),
        );
    }
}

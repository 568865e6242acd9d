//! Wire-level data types shared across the protocol implementation.

use std::collections::HashMap;
use std::pin::Pin;

use bstr::ByteSlice;
use bytes::Bytes;
use futures::Stream;

use crate::errors::TransportError;

/// The flush-pkt marking a protocol section boundary.
pub const FLUSH_PKT: &[u8; 4] = b"0000";
/// Largest payload one pkt-line frame may carry (65520-byte frame minus header).
pub const MAX_PKT_PAYLOAD: usize = 65516;

/// Capability tokens that enable side-band multiplexing of the pack stream.
pub const CAP_SIDE_BAND: &str = "side-band";
pub const CAP_SIDE_BAND_64K: &str = "side-band-64k";

/// Boxed stream of raw byte chunks, the shape response bodies arrive in.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// One pkt-line protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pkt {
    Data(Bytes),
    Flush,
}

impl Pkt {
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Pkt::Data(payload.into())
    }

    pub fn is_flush(&self) -> bool {
        matches!(self, Pkt::Flush)
    }
}

/// Side-band channel identifiers multiplexed over the pack stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideBand {
    /// Band 1 carries packfile data.
    PackfileData,
    /// Band 2 carries progress text.
    Progress,
    /// Band 3 carries error text.
    Error,
}

impl SideBand {
    pub fn value(self) -> u8 {
        match self {
            SideBand::PackfileData => 1,
            SideBand::Progress => 2,
            SideBand::Error => 3,
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(SideBand::PackfileData),
            2 => Some(SideBand::Progress),
            3 => Some(SideBand::Error),
            _ => None,
        }
    }
}

/// One demultiplexed item of the pack response stream.
///
/// Only `Data` reaches the consumer; progress and error text are routed to
/// side-channel callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackStreamItem {
    Data(Bytes),
    Progress(Bytes),
    Error(Bytes),
}

/// Capability set advertised by the remote: `key` or `key=value` tokens,
/// bare tokens standing for boolean true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: HashMap<String, Option<String>>,
}

impl Capabilities {
    /// Parse a space-separated capability list.
    ///
    /// A token `key=` with an empty value degrades to a bare flag.
    pub fn parse(raw: &[u8]) -> Self {
        let mut entries = HashMap::new();
        for token in raw.fields() {
            let token = token.to_str_lossy();
            match token.split_once('=') {
                Some((key, value)) if !value.is_empty() => {
                    entries.insert(key.to_string(), Some(value.to_string()));
                }
                Some((key, _)) => {
                    entries.insert(key.to_string(), None);
                }
                None => {
                    entries.insert(token.into_owned(), None);
                }
            }
        }
        Capabilities { entries }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Value of a `key=value` capability; `None` for absent or bare tokens.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|v| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

/// Result of ref discovery: the advertised refs and the capability set
/// parsed from the first advertisement line.
#[derive(Debug, Clone, Default)]
pub struct RefAdvertisement {
    pub refs: HashMap<String, String>,
    pub caps: Capabilities,
}

//! Wire grammar and negotiation state machine shared by every carrier.
//!
//! The layering mirrors the protocol itself: `pktline` frames bytes,
//! `stream` turns a raw byte source into a pull stream of frames,
//! `discovery` parses the ref advertisement, and `fetch` runs the
//! want/have negotiation and demultiplexes the resulting pack stream.
//! `core` holds the traits the carriers and the repository collaborator
//! plug into.

pub mod core;
pub mod discovery;
pub mod fetch;
pub mod pktline;
pub mod stream;
pub mod types;

pub use self::core::{Connection, RefStore};
pub use self::discovery::discover;
pub use self::fetch::{FetchOptions, PackReader, TextSink, negotiate};
pub use self::stream::{ChunkSource, PktStream};
pub use self::types::{ByteStream, Capabilities, PackStreamItem, Pkt, RefAdvertisement, SideBand};

//! Wire protocol encoding and decoding.
//!
//! Two record families, both fixed size so that a byte stream needs no
//! extra framing:
//!
//! - [`Datagram`]: producer → broker over UDP.
//! - [`Packet`]: broker ↔ consumer over TCP.

pub mod codec;
pub mod datagram;
pub mod message;

pub use datagram::{DataType, Datagram, Value};
pub use message::*;

/// Topic field width.
pub const MAX_TOPIC_LEN: usize = 50;

/// Datagram content field width.
pub const MAX_CONTENT_LEN: usize = 1500;

/// Client identity field width.
pub const MAX_ID_LEN: usize = 10;

/// Dotted IPv4 text field width (`INET_ADDRSTRLEN`).
pub const ADDR_LEN: usize = 16;

/// Size of a datagram record.
pub const DATAGRAM_LEN: usize = MAX_TOPIC_LEN + 1 + MAX_CONTENT_LEN;

/// Size of a session packet record.
pub const PACKET_LEN: usize = 1 + ADDR_LEN + 2 + DATAGRAM_LEN + MAX_TOPIC_LEN + MAX_ID_LEN;

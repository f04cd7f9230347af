//! Broker ↔ consumer session record (TCP).
//!
//! Every message is one 1630-byte record:
//!
//! ```text
//! ┌──────────┬────────────────┬─────────────┬────────────────┬───────────┬───────────────┐
//! │ op (u8)  │ source_ip[16]  │ port u16 BE │ datagram[1551] │ topic[50] │ client_id[10] │
//! └──────────┴────────────────┴─────────────┴────────────────┴───────────┴───────────────┘
//! ```
//!
//! Only the fields relevant to the operation are populated; the rest are zero.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::{Bytes, BytesMut};

use super::codec::{read_fixed_str, read_u16, require_len, write_fixed_str, write_u16};
use super::datagram::Datagram;
use super::{ADDR_LEN, DATAGRAM_LEN, MAX_ID_LEN, MAX_TOPIC_LEN, PACKET_LEN};
use crate::error::{Error, Result};

const OP_OFFSET: usize = 0;
const ADDR_OFFSET: usize = OP_OFFSET + 1;
const PORT_OFFSET: usize = ADDR_OFFSET + ADDR_LEN;
const DATAGRAM_OFFSET: usize = PORT_OFFSET + 2;
const TOPIC_OFFSET: usize = DATAGRAM_OFFSET + DATAGRAM_LEN;
const ID_OFFSET: usize = TOPIC_OFFSET + MAX_TOPIC_LEN;

/// Operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Subscribe = 0,
    SubscribeAck = 1,
    Unsubscribe = 2,
    UnsubscribeAck = 3,
    Post = 4,
    Connect = 5,
    ConnectAck = 6,
    Disconnect = 7,
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => OpCode::Subscribe,
            1 => OpCode::SubscribeAck,
            2 => OpCode::Unsubscribe,
            3 => OpCode::UnsubscribeAck,
            4 => OpCode::Post,
            5 => OpCode::Connect,
            6 => OpCode::ConnectAck,
            7 => OpCode::Disconnect,
            other => return Err(Error::InvalidOpCode(other)),
        })
    }
}

/// A datagram relayed to a subscriber, with the producer's address.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    /// Producer address.
    pub source: SocketAddrV4,
    /// The datagram as received.
    pub datagram: Datagram,
}

impl Post {
    /// Create a post from a producer address.
    ///
    /// The wire format only carries IPv4 text; IPv6 producers are reported
    /// as their IPv4-mapped address when they have one, otherwise unspecified.
    pub fn new(source: SocketAddr, datagram: Datagram) -> Self {
        let source = match source {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(v6) => SocketAddrV4::new(
                v6.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
                v6.port(),
            ),
        };
        Self { source, datagram }
    }
}

impl std::fmt::Display for Post {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {} - {}",
            self.datagram.topic,
            self.datagram.value.data_type(),
            self.datagram.value
        )
    }
}

/// A session protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Subscribe { topic: String },
    SubscribeAck { topic: String },
    Unsubscribe { topic: String },
    UnsubscribeAck { topic: String },
    Post(Post),
    Connect { client_id: String },
    ConnectAck,
    Disconnect { client_id: String },
}

impl Packet {
    /// Operation code of this packet.
    pub fn op_code(&self) -> OpCode {
        match self {
            Packet::Subscribe { .. } => OpCode::Subscribe,
            Packet::SubscribeAck { .. } => OpCode::SubscribeAck,
            Packet::Unsubscribe { .. } => OpCode::Unsubscribe,
            Packet::UnsubscribeAck { .. } => OpCode::UnsubscribeAck,
            Packet::Post(_) => OpCode::Post,
            Packet::Connect { .. } => OpCode::Connect,
            Packet::ConnectAck => OpCode::ConnectAck,
            Packet::Disconnect { .. } => OpCode::Disconnect,
        }
    }

    /// Decode a packet record. `buf` must hold at least `PACKET_LEN` bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        require_len(buf, PACKET_LEN)?;
        let topic = || read_fixed_str(&buf[TOPIC_OFFSET..TOPIC_OFFSET + MAX_TOPIC_LEN], "topic");
        let client_id = || read_fixed_str(&buf[ID_OFFSET..ID_OFFSET + MAX_ID_LEN], "client id");

        let packet = match OpCode::try_from(buf[OP_OFFSET])? {
            OpCode::Subscribe => Packet::Subscribe { topic: topic()? },
            OpCode::SubscribeAck => Packet::SubscribeAck { topic: topic()? },
            OpCode::Unsubscribe => Packet::Unsubscribe { topic: topic()? },
            OpCode::UnsubscribeAck => Packet::UnsubscribeAck { topic: topic()? },
            OpCode::Post => {
                let ip_text = read_fixed_str(&buf[ADDR_OFFSET..ADDR_OFFSET + ADDR_LEN], "source address")?;
                let ip = if ip_text.is_empty() {
                    Ipv4Addr::UNSPECIFIED
                } else {
                    ip_text
                        .parse()
                        .map_err(|_| Error::Protocol(format!("invalid source address {:?}", ip_text)))?
                };
                let port = read_u16(&buf[PORT_OFFSET..]).unwrap_or_default();
                let datagram = Datagram::decode(&buf[DATAGRAM_OFFSET..DATAGRAM_OFFSET + DATAGRAM_LEN])?;
                Packet::Post(Post {
                    source: SocketAddrV4::new(ip, port),
                    datagram,
                })
            }
            OpCode::Connect => Packet::Connect {
                client_id: client_id()?,
            },
            OpCode::ConnectAck => Packet::ConnectAck,
            OpCode::Disconnect => Packet::Disconnect {
                client_id: client_id()?,
            },
        };
        Ok(packet)
    }

    /// Encode into `buf`, which must hold at least `PACKET_LEN` bytes.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        require_len(buf, PACKET_LEN)?;
        let buf = &mut buf[..PACKET_LEN];
        buf.fill(0);
        buf[OP_OFFSET] = self.op_code() as u8;

        match self {
            Packet::Subscribe { topic }
            | Packet::SubscribeAck { topic }
            | Packet::Unsubscribe { topic }
            | Packet::UnsubscribeAck { topic } => {
                write_fixed_str(&mut buf[TOPIC_OFFSET..TOPIC_OFFSET + MAX_TOPIC_LEN], topic, "topic")?;
            }
            Packet::Post(post) => {
                write_fixed_str(
                    &mut buf[ADDR_OFFSET..ADDR_OFFSET + ADDR_LEN],
                    &post.source.ip().to_string(),
                    "source address",
                )?;
                write_u16(&mut buf[PORT_OFFSET..], post.source.port());
                post.datagram
                    .encode_into(&mut buf[DATAGRAM_OFFSET..DATAGRAM_OFFSET + DATAGRAM_LEN])?;
            }
            Packet::Connect { client_id } | Packet::Disconnect { client_id } => {
                write_fixed_str(&mut buf[ID_OFFSET..ID_OFFSET + MAX_ID_LEN], client_id, "client id")?;
            }
            Packet::ConnectAck => {}
        }
        Ok(())
    }

    /// Encode a full packet record.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(PACKET_LEN);
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Create a CONNECT packet.
pub fn create_connect(client_id: &str) -> Packet {
    Packet::Connect {
        client_id: client_id.to_string(),
    }
}

/// Create a CONNECT_ACK packet.
pub fn create_connack() -> Packet {
    Packet::ConnectAck
}

/// Create a DISCONNECT packet.
pub fn create_disconnect(client_id: &str) -> Packet {
    Packet::Disconnect {
        client_id: client_id.to_string(),
    }
}

/// Create a SUBSCRIBE packet.
pub fn create_subscribe(topic: &str) -> Packet {
    Packet::Subscribe {
        topic: topic.to_string(),
    }
}

/// Create a SUBSCRIBE_ACK packet.
pub fn create_suback(topic: &str) -> Packet {
    Packet::SubscribeAck {
        topic: topic.to_string(),
    }
}

/// Create an UNSUBSCRIBE packet.
pub fn create_unsubscribe(topic: &str) -> Packet {
    Packet::Unsubscribe {
        topic: topic.to_string(),
    }
}

/// Create an UNSUBSCRIBE_ACK packet.
pub fn create_unsuback(topic: &str) -> Packet {
    Packet::UnsubscribeAck {
        topic: topic.to_string(),
    }
}

/// Create a POST packet.
pub fn create_post(source: SocketAddr, datagram: Datagram) -> Packet {
    Packet::Post(Post::new(source, datagram))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;

    #[test]
    fn test_record_size() {
        assert_eq!(PACKET_LEN, 1630);
        assert_eq!(ID_OFFSET + MAX_ID_LEN, PACKET_LEN);
        assert_eq!(create_connack().encode().unwrap().len(), PACKET_LEN);
    }

    #[test]
    fn test_connect_layout() {
        let bytes = create_connect("C1").encode().unwrap();
        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[ID_OFFSET..ID_OFFSET + 3], b"C1\0");
        assert!(bytes[1..ID_OFFSET].iter().all(|&b| b == 0));
        assert_eq!(Packet::decode(&bytes).unwrap(), create_connect("C1"));
    }

    #[test]
    fn test_subscribe_layout() {
        let bytes = create_subscribe("sensors/#").encode().unwrap();
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[TOPIC_OFFSET..TOPIC_OFFSET + 9], b"sensors/#");
        assert_eq!(Packet::decode(&bytes).unwrap(), create_subscribe("sensors/#"));
    }

    #[test]
    fn test_post_layout() {
        let source: SocketAddr = "10.0.0.7:4000".parse().unwrap();
        let datagram = Datagram::new("a/b", Value::float(-12.5, 1).unwrap());
        let bytes = create_post(source, datagram.clone()).encode().unwrap();

        assert_eq!(bytes[0], 4);
        assert_eq!(&bytes[ADDR_OFFSET..ADDR_OFFSET + 9], b"10.0.0.7\0");
        assert_eq!(&bytes[PORT_OFFSET..PORT_OFFSET + 2], &4000u16.to_be_bytes());
        assert_eq!(&bytes[DATAGRAM_OFFSET..DATAGRAM_OFFSET + 4], b"a/b\0");

        match Packet::decode(&bytes).unwrap() {
            Packet::Post(post) => {
                assert_eq!(post.source, "10.0.0.7:4000".parse().unwrap());
                assert_eq!(post.datagram, datagram);
                assert_eq!(post.to_string(), "a/b - FLOAT - -12.5000");
            }
            other => panic!("expected post, got {:?}", other),
        }
    }

    #[test]
    fn test_post_ipv6_mapped_source() {
        let source: SocketAddr = "[::ffff:192.168.1.2]:9".parse().unwrap();
        let post = Post::new(source, Datagram::new("t", Value::Int(1)));
        assert_eq!(post.source, "192.168.1.2:9".parse().unwrap());
    }

    #[test]
    fn test_decode_short_record() {
        let bytes = create_connack().encode().unwrap();
        assert!(matches!(
            Packet::decode(&bytes[..PACKET_LEN - 1]),
            Err(Error::Incomplete { needed: 1 })
        ));
    }

    #[test]
    fn test_decode_unknown_op() {
        let mut bytes = vec![0u8; PACKET_LEN];
        bytes[0] = 42;
        assert!(matches!(Packet::decode(&bytes), Err(Error::InvalidOpCode(42))));
    }

    #[test]
    fn test_decode_non_utf8_identity() {
        // Distinct invalid identities must not collapse into one session key.
        let mut first = create_connect("x").encode().unwrap().to_vec();
        first[ID_OFFSET..ID_OFFSET + 2].copy_from_slice(&[0xFF, 0xFE]);
        assert!(matches!(Packet::decode(&first), Err(Error::Protocol(_))));

        let mut second = first.clone();
        second[ID_OFFSET] = 0xC0;
        assert!(matches!(Packet::decode(&second), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_identity_too_long() {
        assert!(matches!(
            create_connect("abcdefghijk").encode(),
            Err(Error::FieldTooLong { .. })
        ));
        // Ten bytes fill the field exactly.
        let bytes = create_connect("abcdefghij").encode().unwrap();
        assert_eq!(Packet::decode(&bytes).unwrap(), create_connect("abcdefghij"));
    }
}

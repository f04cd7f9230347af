//! Consumer client.
//!
//! Connects to the broker over TCP, manages subscriptions and receives the
//! posts the broker forwards.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{self, MAX_ID_LEN, Packet, Post};
use crate::transport::{self, RecordCodec};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address (host:port).
    pub addr: String,
    /// Client identity, at most 10 bytes.
    pub client_id: String,
    /// Deadline for the handshake, for acks and for each write.
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    /// Create a new client config with a 5 second timeout.
    pub fn new(addr: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client_id: client_id.into(),
            timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Set the timeout. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Consumer session with the broker.
pub struct Client {
    reader: FramedRead<OwnedReadHalf, RecordCodec>,
    writer: OwnedWriteHalf,
    client_id: String,
    timeout: Option<Duration>,
    /// Posts that arrived while waiting for an ack.
    queued: VecDeque<Post>,
}

impl Client {
    /// Connect and complete the handshake.
    ///
    /// Fails with [`Error::ConnectionRefused`] if the broker answers with
    /// DISCONNECT, which it does when the identity is already connected.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        if config.client_id.is_empty() || config.client_id.len() > MAX_ID_LEN {
            return Err(Error::InvalidConfig(format!(
                "client id must be 1 to {} bytes, got {:?}",
                MAX_ID_LEN, config.client_id
            )));
        }

        debug!("Connecting to {} as {}", config.addr, config.client_id);
        let stream = transport::with_timeout(config.timeout, "connect", async {
            Ok(TcpStream::connect(&config.addr).await?)
        })
        .await?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();

        transport::write_packet(&mut writer, &protocol::create_connect(&config.client_id), config.timeout).await?;

        let mut client = Self {
            reader: FramedRead::new(reader, RecordCodec::packets()),
            writer,
            client_id: config.client_id,
            timeout: config.timeout,
            queued: VecDeque::new(),
        };

        match client.read_next(client.timeout).await? {
            Packet::ConnectAck => {
                debug!("Connected as {}", client.client_id);
                Ok(client)
            }
            Packet::Disconnect { client_id } => Err(Error::ConnectionRefused(format!(
                "client {} already connected",
                client_id
            ))),
            other => Err(Error::UnexpectedPacket {
                expected: "ConnectAck".to_string(),
                got: format!("{:?}", other.op_code()),
            }),
        }
    }

    /// Client identity.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Subscribe to a pattern and wait for the broker's ack.
    pub async fn subscribe(&mut self, pattern: &str) -> Result<()> {
        self.send(&protocol::create_subscribe(pattern)).await?;
        self.wait_ack(|packet| matches!(packet, Packet::SubscribeAck { topic } if topic == pattern), "SubscribeAck")
            .await?;
        debug!("Subscribed to {}", pattern);
        Ok(())
    }

    /// Unsubscribe from a pattern and wait for the broker's ack.
    pub async fn unsubscribe(&mut self, pattern: &str) -> Result<()> {
        self.send(&protocol::create_unsubscribe(pattern)).await?;
        self.wait_ack(
            |packet| matches!(packet, Packet::UnsubscribeAck { topic } if topic == pattern),
            "UnsubscribeAck",
        )
        .await?;
        debug!("Unsubscribed from {}", pattern);
        Ok(())
    }

    /// Receive the next post.
    ///
    /// Returns [`Error::ConnectionClosed`] when the broker disconnects this
    /// client or the connection drops.
    pub async fn recv(&mut self) -> Result<Post> {
        self.recv_within(None).await
    }

    /// Receive the next post, giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Post> {
        self.recv_within(Some(timeout)).await
    }

    /// Tell the broker this session is ending and close the connection.
    pub async fn disconnect(mut self) -> Result<()> {
        debug!("Disconnecting {}", self.client_id);
        let packet = protocol::create_disconnect(&self.client_id);
        self.send(&packet).await
    }

    async fn recv_within(&mut self, timeout: Option<Duration>) -> Result<Post> {
        if let Some(post) = self.queued.pop_front() {
            return Ok(post);
        }
        transport::with_timeout(timeout, "recv", async {
            loop {
                match self.read_next(None).await? {
                    Packet::Post(post) => return Ok(post),
                    Packet::Disconnect { .. } => {
                        debug!("Broker disconnected {}", self.client_id);
                        return Err(Error::ConnectionClosed);
                    }
                    other => warn!("Ignoring unexpected {:?}", other.op_code()),
                }
            }
        })
        .await
    }

    async fn wait_ack(&mut self, is_ack: impl Fn(&Packet) -> bool, expected: &str) -> Result<()> {
        let timeout = self.timeout;
        transport::with_timeout(timeout, expected, async {
            loop {
                let packet = self.read_next(None).await?;
                if is_ack(&packet) {
                    return Ok(());
                }
                match packet {
                    Packet::Post(post) => self.queued.push_back(post),
                    Packet::Disconnect { .. } => return Err(Error::ConnectionClosed),
                    // Late ack of an earlier request that timed out.
                    stale @ (Packet::SubscribeAck { .. } | Packet::UnsubscribeAck { .. }) => {
                        debug!("Skipping stale {:?}", stale.op_code());
                    }
                    other => {
                        return Err(Error::UnexpectedPacket {
                            expected: expected.to_string(),
                            got: format!("{:?}", other.op_code()),
                        });
                    }
                }
            }
        })
        .await
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        trace!("Sending {:?}", packet.op_code());
        transport::write_packet(&mut self.writer, packet, self.timeout).await
    }

    async fn read_next(&mut self, timeout: Option<Duration>) -> Result<Packet> {
        let record = transport::with_timeout(timeout, "read packet", async {
            match self.reader.next().await {
                Some(record) => record,
                None => Err(Error::ConnectionClosed),
            }
        })
        .await?;
        Packet::decode(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config() {
        let config = ClientConfig::new("127.0.0.1:9000", "sub-1");
        assert_eq!(config.addr, "127.0.0.1:9000");
        assert_eq!(config.client_id, "sub-1");
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));

        let config = config.with_timeout(None);
        assert!(config.timeout.is_none());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_client_id() {
        for id in ["", "way-too-long-id"] {
            let result = Client::connect(ClientConfig::new("127.0.0.1:1", id)).await;
            assert!(matches!(result, Err(Error::InvalidConfig(_))), "{:?}", id);
        }
    }
}

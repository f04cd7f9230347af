//! Producer side: sends datagram records to the broker over UDP.

use std::net::SocketAddr;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::trace;

use crate::error::Result;
use crate::protocol::{Datagram, Value};

/// UDP producer bound to one broker address.
pub struct Publisher {
    socket: UdpSocket,
    broker: SocketAddr,
}

impl Publisher {
    /// Bind an ephemeral local port and target `broker`.
    pub async fn connect(broker: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(broker).await?;
        let broker = socket.peer_addr()?;
        Ok(Self { socket, broker })
    }

    /// Use an existing socket.
    pub fn new(socket: UdpSocket, broker: SocketAddr) -> Self {
        Self { socket, broker }
    }

    /// Local address posts will report as their source.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send one datagram.
    pub async fn send(&self, datagram: &Datagram) -> Result<()> {
        let record = datagram.encode()?;
        trace!("Publishing {} ({}) to {}", datagram.topic, datagram.value.data_type(), self.broker);
        self.socket.send_to(&record, self.broker).await?;
        Ok(())
    }

    /// Send `value` on `topic`.
    pub async fn publish(&self, topic: &str, value: Value) -> Result<()> {
        self.send(&Datagram::new(topic, value)).await
    }
}

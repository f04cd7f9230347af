//! UDP to TCP topic relay.
//!
//! Producers send fixed-size datagrams over UDP, each carrying a topic and a
//! typed value. Consumers hold TCP sessions, subscribe to topic patterns
//! with `+` (one segment) and `#` (any remaining segments) wildcards, and
//! receive every matching datagram together with the producer's address.
//!
//! Sessions are keyed by client identity. A client that disconnects and
//! later connects again under the same identity keeps its subscriptions.
//!
//! ## Components
//!
//! - [`Broker`]: the relay, a single task serving every socket
//! - [`Client`]: consumer session
//! - [`Publisher`]: producer helper
//!
//! ## Example
//!
//! ```no_run
//! use giztoy_topicrelay::{Broker, BrokerConfig, Client, ClientConfig, Publisher, Value};
//! use tokio::io::BufReader;
//! use tokio::net::{TcpListener, UdpSocket};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> giztoy_topicrelay::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:12345").await?;
//!     let udp = UdpSocket::bind("127.0.0.1:12345").await?;
//!     let broker = Broker::new(listener, udp, BrokerConfig::new())?;
//!     tokio::spawn(broker.run(BufReader::new(tokio::io::stdin())));
//!
//!     let mut client = Client::connect(ClientConfig::new("127.0.0.1:12345", "sub-1")).await?;
//!     client.subscribe("sensors/+").await?;
//!
//!     let publisher = Publisher::connect("127.0.0.1:12345").await?;
//!     publisher.publish("sensors/temp", Value::short_real(21.5)?).await?;
//!
//!     let post = client.recv().await?;
//!     println!("{}", post); // sensors/temp - SHORT_REAL - 21.50
//!     Ok(())
//! }
//! ```

mod broker;
mod client;
mod error;
pub mod protocol;
mod publisher;
pub mod session;
pub mod topic;
pub mod transport;

pub use broker::{Broker, BrokerConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
pub use client::{Client, ClientConfig};
pub use error::{Error, Result};
pub use protocol::{DataType, Datagram, Packet, Post, Value};
pub use publisher::Publisher;

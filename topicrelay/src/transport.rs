//! Reliable record I/O over byte streams.
//!
//! A single read or write on a stream may move fewer bytes than asked for.
//! The functions here only return once a whole fixed-size record has been
//! transferred, or with the error that stopped it.

use std::future::Future;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Decoder;

use crate::error::{Error, Result};
use crate::protocol::{Packet, PACKET_LEN};

/// Read exactly `buf.len()` bytes.
///
/// A peer that closes before the record is complete yields
/// [`Error::ConnectionClosed`].
pub async fn read_record<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        filled += n;
    }
    Ok(())
}

/// Write all of `buf` and flush.
pub async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, buf: &[u8]) -> Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Run `fut` under an optional deadline.
pub async fn with_timeout<T>(
    timeout: Option<Duration>,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("{} after {:?}", what, limit))),
        },
        None => fut.await,
    }
}

/// Read and decode one packet record.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R, timeout: Option<Duration>) -> Result<Packet> {
    let mut buf = [0u8; PACKET_LEN];
    with_timeout(timeout, "read packet", read_record(reader, &mut buf)).await?;
    Packet::decode(&buf)
}

/// Encode and write one packet record.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
    timeout: Option<Duration>,
) -> Result<()> {
    let buf = packet.encode()?;
    with_timeout(timeout, "write packet", write_record(writer, &buf)).await
}

/// Splits a byte stream into fixed-size records.
///
/// Used with `FramedRead` so the broker can wait on many sessions at once
/// without losing a partially received record when another source wins the
/// wait.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    len: usize,
}

impl RecordCodec {
    /// Codec for records of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { len }
    }

    /// Codec for session packet records.
    pub fn packets() -> Self {
        Self::new(PACKET_LEN)
    }
}

impl Decoder for RecordCodec {
    type Item = BytesMut;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        if src.len() < self.len {
            src.reserve(self.len - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(self.len)))
    }
}

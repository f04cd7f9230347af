//! Fixed-width field encoding/decoding utilities.
//!
//! Every field in a topicrelay record has a constant width. Strings are
//! NUL padded, integers are big-endian.

use crate::error::{Error, Result};

/// Read a 2-byte big-endian u16.
pub fn read_u16(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Write a 2-byte big-endian u16.
pub fn write_u16(buf: &mut [u8], value: u16) -> Option<()> {
    if buf.len() < 2 {
        return None;
    }
    buf[..2].copy_from_slice(&value.to_be_bytes());
    Some(())
}

/// Read a 4-byte big-endian u32.
pub fn read_u32(buf: &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Write a 4-byte big-endian u32.
pub fn write_u32(buf: &mut [u8], value: u32) -> Option<()> {
    if buf.len() < 4 {
        return None;
    }
    buf[..4].copy_from_slice(&value.to_be_bytes());
    Some(())
}

/// Read a NUL-terminated string from a fixed-width field.
///
/// A field without a NUL byte is taken whole. Bytes that are not UTF-8 are
/// an error, never replaced.
pub fn read_fixed_str(field: &[u8], name: &'static str) -> Result<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    match std::str::from_utf8(&field[..end]) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => Err(Error::Protocol(format!("{} is not valid UTF-8", name))),
    }
}

/// Write a string into a fixed-width field, zero filling the rest.
///
/// The string may occupy the whole field, in which case there is no
/// terminator (readers stop at the field boundary).
pub fn write_fixed_str(field: &mut [u8], s: &str, name: &'static str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > field.len() {
        return Err(Error::FieldTooLong {
            field: name,
            len: bytes.len(),
            max: field.len(),
        });
    }
    field[..bytes.len()].copy_from_slice(bytes);
    field[bytes.len()..].fill(0);
    Ok(())
}

/// Ensure `buf` holds at least `len` bytes.
pub fn require_len(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() < len {
        return Err(Error::Incomplete {
            needed: len - buf.len(),
        });
    }
    Ok(())
}

//! Producer datagram record (UDP ingest).
//!
//! Layout, 1551 bytes:
//!
//! ```text
//! ┌──────────────────┬───────────┬─────────────────────────────┐
//! │ topic[50]        │ type (u8) │ content[1500]               │
//! │ NUL padded ASCII │ 0..=3     │ interpretation per type tag │
//! └──────────────────┴───────────┴─────────────────────────────┘
//! ```
//!
//! Content encodings:
//!
//! | type           | bytes                                          | value                  |
//! |----------------|------------------------------------------------|------------------------|
//! | 0 `INT`        | sign (0 = positive), u32 BE magnitude          | ±magnitude             |
//! | 1 `SHORT_REAL` | u16 BE                                         | value / 100            |
//! | 2 `FLOAT`      | sign, u32 BE magnitude, u8 exponent            | ±magnitude × 10^-exp   |
//! | 3 `STRING`     | raw bytes, NUL terminated within the buffer    | the string             |

use std::fmt;

use bytes::{Bytes, BytesMut};

use super::codec::{read_fixed_str, read_u16, read_u32, require_len, write_fixed_str, write_u16, write_u32};
use super::{DATAGRAM_LEN, MAX_CONTENT_LEN, MAX_TOPIC_LEN};
use crate::error::{Error, Result};

/// Data type tag of a datagram payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Int = 0,
    ShortReal = 1,
    Float = 2,
    String = 3,
}

impl DataType {
    /// Name used when rendering values.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int => "INT",
            DataType::ShortReal => "SHORT_REAL",
            DataType::Float => "FLOAT",
            DataType::String => "STRING",
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DataType::Int),
            1 => Ok(DataType::ShortReal),
            2 => Ok(DataType::Float),
            3 => Ok(DataType::String),
            other => Err(Error::InvalidDataType(other)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed datagram payload.
///
/// Numeric variants keep the wire representation so that relaying a value
/// never loses precision.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer with a 32-bit magnitude.
    Int(i64),
    /// Hundredths, unsigned.
    ShortReal(u16),
    /// Decimal with a power-of-ten exponent.
    Float {
        negative: bool,
        magnitude: u32,
        exponent: u8,
    },
    /// Text, at most 1500 bytes.
    String(String),
}

impl Value {
    /// Build a short real from a decimal, rounded to hundredths.
    ///
    /// Fails for values that round outside `0.00..=655.35`, and for NaN.
    pub fn short_real(value: f64) -> Result<Self> {
        let scaled = (value * 100.0).round();
        if !(0.0..=u16::MAX as f64).contains(&scaled) {
            return Err(Error::Protocol(format!("short real {} outside 0.00..=655.35", value)));
        }
        Ok(Value::ShortReal(scaled as u16))
    }

    /// Build a float with `exponent` decimal digits, rounding the magnitude.
    ///
    /// Fails when the scaled magnitude does not fit 32 bits, or is not finite.
    pub fn float(value: f64, exponent: u8) -> Result<Self> {
        let scaled = (value.abs() * 10f64.powi(exponent as i32)).round();
        if !scaled.is_finite() || scaled > u32::MAX as f64 {
            return Err(Error::Protocol(format!(
                "float {} with exponent {} does not fit a 32-bit magnitude",
                value, exponent
            )));
        }
        let magnitude = scaled as u32;
        Ok(Value::Float {
            negative: value.is_sign_negative() && magnitude != 0,
            magnitude,
            exponent,
        })
    }

    /// The data type tag for this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::ShortReal(_) => DataType::ShortReal,
            Value::Float { .. } => DataType::Float,
            Value::String(_) => DataType::String,
        }
    }

    /// Numeric value, `None` for strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::ShortReal(v) => Some(*v as f64 / 100.0),
            Value::Float {
                negative,
                magnitude,
                exponent,
            } => {
                let v = *magnitude as f64 / 10f64.powi(*exponent as i32);
                Some(if *negative { -v } else { v })
            }
            Value::String(_) => None,
        }
    }

    /// Decode a content buffer according to its type tag.
    ///
    /// `content` must be `MAX_CONTENT_LEN` bytes.
    fn decode(data_type: DataType, content: &[u8]) -> Result<Self> {
        require_len(content, MAX_CONTENT_LEN)?;
        let value = match data_type {
            DataType::Int => {
                let magnitude = read_u32(&content[1..]).unwrap_or_default() as i64;
                Value::Int(if content[0] == 0 { magnitude } else { -magnitude })
            }
            DataType::ShortReal => Value::ShortReal(read_u16(content).unwrap_or_default()),
            DataType::Float => Value::Float {
                negative: content[0] != 0,
                magnitude: read_u32(&content[1..]).unwrap_or_default(),
                exponent: content[5],
            },
            DataType::String => Value::String(read_fixed_str(content, "content")?),
        };
        Ok(value)
    }

    /// Encode into a zeroed content buffer of `MAX_CONTENT_LEN` bytes.
    fn encode_into(&self, content: &mut [u8]) -> Result<()> {
        require_len(content, MAX_CONTENT_LEN)?;
        match self {
            Value::Int(v) => {
                let magnitude = u32::try_from(v.unsigned_abs()).map_err(|_| {
                    Error::Protocol(format!("integer {} does not fit a 32-bit magnitude", v))
                })?;
                content[0] = u8::from(*v < 0);
                write_u32(&mut content[1..], magnitude);
            }
            Value::ShortReal(v) => {
                write_u16(content, *v);
            }
            Value::Float {
                negative,
                magnitude,
                exponent,
            } => {
                content[0] = u8::from(*negative);
                write_u32(&mut content[1..], *magnitude);
                content[5] = *exponent;
            }
            Value::String(s) => write_fixed_str(&mut content[..MAX_CONTENT_LEN], s, "content")?,
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::ShortReal(_) => write!(f, "{:.2}", self.as_f64().unwrap_or_default()),
            Value::Float { .. } => write!(f, "{:.4}", self.as_f64().unwrap_or_default()),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// A producer datagram: a topic and a typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    /// Concrete topic, never a pattern.
    pub topic: String,
    /// Payload.
    pub value: Value,
}

impl Datagram {
    /// Create a new datagram.
    pub fn new(topic: impl Into<String>, value: Value) -> Self {
        Self {
            topic: topic.into(),
            value,
        }
    }

    /// Decode a datagram record.
    ///
    /// At least the topic and type tag must be present. A short content area
    /// reads as zero filled; bytes past `DATAGRAM_LEN` are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        require_len(buf, MAX_TOPIC_LEN + 1)?;
        let topic = read_fixed_str(&buf[..MAX_TOPIC_LEN], "topic")?;
        let data_type = DataType::try_from(buf[MAX_TOPIC_LEN])?;

        let available = &buf[MAX_TOPIC_LEN + 1..buf.len().min(DATAGRAM_LEN)];
        let value = if available.len() == MAX_CONTENT_LEN {
            Value::decode(data_type, available)?
        } else {
            let mut content = [0u8; MAX_CONTENT_LEN];
            content[..available.len()].copy_from_slice(available);
            Value::decode(data_type, &content)?
        };

        Ok(Self { topic, value })
    }

    /// Encode into `buf`, which must hold at least `DATAGRAM_LEN` bytes.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        require_len(buf, DATAGRAM_LEN)?;
        let buf = &mut buf[..DATAGRAM_LEN];
        buf.fill(0);
        write_fixed_str(&mut buf[..MAX_TOPIC_LEN], &self.topic, "topic")?;
        buf[MAX_TOPIC_LEN] = self.value.data_type() as u8;
        self.value.encode_into(&mut buf[MAX_TOPIC_LEN + 1..])
    }

    /// Encode a full datagram record.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(DATAGRAM_LEN);
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(bytes: &[u8]) -> Vec<u8> {
        let mut c = vec![0u8; MAX_CONTENT_LEN];
        c[..bytes.len()].copy_from_slice(bytes);
        c
    }

    #[test]
    fn test_int_wire_format() {
        let mut c = vec![0u8; MAX_CONTENT_LEN];
        Value::Int(-42).encode_into(&mut c).unwrap();
        assert_eq!(&c[..5], &[1, 0, 0, 0, 42]);

        let v = Value::decode(DataType::Int, &content(&[0, 0x00, 0x01, 0x00, 0x00])).unwrap();
        assert_eq!(v, Value::Int(65536));
    }

    #[test]
    fn test_int_nonzero_sign_is_negative() {
        let v = Value::decode(DataType::Int, &content(&[0xFF, 0, 0, 0, 7])).unwrap();
        assert_eq!(v, Value::Int(-7));
    }

    #[test]
    fn test_int_magnitude_range() {
        let mut c = vec![0u8; MAX_CONTENT_LEN];
        assert!(Value::Int(u32::MAX as i64).encode_into(&mut c).is_ok());
        assert!(Value::Int(-(u32::MAX as i64)).encode_into(&mut c).is_ok());
        assert!(Value::Int(u32::MAX as i64 + 1).encode_into(&mut c).is_err());
    }

    #[test]
    fn test_short_real_scale() {
        let v = Value::short_real(23.5).unwrap();
        assert_eq!(v, Value::ShortReal(2350));

        let mut c = vec![0u8; MAX_CONTENT_LEN];
        v.encode_into(&mut c).unwrap();
        assert_eq!(&c[..2], &2350u16.to_be_bytes());

        let decoded = Value::decode(DataType::ShortReal, &c).unwrap();
        assert_eq!(decoded.as_f64(), Some(23.5));
        assert_eq!(decoded.to_string(), "23.50");
    }

    #[test]
    fn test_float_scale() {
        let v = Value::float(3.14, 2).unwrap();
        assert_eq!(
            v,
            Value::Float {
                negative: false,
                magnitude: 314,
                exponent: 2
            }
        );

        let mut c = vec![0u8; MAX_CONTENT_LEN];
        v.encode_into(&mut c).unwrap();
        assert_eq!(&c[..6], &[0, 0, 0, 1, 0x3A, 2]);

        let decoded = Value::decode(DataType::Float, &c).unwrap();
        assert!((decoded.as_f64().unwrap() - 3.14).abs() < 1e-9);
    }

    #[test]
    fn test_float_negative() {
        let v = Value::float(-12.5, 1).unwrap();
        assert_eq!(
            v,
            Value::Float {
                negative: true,
                magnitude: 125,
                exponent: 1
            }
        );
        assert_eq!(v.as_f64(), Some(-12.5));
        assert_eq!(v.to_string(), "-12.5000");
    }

    #[test]
    fn test_numeric_out_of_range() {
        assert!(Value::short_real(-1.0).is_err());
        assert!(Value::short_real(655.36).is_err());
        assert!(Value::short_real(f64::NAN).is_err());
        assert_eq!(Value::short_real(655.35).unwrap(), Value::ShortReal(u16::MAX));

        assert!(Value::float(5e9, 0).is_err());
        assert!(Value::float(1.0, 255).is_err());
        assert!(Value::float(f64::NAN, 2).is_err());
        assert!(Value::float(f64::INFINITY, 0).is_err());
        assert_eq!(
            Value::float(-(u32::MAX as f64), 0).unwrap(),
            Value::Float {
                negative: true,
                magnitude: u32::MAX,
                exponent: 0
            }
        );
    }

    #[test]
    fn test_datagram_rejects_non_utf8_topic() {
        let mut buf = Datagram::new("t", Value::Int(1)).encode().unwrap().to_vec();
        buf[..MAX_TOPIC_LEN].fill(0xFF);
        assert!(matches!(Datagram::decode(&buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_float_negative_zero_is_positive() {
        let v = Value::float(-0.0001, 2).unwrap();
        assert_eq!(
            v,
            Value::Float {
                negative: false,
                magnitude: 0,
                exponent: 2
            }
        );
    }

    #[test]
    fn test_string_nul_terminated() {
        let v = Value::decode(DataType::String, &content(b"hello\0garbage")).unwrap();
        assert_eq!(v, Value::String("hello".to_string()));
    }

    #[test]
    fn test_string_full_buffer() {
        let text = "x".repeat(MAX_CONTENT_LEN);
        let dg = Datagram::new("t", Value::String(text.clone()));
        let decoded = Datagram::decode(&dg.encode().unwrap()).unwrap();
        assert_eq!(decoded.value, Value::String(text));

        let too_long = Datagram::new("t", Value::String("x".repeat(MAX_CONTENT_LEN + 1)));
        assert!(matches!(too_long.encode(), Err(Error::FieldTooLong { .. })));
    }

    #[test]
    fn test_datagram_layout() {
        let dg = Datagram::new("a/b", Value::Int(5));
        let bytes = dg.encode().unwrap();
        assert_eq!(bytes.len(), DATAGRAM_LEN);
        assert_eq!(&bytes[..4], b"a/b\0");
        assert_eq!(bytes[MAX_TOPIC_LEN], DataType::Int as u8);
        assert_eq!(&bytes[MAX_TOPIC_LEN + 1..MAX_TOPIC_LEN + 6], &[0, 0, 0, 0, 5]);
        assert_eq!(Datagram::decode(&bytes).unwrap(), dg);
    }

    #[test]
    fn test_datagram_short_content() {
        // Producers may send only the bytes they use.
        let mut buf = vec![0u8; MAX_TOPIC_LEN + 1 + 3];
        buf[..5].copy_from_slice(b"greet");
        buf[MAX_TOPIC_LEN] = DataType::String as u8;
        buf[MAX_TOPIC_LEN + 1..].copy_from_slice(b"hey");

        let dg = Datagram::decode(&buf).unwrap();
        assert_eq!(dg.topic, "greet");
        assert_eq!(dg.value, Value::String("hey".to_string()));
    }

    #[test]
    fn test_datagram_full_width_topic() {
        let topic = "t".repeat(MAX_TOPIC_LEN);
        let dg = Datagram::new(topic.clone(), Value::ShortReal(1));
        let decoded = Datagram::decode(&dg.encode().unwrap()).unwrap();
        assert_eq!(decoded.topic, topic);
    }

    #[test]
    fn test_datagram_errors() {
        assert!(matches!(
            Datagram::decode(&[0u8; 10]),
            Err(Error::Incomplete { .. })
        ));

        let mut buf = vec![0u8; DATAGRAM_LEN];
        buf[MAX_TOPIC_LEN] = 9;
        assert!(matches!(Datagram::decode(&buf), Err(Error::InvalidDataType(9))));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::ShortReal(1234).to_string(), "12.34");
        assert_eq!(Value::float(1.5, 3).unwrap().to_string(), "1.5000");
        assert_eq!(Value::String("on".into()).to_string(), "on");
        assert_eq!(DataType::ShortReal.to_string(), "SHORT_REAL");
    }
}

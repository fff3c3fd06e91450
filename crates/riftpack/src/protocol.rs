//! # Protocol Engine
//!
//! The symmetric encode/decode primitives every wire format implements.
//!
//! ## Philosophy
//!
//! - **Buffer-Oriented**: A protocol never owns bytes. Every call names the `Buffer` it
//!   reads from or appends to, so the same protocol instance can serve a transport's
//!   write buffer and read buffer.
//! - **Markers are Mandatory**: `write_field_stop` must be emitted at the end of every
//!   struct, and `read_field_begin` reports it as a `TType::Stop` header.
//! - **Stateful, not Shared**: Formats that carry per-struct state (the compact field
//!   delta) keep it in the protocol instance. One instance serves one message stream.

use std::fmt;

use crate::binary::BinaryProtocol;
use crate::buffer::Buffer;
use crate::compact::CompactProtocol;
use crate::error::Error;
use crate::error::Result;
use crate::message::MessageHeader;
use crate::types::FieldHeader;
use crate::types::ListHeader;
use crate::types::MapHeader;
use crate::types::TType;

/// Encode/decode primitives for a wire format.
///
/// Object-safe so a connection can hold `Box<dyn Protocol>` chosen at runtime.
pub trait Protocol: Send {
    fn write_message_begin(&mut self, buf: &mut Buffer, header: &MessageHeader) -> Result<()>;
    /// Marker kept for symmetry; writes nothing in either format.
    fn write_message_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn write_struct_begin(&mut self, buf: &mut Buffer, name: &str) -> Result<()>;
    fn write_struct_end(&mut self, buf: &mut Buffer) -> Result<()>;
    fn write_field_begin(&mut self, buf: &mut Buffer, name: &str, ttype: TType, id: i16) -> Result<()>;
    fn write_field_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn write_field_stop(&mut self, buf: &mut Buffer) -> Result<()>;
    fn write_list_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<()>;
    fn write_list_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn write_set_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<()>;
    fn write_set_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn write_map_begin(&mut self, buf: &mut Buffer, header: MapHeader) -> Result<()>;
    fn write_map_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn write_bool(&mut self, buf: &mut Buffer, v: bool) -> Result<()>;
    fn write_i8(&mut self, buf: &mut Buffer, v: i8) -> Result<()>;
    fn write_i16(&mut self, buf: &mut Buffer, v: i16) -> Result<()>;
    fn write_i32(&mut self, buf: &mut Buffer, v: i32) -> Result<()>;
    fn write_i64(&mut self, buf: &mut Buffer, v: i64) -> Result<()>;
    fn write_double(&mut self, buf: &mut Buffer, v: f64) -> Result<()>;
    fn write_string(&mut self, buf: &mut Buffer, v: &str) -> Result<()> {
        self.write_binary(buf, v.as_bytes())
    }
    fn write_binary(&mut self, buf: &mut Buffer, v: &[u8]) -> Result<()>;

    fn read_message_begin(&mut self, buf: &mut Buffer) -> Result<MessageHeader>;
    fn read_message_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn read_struct_begin(&mut self, buf: &mut Buffer) -> Result<()>;
    fn read_struct_end(&mut self, buf: &mut Buffer) -> Result<()>;
    fn read_field_begin(&mut self, buf: &mut Buffer) -> Result<FieldHeader>;
    fn read_field_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn read_list_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader>;
    fn read_list_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn read_set_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader>;
    fn read_set_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn read_map_begin(&mut self, buf: &mut Buffer) -> Result<MapHeader>;
    fn read_map_end(&mut self, _buf: &mut Buffer) -> Result<()> { Ok(()) }
    fn read_bool(&mut self, buf: &mut Buffer) -> Result<bool>;
    fn read_i8(&mut self, buf: &mut Buffer) -> Result<i8>;
    fn read_i16(&mut self, buf: &mut Buffer) -> Result<i16>;
    fn read_i32(&mut self, buf: &mut Buffer) -> Result<i32>;
    fn read_i64(&mut self, buf: &mut Buffer) -> Result<i64>;
    fn read_double(&mut self, buf: &mut Buffer) -> Result<f64>;
    fn read_string(&mut self, buf: &mut Buffer) -> Result<String> {
        let bytes = self.read_binary(buf)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }
    fn read_binary(&mut self, buf: &mut Buffer) -> Result<Vec<u8>>;

    /// Clears per-message state after a failed or abandoned decode.
    fn reset(&mut self);
}

/// Size limits and header strictness shared by both formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolLimits {
    /// Maximum string/binary length accepted on read.
    pub string_limit: Option<usize>,
    /// Maximum declared container count accepted on read.
    pub container_limit: Option<usize>,
    /// Binary only: reject message headers without a version word.
    pub strict_read: bool,
    /// Binary only: write message headers with a version word.
    pub strict_write: bool,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            string_limit: None,
            container_limit: None,
            strict_read: false,
            strict_write: true,
        }
    }
}

impl ProtocolLimits {
    pub(crate) fn check_string(&self, len: i64) -> Result<usize> {
        check_read_len(len, self.string_limit)
    }

    pub(crate) fn check_container(&self, len: i64) -> Result<usize> {
        check_read_len(len, self.container_limit)
    }
}

fn check_read_len(len: i64, limit: Option<usize>) -> Result<usize> {
    if len < 0 {
        return Err(Error::NegativeSize(len));
    }
    let len = len as usize;
    match limit {
        Some(limit) if len > limit => Err(Error::SizeLimit { size: len, limit }),
        _ => Ok(len),
    }
}

/// Lengths and counts travel as signed 32-bit values.
pub(crate) fn check_write_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::SizeLimit { size: len, limit: i32::MAX as usize })
}

/// Which wire format to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolKind {
    #[default]
    Binary,
    Compact,
}

impl ProtocolKind {
    /// Builds a fresh protocol instance for one connection.
    pub fn protocol(&self, limits: ProtocolLimits) -> Box<dyn Protocol> {
        match self {
            ProtocolKind::Binary => Box::new(BinaryProtocol::with_limits(limits)),
            ProtocolKind::Compact => Box::new(CompactProtocol::with_limits(limits)),
        }
    }

    /// Parses `binary` or `compact` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Some(ProtocolKind::Binary),
            "compact" => Some(ProtocolKind::Compact),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Binary => write!(f, "binary"),
            ProtocolKind::Compact => write!(f, "compact"),
        }
    }
}

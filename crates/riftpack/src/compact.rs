//! # Compact Protocol
//!
//! Variable-length encoding with packed field headers.
//!
//! ## Format
//!
//! - **Integers**: `i16`/`i32` as zig-zag varint32, `i64` as zig-zag varint64, `i8` raw.
//! - **Double**: 8 bytes little-endian.
//! - **Blobs**: `[Len: varint][Data: Len]`
//! - **Fields**: `[Delta: 4b | Type: 4b]` when the id is 1..=15 above the previous id,
//!   otherwise `[0 | Type: 4b][Id: zig-zag varint]`. Bool fields carry their value in
//!   the type nibble (`1` true, `2` false).
//! - **List/Set**: `[Count: 4b | Type: 4b]` for counts up to 14, else `[0xF | Type][Count: varint]`.
//! - **Map**: `[Count: varint][KeyType: 4b | ValueType: 4b]`, the type byte omitted when empty.
//! - **Message**: `[0x82][Kind: 3b | Version: 5b][Seq: varint][Name]`
//!
//! ## Invariants
//! - The previous field id is scoped to the innermost open struct: it is pushed on
//!   struct begin and popped on struct end, independently for reads and writes.

use crate::buffer::Buffer;
use crate::error::Error;
use crate::error::Result;
use crate::message::MessageHeader;
use crate::message::MessageKind;
use crate::protocol::check_write_len;
use crate::protocol::Protocol;
use crate::protocol::ProtocolLimits;
use crate::types::FieldHeader;
use crate::types::ListHeader;
use crate::types::MapHeader;
use crate::types::TType;

pub const PROTOCOL_ID: u8 = 0x82;
pub const VERSION: u8 = 1;
const VERSION_MASK: u8 = 0x1f;
const KIND_SHIFT: u8 = 5;

const CT_STOP: u8 = 0x00;
const CT_BOOL_TRUE: u8 = 0x01;
const CT_BOOL_FALSE: u8 = 0x02;
const CT_I8: u8 = 0x03;
const CT_I16: u8 = 0x04;
const CT_I32: u8 = 0x05;
const CT_I64: u8 = 0x06;
const CT_DOUBLE: u8 = 0x07;
const CT_BINARY: u8 = 0x08;
const CT_LIST: u8 = 0x09;
const CT_SET: u8 = 0x0A;
const CT_MAP: u8 = 0x0B;
const CT_STRUCT: u8 = 0x0C;

fn compact_type(ttype: TType) -> Result<u8> {
    match ttype {
        TType::Stop => Ok(CT_STOP),
        TType::Bool => Ok(CT_BOOL_TRUE),
        TType::I8 => Ok(CT_I8),
        TType::I16 => Ok(CT_I16),
        TType::I32 => Ok(CT_I32),
        TType::I64 => Ok(CT_I64),
        TType::Double => Ok(CT_DOUBLE),
        TType::String => Ok(CT_BINARY),
        TType::List => Ok(CT_LIST),
        TType::Set => Ok(CT_SET),
        TType::Map => Ok(CT_MAP),
        TType::Struct => Ok(CT_STRUCT),
        // No compact nibble exists for void.
        TType::Void => Err(Error::InvalidType(TType::Void as u8)),
    }
}

fn ttype_of(nibble: u8) -> Result<TType> {
    match nibble {
        CT_STOP => Ok(TType::Stop),
        CT_BOOL_TRUE | CT_BOOL_FALSE => Ok(TType::Bool),
        CT_I8 => Ok(TType::I8),
        CT_I16 => Ok(TType::I16),
        CT_I32 => Ok(TType::I32),
        CT_I64 => Ok(TType::I64),
        CT_DOUBLE => Ok(TType::Double),
        CT_BINARY => Ok(TType::String),
        CT_LIST => Ok(TType::List),
        CT_SET => Ok(TType::Set),
        CT_MAP => Ok(TType::Map),
        CT_STRUCT => Ok(TType::Struct),
        _ => Err(Error::InvalidType(nibble)),
    }
}

#[inline]
fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
fn unzigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

#[inline]
fn unzigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

fn put_varint(buf: &mut Buffer, mut n: u64) {
    loop {
        if n & !0x7f == 0 {
            buf.write_u8(n as u8);
            return;
        }
        buf.write_u8(((n & 0x7f) | 0x80) as u8);
        n >>= 7;
    }
}

fn get_varint(buf: &mut Buffer, max_bytes: usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    for _ in 0..max_bytes {
        let b = buf.read_u8()?;
        // The tenth byte of a u64 holds a single bit.
        if shift == 63 && b & 0x7e != 0 {
            return Err(Error::InvalidVarint);
        }
        result |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(Error::InvalidVarint)
}

fn get_varint32(buf: &mut Buffer) -> Result<u32> {
    u32::try_from(get_varint(buf, 5)?).map_err(|_| Error::InvalidVarint)
}

/// A zig-zag varint that must fit an `i16`.
fn get_zigzag16(buf: &mut Buffer) -> Result<i16> {
    i16::try_from(unzigzag32(get_varint32(buf)?)).map_err(|_| Error::InvalidVarint)
}

fn get_varint64(buf: &mut Buffer) -> Result<u64> {
    get_varint(buf, 10)
}

fn get_blob(buf: &mut Buffer, limits: &ProtocolLimits) -> Result<Vec<u8>> {
    let len = limits.check_string(get_varint32(buf)? as i32 as i64)?;
    Ok(buf.read(len)?.to_vec())
}

/// The Compact wire format.
///
/// Holds the field-id delta state, so one instance must not interleave two messages.
#[derive(Debug, Clone, Default)]
pub struct CompactProtocol {
    limits: ProtocolLimits,
    write_stack: Vec<i16>,
    last_write_id: i16,
    /// A bool field whose header waits for its value.
    pending_bool_field: Option<i16>,
    read_stack: Vec<i16>,
    last_read_id: i16,
    /// A bool value already decoded from its field header.
    pending_bool_value: Option<bool>,
}

impl CompactProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ProtocolLimits) -> Self {
        Self { limits, ..Self::default() }
    }

    fn write_field_header(&mut self, buf: &mut Buffer, nibble: u8, id: i16) {
        let delta = id as i32 - self.last_write_id as i32;
        if id > self.last_write_id && delta <= 15 {
            buf.write_u8(((delta as u8) << 4) | nibble);
        } else {
            buf.write_u8(nibble);
            put_varint(buf, zigzag32(id as i32) as u64);
        }
        self.last_write_id = id;
    }

    fn write_collection_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<()> {
        let len = check_write_len(header.len)?;
        let nibble = compact_type(header.elem)?;
        if len <= 14 {
            buf.write_u8(((len as u8) << 4) | nibble);
        } else {
            buf.write_u8(0xf0 | nibble);
            put_varint(buf, len as u64);
        }
        Ok(())
    }
}

impl Protocol for CompactProtocol {
    fn write_message_begin(&mut self, buf: &mut Buffer, header: &MessageHeader) -> Result<()> {
        buf.write_u8(PROTOCOL_ID);
        buf.write_u8((VERSION & VERSION_MASK) | ((header.kind as u8) << KIND_SHIFT));
        put_varint(buf, header.seq as u32 as u64);
        self.write_string(buf, &header.name)
    }

    fn write_struct_begin(&mut self, _buf: &mut Buffer, _name: &str) -> Result<()> {
        self.write_stack.push(self.last_write_id);
        self.last_write_id = 0;
        Ok(())
    }

    fn write_struct_end(&mut self, _buf: &mut Buffer) -> Result<()> {
        self.last_write_id = self.write_stack.pop().ok_or(Error::ScopeUnderflow)?;
        Ok(())
    }

    fn write_field_begin(&mut self, buf: &mut Buffer, _name: &str, ttype: TType, id: i16) -> Result<()> {
        if ttype == TType::Bool {
            self.pending_bool_field = Some(id);
            return Ok(());
        }
        let nibble = compact_type(ttype)?;
        self.write_field_header(buf, nibble, id);
        Ok(())
    }

    fn write_field_stop(&mut self, buf: &mut Buffer) -> Result<()> {
        buf.write_u8(CT_STOP);
        Ok(())
    }

    fn write_list_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<()> {
        self.write_collection_begin(buf, header)
    }

    fn write_set_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<()> {
        self.write_collection_begin(buf, header)
    }

    fn write_map_begin(&mut self, buf: &mut Buffer, header: MapHeader) -> Result<()> {
        let len = check_write_len(header.len)?;
        if len == 0 {
            buf.write_u8(0);
            return Ok(());
        }
        let key = compact_type(header.key)?;
        let value = compact_type(header.value)?;
        put_varint(buf, len as u64);
        buf.write_u8((key << 4) | value);
        Ok(())
    }

    fn write_bool(&mut self, buf: &mut Buffer, v: bool) -> Result<()> {
        let nibble = if v { CT_BOOL_TRUE } else { CT_BOOL_FALSE };
        match self.pending_bool_field.take() {
            Some(id) => self.write_field_header(buf, nibble, id),
            None => buf.write_u8(nibble),
        }
        Ok(())
    }

    fn write_i8(&mut self, buf: &mut Buffer, v: i8) -> Result<()> {
        buf.write_u8(v as u8);
        Ok(())
    }

    fn write_i16(&mut self, buf: &mut Buffer, v: i16) -> Result<()> {
        put_varint(buf, zigzag32(v as i32) as u64);
        Ok(())
    }

    fn write_i32(&mut self, buf: &mut Buffer, v: i32) -> Result<()> {
        put_varint(buf, zigzag32(v) as u64);
        Ok(())
    }

    fn write_i64(&mut self, buf: &mut Buffer, v: i64) -> Result<()> {
        put_varint(buf, zigzag64(v));
        Ok(())
    }

    fn write_double(&mut self, buf: &mut Buffer, v: f64) -> Result<()> {
        buf.write(&v.to_bits().to_le_bytes());
        Ok(())
    }

    fn write_binary(&mut self, buf: &mut Buffer, v: &[u8]) -> Result<()> {
        let len = check_write_len(v.len())?;
        put_varint(buf, len as u64);
        buf.write(v);
        Ok(())
    }

    fn read_message_begin(&mut self, buf: &mut Buffer) -> Result<MessageHeader> {
        let limits = self.limits;
        buf.transact(|buf| {
            let protocol_id = buf.read_u8()?;
            if protocol_id != PROTOCOL_ID {
                return Err(Error::BadVersion(protocol_id as u32));
            }
            let version_and_kind = buf.read_u8()?;
            let version = version_and_kind & VERSION_MASK;
            if version != VERSION {
                return Err(Error::BadVersion(version as u32));
            }
            let kind = MessageKind::from_u8((version_and_kind >> KIND_SHIFT) & 0x07)?;
            let seq = get_varint32(buf)? as i32;
            let name = String::from_utf8(get_blob(buf, &limits)?).map_err(|_| Error::InvalidUtf8)?;
            Ok(MessageHeader { name, kind, seq })
        })
    }

    fn read_struct_begin(&mut self, _buf: &mut Buffer) -> Result<()> {
        self.read_stack.push(self.last_read_id);
        self.last_read_id = 0;
        Ok(())
    }

    fn read_struct_end(&mut self, _buf: &mut Buffer) -> Result<()> {
        self.last_read_id = self.read_stack.pop().ok_or(Error::ScopeUnderflow)?;
        Ok(())
    }

    fn read_field_begin(&mut self, buf: &mut Buffer) -> Result<FieldHeader> {
        let last = self.last_read_id;
        let (header, nibble) = buf.transact(|buf| {
            let b = buf.read_u8()?;
            let nibble = b & 0x0f;
            if nibble == CT_STOP {
                return Ok((FieldHeader::STOP, nibble));
            }
            let ttype = ttype_of(nibble)?;
            let delta = (b >> 4) as i16;
            let id = if delta != 0 {
                last.wrapping_add(delta)
            } else {
                get_zigzag16(buf)?
            };
            Ok((FieldHeader { ttype, id }, nibble))
        })?;

        if !header.is_stop() {
            self.last_read_id = header.id;
            if header.ttype == TType::Bool {
                self.pending_bool_value = Some(nibble == CT_BOOL_TRUE);
            }
        }
        Ok(header)
    }

    fn read_list_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader> {
        let limits = self.limits;
        buf.transact(|buf| {
            let b = buf.read_u8()?;
            let elem = ttype_of(b & 0x0f)?;
            let short = (b >> 4) & 0x0f;
            let len = if short == 0x0f { get_varint32(buf)? as i32 as i64 } else { short as i64 };
            let len = limits.check_container(len)?;
            Ok(ListHeader { elem, len })
        })
    }

    fn read_set_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader> {
        self.read_list_begin(buf)
    }

    fn read_map_begin(&mut self, buf: &mut Buffer) -> Result<MapHeader> {
        let limits = self.limits;
        buf.transact(|buf| {
            let len = limits.check_container(get_varint32(buf)? as i32 as i64)?;
            let types = if len == 0 { 0 } else { buf.read_u8()? };
            let key = ttype_of(types >> 4)?;
            let value = ttype_of(types & 0x0f)?;
            Ok(MapHeader { key, value, len })
        })
    }

    fn read_bool(&mut self, buf: &mut Buffer) -> Result<bool> {
        match self.pending_bool_value.take() {
            Some(v) => Ok(v),
            None => Ok(buf.read_u8()? == CT_BOOL_TRUE),
        }
    }

    fn read_i8(&mut self, buf: &mut Buffer) -> Result<i8> {
        Ok(buf.read_u8()? as i8)
    }

    fn read_i16(&mut self, buf: &mut Buffer) -> Result<i16> {
        buf.transact(get_zigzag16)
    }

    fn read_i32(&mut self, buf: &mut Buffer) -> Result<i32> {
        buf.transact(|buf| Ok(unzigzag32(get_varint32(buf)?)))
    }

    fn read_i64(&mut self, buf: &mut Buffer) -> Result<i64> {
        buf.transact(|buf| Ok(unzigzag64(get_varint64(buf)?)))
    }

    fn read_double(&mut self, buf: &mut Buffer) -> Result<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(buf.read_array()?)))
    }

    fn read_binary(&mut self, buf: &mut Buffer) -> Result<Vec<u8>> {
        let limits = self.limits;
        buf.transact(|buf| get_blob(buf, &limits))
    }

    fn reset(&mut self) {
        self.write_stack.clear();
        self.last_write_id = 0;
        self.pending_bool_field = None;
        self.read_stack.clear();
        self.last_read_id = 0;
        self.pending_bool_value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_boundaries() {
        for n in [0, -1, 1, i32::MIN, i32::MAX, -64, 63] {
            assert_eq!(unzigzag32(zigzag32(n)), n);
        }
        for n in [0, -1, 1, i64::MIN, i64::MAX] {
            assert_eq!(unzigzag64(zigzag64(n)), n);
        }
        assert_eq!(zigzag32(-1), 1);
        assert_eq!(zigzag32(1), 2);
    }

    #[test]
    fn varint_encoding() {
        let mut buf = Buffer::new();
        put_varint(&mut buf, 300);
        assert_eq!(buf.written(), &[0xac, 0x02]);
        assert_eq!(get_varint32(&mut buf).unwrap(), 300);
    }

    #[test]
    fn varint_too_long() {
        let mut buf = Buffer::from_vec(vec![0xff; 6]);
        assert_eq!(get_varint32(&mut buf), Err(Error::InvalidVarint));
    }

    #[test]
    fn varint_too_wide() {
        // Five bytes carrying 35 bits.
        let mut buf = Buffer::from_vec(vec![0xff, 0xff, 0xff, 0xff, 0x7f]);
        assert_eq!(get_varint32(&mut buf), Err(Error::InvalidVarint));

        let mut buf = Buffer::from_vec(vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert_eq!(get_varint32(&mut buf), Ok(u32::MAX));

        let mut wide = vec![0xff; 9];
        wide.push(0x02);
        assert_eq!(get_varint64(&mut Buffer::from_vec(wide)), Err(Error::InvalidVarint));
    }

    #[test]
    fn field_id_out_of_range() -> Result<()> {
        // Long-form header for an i32 field whose id zig-zags to 40000.
        let mut buf = Buffer::new();
        buf.write_u8(0x05);
        put_varint(&mut buf, zigzag32(40_000) as u64);
        let mut proto = CompactProtocol::new();
        proto.read_struct_begin(&mut buf)?;
        assert_eq!(proto.read_field_begin(&mut buf), Err(Error::InvalidVarint));

        let mut buf = Buffer::new();
        put_varint(&mut buf, zigzag32(-40_000) as u64);
        assert_eq!(proto.read_i16(&mut buf), Err(Error::InvalidVarint));
        Ok(())
    }
}

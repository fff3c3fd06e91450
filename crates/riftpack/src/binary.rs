//! # Binary Protocol
//!
//! Fixed-width, big-endian encoding.
//!
//! ## Format
//!
//! - **Scalars**: `i8` 1b, `i16` 2b, `i32` 4b, `i64` 8b, `double` 8b IEEE-754, `bool` 1b.
//! - **Blobs**: `[Len: i32][Data: Len]`
//! - **Fields**: `[Type: 1b][Id: i16][Value]`, ended by a single `0x00` stop byte.
//! - **List/Set**: `[ElemType: 1b][Count: i32][Elems]`
//! - **Map**: `[KeyType: 1b][ValueType: 1b][Count: i32][Key Value ...]`
//! - **Message**: strict `[0x8001_00KK: i32][Name][Seq: i32]`,
//!   or legacy `[Name][Kind: 1b][Seq: i32]`.

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

pub const VERSION_1: u32 = 0x8001_0000;
pub const VERSION_MASK: u32 = 0xffff_0000;

/// The Binary wire format. Stateless apart from its limits.
#[derive(Debug, Clone, Default)]
pub struct BinaryProtocol {
    limits: ProtocolLimits,
}

impl BinaryProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ProtocolLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ProtocolLimits {
        &self.limits
    }
}

fn get_i16(buf: &mut Buffer) -> Result<i16> {
    Ok(i16::from_be_bytes(buf.read_array()?))
}

fn get_i32(buf: &mut Buffer) -> Result<i32> {
    Ok(i32::from_be_bytes(buf.read_array()?))
}

fn get_ttype(buf: &mut Buffer) -> Result<TType> {
    TType::try_from_u8(buf.read_u8()?)
}

fn get_blob(buf: &mut Buffer, limits: &ProtocolLimits) -> Result<Vec<u8>> {
    let len = limits.check_string(get_i32(buf)? as i64)?;
    Ok(buf.read(len)?.to_vec())
}

impl Protocol for BinaryProtocol {
    fn write_message_begin(&mut self, buf: &mut Buffer, header: &MessageHeader) -> Result<()> {
        if self.limits.strict_write {
            let version = VERSION_1 | header.kind as u32;
            self.write_i32(buf, version as i32)?;
            self.write_string(buf, &header.name)?;
        } else {
            self.write_string(buf, &header.name)?;
            buf.write_u8(header.kind as u8);
        }
        self.write_i32(buf, header.seq)
    }

    fn write_struct_begin(&mut self, _buf: &mut Buffer, _name: &str) -> Result<()> {
        Ok(())
    }

    fn write_struct_end(&mut self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    fn write_field_begin(&mut self, buf: &mut Buffer, _name: &str, ttype: TType, id: i16) -> Result<()> {
        buf.write_u8(ttype as u8);
        self.write_i16(buf, id)
    }

    fn write_field_stop(&mut self, buf: &mut Buffer) -> Result<()> {
        buf.write_u8(TType::Stop as u8);
        Ok(())
    }

    fn write_list_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<()> {
        let len = check_write_len(header.len)?;
        buf.write_u8(header.elem as u8);
        self.write_i32(buf, len)
    }

    fn write_set_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<()> {
        self.write_list_begin(buf, header)
    }

    fn write_map_begin(&mut self, buf: &mut Buffer, header: MapHeader) -> Result<()> {
        let len = check_write_len(header.len)?;
        buf.write_u8(header.key as u8);
        buf.write_u8(header.value as u8);
        self.write_i32(buf, len)
    }

    fn write_bool(&mut self, buf: &mut Buffer, v: bool) -> Result<()> {
        buf.write_u8(v as u8);
        Ok(())
    }

    fn write_i8(&mut self, buf: &mut Buffer, v: i8) -> Result<()> {
        buf.write_u8(v as u8);
        Ok(())
    }

    fn write_i16(&mut self, buf: &mut Buffer, v: i16) -> Result<()> {
        buf.write(&v.to_be_bytes());
        Ok(())
    }

    fn write_i32(&mut self, buf: &mut Buffer, v: i32) -> Result<()> {
        buf.write(&v.to_be_bytes());
        Ok(())
    }

    fn write_i64(&mut self, buf: &mut Buffer, v: i64) -> Result<()> {
        buf.write(&v.to_be_bytes());
        Ok(())
    }

    fn write_double(&mut self, buf: &mut Buffer, v: f64) -> Result<()> {
        buf.write(&v.to_bits().to_be_bytes());
        Ok(())
    }

    fn write_binary(&mut self, buf: &mut Buffer, v: &[u8]) -> Result<()> {
        let len = check_write_len(v.len())?;
        self.write_i32(buf, len)?;
        buf.write(v);
        Ok(())
    }

    fn read_message_begin(&mut self, buf: &mut Buffer) -> Result<MessageHeader> {
        let limits = self.limits;
        buf.transact(|buf| {
            let first = get_i32(buf)?;
            if first < 0 {
                let word = first as u32;
                if word & VERSION_MASK != VERSION_1 {
                    return Err(Error::BadVersion(word));
                }
                let kind = MessageKind::from_u8((word & 0xff) as u8)?;
                let name = String::from_utf8(get_blob(buf, &limits)?).map_err(|_| Error::InvalidUtf8)?;
                let seq = get_i32(buf)?;
                Ok(MessageHeader { name, kind, seq })
            } else {
                if limits.strict_read {
                    return Err(Error::BadVersion(first as u32));
                }
                // Legacy header: the first word is the name length.
                let len = limits.check_string(first as i64)?;
                let name = String::from_utf8(buf.read(len)?.to_vec()).map_err(|_| Error::InvalidUtf8)?;
                let kind = MessageKind::from_u8(buf.read_u8()?)?;
                let seq = get_i32(buf)?;
                Ok(MessageHeader { name, kind, seq })
            }
        })
    }

    fn read_struct_begin(&mut self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    fn read_struct_end(&mut self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    fn read_field_begin(&mut self, buf: &mut Buffer) -> Result<FieldHeader> {
        buf.transact(|buf| {
            let ttype = get_ttype(buf)?;
            if ttype == TType::Stop {
                return Ok(FieldHeader::STOP);
            }
            let id = get_i16(buf)?;
            Ok(FieldHeader { ttype, id })
        })
    }

    fn read_list_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader> {
        let limits = self.limits;
        buf.transact(|buf| {
            let elem = get_ttype(buf)?;
            let len = limits.check_container(get_i32(buf)? as i64)?;
            Ok(ListHeader { elem, len })
        })
    }

    fn read_set_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader> {
        self.read_list_begin(buf)
    }

    fn read_map_begin(&mut self, buf: &mut Buffer) -> Result<MapHeader> {
        let limits = self.limits;
        buf.transact(|buf| {
            let key = get_ttype(buf)?;
            let value = get_ttype(buf)?;
            let len = limits.check_container(get_i32(buf)? as i64)?;
            Ok(MapHeader { key, value, len })
        })
    }

    fn read_bool(&mut self, buf: &mut Buffer) -> Result<bool> {
        Ok(buf.read_u8()? != 0)
    }

    fn read_i8(&mut self, buf: &mut Buffer) -> Result<i8> {
        Ok(buf.read_u8()? as i8)
    }

    fn read_i16(&mut self, buf: &mut Buffer) -> Result<i16> {
        get_i16(buf)
    }

    fn read_i32(&mut self, buf: &mut Buffer) -> Result<i32> {
        get_i32(buf)
    }

    fn read_i64(&mut self, buf: &mut Buffer) -> Result<i64> {
        Ok(i64::from_be_bytes(buf.read_array()?))
    }

    fn read_double(&mut self, buf: &mut Buffer) -> Result<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(buf.read_array()?)))
    }

    fn read_binary(&mut self, buf: &mut Buffer) -> Result<Vec<u8>> {
        let limits = self.limits;
        buf.transact(|buf| get_blob(buf, &limits))
    }

    fn reset(&mut self) {}
}

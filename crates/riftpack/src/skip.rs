//! # Skip
//!
//! Consumes one value using only its wire type, discarding the result. This is what
//! lets a reader step over fields it has no descriptor for.

use crate::buffer::Buffer;
use crate::error::Error;
use crate::error::Result;
use crate::protocol::Protocol;
use crate::types::TType;

/// The maximum nesting depth for structs and containers.
pub const MAX_DEPTH: usize = 64;

/// Skips the next value of type `ttype`.
///
/// Consumes exactly the bytes a full decode of the same value would.
pub fn skip<P: Protocol + ?Sized>(proto: &mut P, buf: &mut Buffer, ttype: TType) -> Result<()> {
    skip_depth(proto, buf, ttype, 0)
}

pub(crate) fn skip_depth<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    ttype: TType,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::DepthLimit);
    }

    match ttype {
        TType::Stop => return Err(Error::InvalidType(TType::Stop as u8)),
        TType::Void => {}
        TType::Bool => { proto.read_bool(buf)?; }
        TType::I8 => { proto.read_i8(buf)?; }
        TType::I16 => { proto.read_i16(buf)?; }
        TType::I32 => { proto.read_i32(buf)?; }
        TType::I64 => { proto.read_i64(buf)?; }
        TType::Double => { proto.read_double(buf)?; }
        TType::String => { proto.read_binary(buf)?; }
        TType::Struct => {
            proto.read_struct_begin(buf)?;
            loop {
                let field = proto.read_field_begin(buf)?;
                if field.is_stop() {
                    break;
                }
                skip_depth(proto, buf, field.ttype, depth + 1)?;
                proto.read_field_end(buf)?;
            }
            proto.read_struct_end(buf)?;
        }
        TType::List => {
            let header = proto.read_list_begin(buf)?;
            for _ in 0..header.len {
                element(skip_depth(proto, buf, header.elem, depth + 1))?;
            }
            proto.read_list_end(buf)?;
        }
        TType::Set => {
            let header = proto.read_set_begin(buf)?;
            for _ in 0..header.len {
                element(skip_depth(proto, buf, header.elem, depth + 1))?;
            }
            proto.read_set_end(buf)?;
        }
        TType::Map => {
            let header = proto.read_map_begin(buf)?;
            for _ in 0..header.len {
                element(skip_depth(proto, buf, header.key, depth + 1))?;
                element(skip_depth(proto, buf, header.value, depth + 1))?;
            }
            proto.read_map_end(buf)?;
        }
    }
    Ok(())
}

/// A container element that runs out of bytes means the declared count was a lie.
pub(crate) fn element<T>(result: Result<T>) -> Result<T> {
    match result {
        Err(e @ Error::Underflow { .. }) => Err(Error::MalformedContainer(Box::new(e))),
        other => other,
    }
}

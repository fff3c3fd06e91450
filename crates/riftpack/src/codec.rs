//! # Codec
//!
//! Descriptor-driven translation between [`Value`]s and a [`Protocol`].
//!
//! ## Invariants
//! - **Recursion Safety**: nesting is bounded by `MAX_DEPTH`.
//! - **Forward Compatibility**: fields missing from the descriptor, or carrying an
//!   unexpected wire type, are skipped rather than rejected.
//! - **Atomicity**: the public entry points restore the buffer and the protocol state
//!   when they fail, so a streaming reader can retry once more bytes arrive.

use tracing::trace;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::error::Result;
use crate::protocol::Protocol;
use crate::skip::element;
use crate::skip::skip_depth;
use crate::skip::MAX_DEPTH;
use crate::types::ListHeader;
use crate::types::MapHeader;
use crate::types::Requiredness;
use crate::types::StructDescriptor;
use crate::types::StructKind;
use crate::types::TType;
use crate::types::TypeDescriptor;
use crate::value::StructValue;
use crate::value::Value;

/// Encodes `value` as a `ty`.
///
/// # Errors
/// `Error::Overflow` when an integer exceeds the declared width,
/// `Error::TypeMismatch` when the value cannot represent `ty` at all.
pub fn write_value<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    value: &Value,
    ty: &TypeDescriptor,
) -> Result<()> {
    rollback_on_error(proto, buf, |proto, buf| write_value_impl(proto, buf, value, ty, 0))
}

/// Encodes a struct, union or exception.
pub fn write_struct<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    value: &StructValue,
    desc: &StructDescriptor,
) -> Result<()> {
    rollback_on_error(proto, buf, |proto, buf| write_struct_impl(proto, buf, value, desc, 0))
}

/// Decodes a value of type `ty`.
pub fn read_value<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    ty: &TypeDescriptor,
) -> Result<Value> {
    rewind_on_error(proto, buf, |proto, buf| read_value_impl(proto, buf, ty, 0))
}

/// Decodes a struct, skipping fields the descriptor does not know.
pub fn read_struct<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    desc: &StructDescriptor,
) -> Result<StructValue> {
    rewind_on_error(proto, buf, |proto, buf| read_struct_impl(proto, buf, desc, 0))
}

fn rollback_on_error<P: Protocol + ?Sized, T>(
    proto: &mut P,
    buf: &mut Buffer,
    f: impl FnOnce(&mut P, &mut Buffer) -> Result<T>,
) -> Result<T> {
    let start = buf.write_offset();
    let result = f(proto, buf);
    if result.is_err() {
        buf.truncate(start);
        proto.reset();
    }
    result
}

fn rewind_on_error<P: Protocol + ?Sized, T>(
    proto: &mut P,
    buf: &mut Buffer,
    f: impl FnOnce(&mut P, &mut Buffer) -> Result<T>,
) -> Result<T> {
    let mark = buf.mark();
    let result = f(proto, buf);
    if result.is_err() {
        buf.rewind(mark);
        proto.reset();
    }
    result
}

fn integer(value: &Value, ty: TType) -> Result<i64> {
    value.as_i64().ok_or(Error::TypeMismatch { expected: ty, found: value.ttype() })
}

fn narrow<T: TryFrom<i64>>(value: &Value, ty: TType) -> Result<T> {
    let n = integer(value, ty)?;
    T::try_from(n).map_err(|_| Error::Overflow { ty, value: n })
}

fn write_value_impl<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    value: &Value,
    ty: &TypeDescriptor,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::DepthLimit);
    }

    match (ty, value) {
        (TypeDescriptor::Void, Value::Void) => Ok(()),
        (TypeDescriptor::Bool, Value::Bool(b)) => proto.write_bool(buf, *b),
        (TypeDescriptor::I8, v) => proto.write_i8(buf, narrow(v, TType::I8)?),
        (TypeDescriptor::I16, v) => proto.write_i16(buf, narrow(v, TType::I16)?),
        (TypeDescriptor::I32, v) => proto.write_i32(buf, narrow(v, TType::I32)?),
        (TypeDescriptor::I64, v) => proto.write_i64(buf, integer(v, TType::I64)?),
        (TypeDescriptor::Double, Value::Double(d)) => proto.write_double(buf, *d),
        (TypeDescriptor::String, Value::String(s)) => proto.write_string(buf, s),
        (TypeDescriptor::Binary, Value::Binary(b)) => proto.write_binary(buf, b),
        (TypeDescriptor::Binary, Value::String(s)) => proto.write_binary(buf, s.as_bytes()),
        (TypeDescriptor::Struct(desc), Value::Struct(s)) => write_struct_impl(proto, buf, s, desc, depth + 1),
        (TypeDescriptor::List(elem), Value::List(items)) => {
            proto.write_list_begin(buf, ListHeader::new(elem.ttype(), items.len()))?;
            for item in items {
                write_value_impl(proto, buf, item, elem, depth + 1)?;
            }
            proto.write_list_end(buf)
        }
        (TypeDescriptor::Set(elem), Value::Set(items)) => {
            proto.write_set_begin(buf, ListHeader::new(elem.ttype(), items.len()))?;
            for item in items {
                write_value_impl(proto, buf, item, elem, depth + 1)?;
            }
            proto.write_set_end(buf)
        }
        (TypeDescriptor::Map(key_ty, val_ty), Value::Map(entries)) => {
            proto.write_map_begin(buf, MapHeader::new(key_ty.ttype(), val_ty.ttype(), entries.len()))?;
            for (k, v) in entries {
                write_value_impl(proto, buf, k, key_ty, depth + 1)?;
                write_value_impl(proto, buf, v, val_ty, depth + 1)?;
            }
            proto.write_map_end(buf)
        }
        _ => Err(Error::TypeMismatch { expected: ty.ttype(), found: value.ttype() }),
    }
}

fn write_struct_impl<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    value: &StructValue,
    desc: &StructDescriptor,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::DepthLimit);
    }
    if desc.kind == StructKind::Union && value.len() != 1 {
        return Err(Error::InvalidUnion { structure: desc.name, count: value.len() });
    }

    proto.write_struct_begin(buf, desc.name)?;
    for field in desc.fields {
        let Some(v) = value.get(field.id) else {
            if field.requiredness == Requiredness::Required {
                return Err(Error::MissingField { structure: desc.name, field: field.name });
            }
            continue;
        };
        if field.id == 0 {
            return Err(Error::InvalidFieldId(0));
        }
        // Void fields carry no data.
        if field.ty == TypeDescriptor::Void {
            continue;
        }
        proto.write_field_begin(buf, field.name, field.ty.ttype(), field.id)?;
        write_value_impl(proto, buf, v, &field.ty, depth + 1)?;
        proto.write_field_end(buf)?;
    }
    proto.write_field_stop(buf)?;
    proto.write_struct_end(buf)
}

fn read_value_impl<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    ty: &TypeDescriptor,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::DepthLimit);
    }

    let value = match ty {
        TypeDescriptor::Void => Value::Void,
        TypeDescriptor::Bool => Value::Bool(proto.read_bool(buf)?),
        TypeDescriptor::I8 => Value::I8(proto.read_i8(buf)?),
        TypeDescriptor::I16 => Value::I16(proto.read_i16(buf)?),
        TypeDescriptor::I32 => Value::I32(proto.read_i32(buf)?),
        TypeDescriptor::I64 => Value::I64(proto.read_i64(buf)?),
        TypeDescriptor::Double => Value::Double(proto.read_double(buf)?),
        TypeDescriptor::String => Value::String(proto.read_string(buf)?),
        TypeDescriptor::Binary => Value::Binary(proto.read_binary(buf)?),
        TypeDescriptor::Struct(desc) => Value::Struct(read_struct_impl(proto, buf, desc, depth + 1)?),
        TypeDescriptor::List(elem) => {
            let header = proto.read_list_begin(buf)?;
            let items = read_elements(proto, buf, header, elem, depth)?;
            proto.read_list_end(buf)?;
            Value::List(items)
        }
        TypeDescriptor::Set(elem) => {
            let header = proto.read_set_begin(buf)?;
            let items = read_elements(proto, buf, header, elem, depth)?;
            proto.read_set_end(buf)?;
            Value::Set(items)
        }
        TypeDescriptor::Map(key_ty, val_ty) => {
            let header = proto.read_map_begin(buf)?;
            if header.len > 0 {
                expect_type(key_ty.ttype(), header.key)?;
                expect_type(val_ty.ttype(), header.value)?;
            }
            // The declared count is untrusted; don't let it size the allocation.
            let mut entries = Vec::with_capacity(header.len.min(buf.remaining()));
            for _ in 0..header.len {
                let k = element(read_value_impl(proto, buf, key_ty, depth + 1))?;
                let v = element(read_value_impl(proto, buf, val_ty, depth + 1))?;
                entries.push((k, v));
            }
            proto.read_map_end(buf)?;
            Value::Map(entries)
        }
    };
    Ok(value)
}

fn read_elements<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    header: ListHeader,
    elem: &TypeDescriptor,
    depth: usize,
) -> Result<Vec<Value>> {
    if header.len > 0 {
        expect_type(elem.ttype(), header.elem)?;
    }
    let mut items = Vec::with_capacity(header.len.min(buf.remaining()));
    for _ in 0..header.len {
        items.push(element(read_value_impl(proto, buf, elem, depth + 1))?);
    }
    Ok(items)
}

fn expect_type(expected: TType, found: TType) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::TypeMismatch { expected, found })
    }
}

fn read_struct_impl<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    desc: &StructDescriptor,
    depth: usize,
) -> Result<StructValue> {
    if depth > MAX_DEPTH {
        return Err(Error::DepthLimit);
    }

    let mut out = StructValue::new();
    proto.read_struct_begin(buf)?;
    loop {
        let header = proto.read_field_begin(buf)?;
        if header.is_stop() {
            break;
        }
        match desc.field(header.id) {
            Some(field) if field.ty.ttype() == header.ttype => {
                let v = read_value_impl(proto, buf, &field.ty, depth + 1)?;
                out.set(header.id, v);
            }
            Some(field) => {
                trace!(
                    structure = desc.name,
                    field = field.name,
                    expected = ?field.ty.ttype(),
                    found = ?header.ttype,
                    "skipping field with unexpected wire type"
                );
                skip_depth(proto, buf, header.ttype, depth + 1)?;
            }
            None => {
                trace!(structure = desc.name, id = header.id, ttype = ?header.ttype, "skipping unknown field");
                skip_depth(proto, buf, header.ttype, depth + 1)?;
            }
        }
        proto.read_field_end(buf)?;
    }
    proto.read_struct_end(buf)?;

    for field in desc.fields {
        if field.requiredness == Requiredness::Required
            && field.ty != TypeDescriptor::Void
            && !out.contains(field.id)
        {
            return Err(Error::MissingField { structure: desc.name, field: field.name });
        }
    }
    if desc.kind == StructKind::Union && out.len() != 1 {
        return Err(Error::InvalidUnion { structure: desc.name, count: out.len() });
    }
    Ok(out)
}

//! # Type Model
//!
//! Wire tags (`TType`) and the static descriptors generated types are described by.
//!
//! Descriptors are `const`-constructible so a generated type can declare them once as
//! `static` items:
//!
//! ```
//! use riftpack::{FieldDescriptor, StructDescriptor, TypeDescriptor};
//!
//! static POINT: StructDescriptor = StructDescriptor::new("Point", &[
//!     FieldDescriptor::required("x", 1, TypeDescriptor::I32),
//!     FieldDescriptor::required("y", 2, TypeDescriptor::I32),
//!     FieldDescriptor::optional("tags", 3, TypeDescriptor::List(&TypeDescriptor::String)),
//! ]);
//!
//! assert!(POINT.validate().is_ok());
//! ```

use crate::error::Error;
use crate::error::Result;

/// Identifies the type of an encoded value on the wire.
///
/// The discriminants are the Binary protocol's type bytes. The Compact protocol maps
/// them to its own nibbles.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TType {
    /// End-of-fields marker.
    Stop = 0,
    Void = 1,
    Bool = 2,
    I8 = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    /// Strings and binary blobs.
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl TType {
    /// Returns the TType for a Binary protocol type byte, or `None` if invalid.
    pub const fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(TType::Stop),
            1 => Some(TType::Void),
            2 => Some(TType::Bool),
            3 => Some(TType::I8),
            4 => Some(TType::Double),
            6 => Some(TType::I16),
            8 => Some(TType::I32),
            10 => Some(TType::I64),
            11 => Some(TType::String),
            12 => Some(TType::Struct),
            13 => Some(TType::Map),
            14 => Some(TType::Set),
            15 => Some(TType::List),
            _ => None,
        }
    }

    pub(crate) fn try_from_u8(b: u8) -> Result<Self> {
        Self::from_u8(b).ok_or(Error::InvalidType(b))
    }
}

/// Full static type of a value: wire tag plus element/struct information.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypeDescriptor {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    Double,
    /// UTF-8 text; shares the wire tag with `Binary`.
    String,
    /// Raw bytes.
    Binary,
    Struct(&'static StructDescriptor),
    Map(&'static TypeDescriptor, &'static TypeDescriptor),
    Set(&'static TypeDescriptor),
    List(&'static TypeDescriptor),
}

impl TypeDescriptor {
    /// The wire tag this descriptor encodes as.
    pub const fn ttype(&self) -> TType {
        match self {
            TypeDescriptor::Void => TType::Void,
            TypeDescriptor::Bool => TType::Bool,
            TypeDescriptor::I8 => TType::I8,
            TypeDescriptor::I16 => TType::I16,
            TypeDescriptor::I32 => TType::I32,
            TypeDescriptor::I64 => TType::I64,
            TypeDescriptor::Double => TType::Double,
            TypeDescriptor::String | TypeDescriptor::Binary => TType::String,
            TypeDescriptor::Struct(_) => TType::Struct,
            TypeDescriptor::Map(_, _) => TType::Map,
            TypeDescriptor::Set(_) => TType::Set,
            TypeDescriptor::List(_) => TType::List,
        }
    }
}

/// Whether a field must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requiredness {
    /// Absence is an error on encode and decode.
    Required,
    Optional,
    /// Written when set, tolerated when absent.
    Default,
}

/// One field of a struct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDescriptor {
    /// Debug only; not on the Binary or Compact wire.
    pub name: &'static str,
    pub id: i16,
    pub ty: TypeDescriptor,
    pub requiredness: Requiredness,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, id: i16, ty: TypeDescriptor) -> Self {
        Self { name, id, ty, requiredness: Requiredness::Default }
    }

    pub const fn required(name: &'static str, id: i16, ty: TypeDescriptor) -> Self {
        Self { name, id, ty, requiredness: Requiredness::Required }
    }

    pub const fn optional(name: &'static str, id: i16, ty: TypeDescriptor) -> Self {
        Self { name, id, ty, requiredness: Requiredness::Optional }
    }
}

/// Flavour of a struct-shaped type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Struct,
    /// Exactly one field is set.
    Union,
    /// Encodes like a struct; raised by services.
    Exception,
}

/// Static metadata for a struct, union or exception.
///
/// Field order only matters for canonical re-encoding; decoding matches fields by id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructDescriptor {
    pub name: &'static str,
    pub kind: StructKind,
    pub fields: &'static [FieldDescriptor],
}

impl StructDescriptor {
    pub const fn new(name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { name, kind: StructKind::Struct, fields }
    }

    pub const fn union(name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { name, kind: StructKind::Union, fields }
    }

    pub const fn exception(name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { name, kind: StructKind::Exception, fields }
    }

    /// Looks up a field by id.
    pub fn field(&self, id: i16) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Checks that field ids are non-zero and unique.
    pub fn validate(&self) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if field.id == 0 {
                return Err(Error::InvalidFieldId(0));
            }
            if self.fields[..i].iter().any(|f| f.id == field.id) {
                return Err(Error::DuplicateFieldId { structure: self.name, id: field.id });
            }
        }
        Ok(())
    }
}

/// Header read at the start of every field. `ttype == Stop` ends the struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    pub ttype: TType,
    pub id: i16,
}

impl FieldHeader {
    pub const STOP: FieldHeader = FieldHeader { ttype: TType::Stop, id: 0 };

    pub fn new(ttype: TType, id: i16) -> Self {
        Self { ttype, id }
    }

    pub fn is_stop(&self) -> bool {
        self.ttype == TType::Stop
    }
}

/// List and set header: element type plus declared count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    pub elem: TType,
    pub len: usize,
}

impl ListHeader {
    pub fn new(elem: TType, len: usize) -> Self {
        Self { elem, len }
    }
}

/// Map header: key and value types plus declared count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHeader {
    pub key: TType,
    pub value: TType,
    pub len: usize,
}

impl MapHeader {
    pub fn new(key: TType, value: TType, len: usize) -> Self {
        Self { key, value, len }
    }
}

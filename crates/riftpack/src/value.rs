//! Dynamic values, interpreted against a [`TypeDescriptor`](crate::TypeDescriptor).

use std::collections::BTreeMap;

use crate::types::TType;

/// A decoded (or to-be-encoded) value.
///
/// Enums travel as `I32`. Integer variants narrower than a field's declared width are
/// widened on encode; wider ones are range-checked.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Struct(StructValue),
    List(Vec<Value>),
    Set(Vec<Value>),
    /// Entries in iteration (wire) order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// The wire tag this value would naturally encode as.
    pub fn ttype(&self) -> TType {
        match self {
            Value::Void => TType::Void,
            Value::Bool(_) => TType::Bool,
            Value::I8(_) => TType::I8,
            Value::I16(_) => TType::I16,
            Value::I32(_) => TType::I32,
            Value::I64(_) => TType::I64,
            Value::Double(_) => TType::Double,
            Value::String(_) | Value::Binary(_) => TType::String,
            Value::Struct(_) => TType::Struct,
            Value::List(_) => TType::List,
            Value::Set(_) => TType::Set,
            Value::Map(_) => TType::Map,
        }
    }

    /// Any integer variant, widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self { Value::I8(v) }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self { Value::I16(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::I32(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::I64(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Double(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Binary(v) }
}

impl From<StructValue> for Value {
    fn from(v: StructValue) -> Self { Value::Struct(v) }
}

/// Field id to value. Absent fields are simply not present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructValue {
    fields: BTreeMap<i16, Value>,
}

impl StructValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, id: i16, value: impl Into<Value>) -> Self {
        self.fields.insert(id, value.into());
        self
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, id: i16, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(id, value.into())
    }

    pub fn get(&self, id: i16) -> Option<&Value> {
        self.fields.get(&id)
    }

    pub fn remove(&mut self, id: i16) -> Option<Value> {
        self.fields.remove(&id)
    }

    pub fn contains(&self, id: i16) -> bool {
        self.fields.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (i16, &Value)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    pub fn get_i32(&self, id: i16) -> Option<i32> {
        match self.get(id)? {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, id: i16) -> Option<i64> {
        self.get(id)?.as_i64()
    }

    pub fn get_str(&self, id: i16) -> Option<&str> {
        self.get(id)?.as_str()
    }

    pub fn get_struct(&self, id: i16) -> Option<&StructValue> {
        self.get(id)?.as_struct()
    }
}

impl FromIterator<(i16, Value)> for StructValue {
    fn from_iter<I: IntoIterator<Item = (i16, Value)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

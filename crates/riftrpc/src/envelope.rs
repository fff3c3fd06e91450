//! # Message Envelope
//!
//! A message is a header (method name, kind, sequence id) followed by one struct: the
//! arguments of a Call or Oneway, the result of a Reply, or an [`ApplicationException`].
//!
//! ## Invariants
//! - **Atomic Writes**: a message that fails to encode leaves nothing in the buffer.
//! - **Forward Compatibility**: unknown exception kinds decode as `Unknown`.

use std::fmt;

use riftpack::codec;
use riftpack::Buffer;
use riftpack::FieldDescriptor;
use riftpack::MessageHeader;
use riftpack::Protocol;
use riftpack::StructDescriptor;
use riftpack::StructValue;
use riftpack::TypeDescriptor;

/// Writes a complete message: header, payload struct, end marker.
///
/// On failure the buffer is truncated to where it started and the protocol reset.
pub fn write_message<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    header: &MessageHeader,
    payload: &StructValue,
    desc: &StructDescriptor,
) -> riftpack::Result<()> {
    let start = buf.write_offset();
    let result = write_message_parts(proto, buf, header, payload, desc);
    if result.is_err() {
        buf.truncate(start);
        proto.reset();
    }
    result
}

fn write_message_parts<P: Protocol + ?Sized>(
    proto: &mut P,
    buf: &mut Buffer,
    header: &MessageHeader,
    payload: &StructValue,
    desc: &StructDescriptor,
) -> riftpack::Result<()> {
    proto.write_message_begin(buf, header)?;
    codec::write_struct(proto, buf, payload, desc)?;
    proto.write_message_end(buf)
}

/// Reads the header of the next message, leaving the buffer at its payload.
pub fn read_header<P: Protocol + ?Sized>(proto: &mut P, buf: &mut Buffer) -> riftpack::Result<MessageHeader> {
    proto.read_message_begin(buf)
}

/// Why a peer rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ExceptionKind {
    #[default]
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
    InvalidTransform = 8,
    InvalidProtocol = 9,
    UnsupportedClientType = 10,
}

impl ExceptionKind {
    pub fn from_i32(n: i32) -> Self {
        match n {
            1 => Self::UnknownMethod,
            2 => Self::InvalidMessageType,
            3 => Self::WrongMethodName,
            4 => Self::BadSequenceId,
            5 => Self::MissingResult,
            6 => Self::InternalError,
            7 => Self::ProtocolError,
            8 => Self::InvalidTransform,
            9 => Self::InvalidProtocol,
            10 => Self::UnsupportedClientType,
            _ => Self::Unknown,
        }
    }
}

pub static APPLICATION_EXCEPTION: StructDescriptor = StructDescriptor::exception("TApplicationException", &[
    FieldDescriptor::optional("message", 1, TypeDescriptor::String),
    FieldDescriptor::optional("type", 2, TypeDescriptor::I32),
]);

/// The payload of an `Exception` message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplicationException {
    pub kind: ExceptionKind,
    pub message: String,
}

impl ApplicationException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn to_value(&self) -> StructValue {
        StructValue::new()
            .with(1, self.message.as_str())
            .with(2, self.kind as i32)
    }

    /// Missing fields fall back to an empty message and `Unknown`.
    pub fn from_value(value: &StructValue) -> Self {
        Self {
            kind: value.get_i32(2).map(ExceptionKind::from_i32).unwrap_or_default(),
            message: value.get_str(1).unwrap_or_default().to_string(),
        }
    }

    pub fn read<P: Protocol + ?Sized>(proto: &mut P, buf: &mut Buffer) -> riftpack::Result<Self> {
        let value = codec::read_struct(proto, buf, &APPLICATION_EXCEPTION)?;
        Ok(Self::from_value(&value))
    }

    pub fn write<P: Protocol + ?Sized>(&self, proto: &mut P, buf: &mut Buffer) -> riftpack::Result<()> {
        codec::write_struct(proto, buf, &self.to_value(), &APPLICATION_EXCEPTION)
    }
}

impl fmt::Display for ApplicationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ApplicationException {}

//! Message header written by `Protocol::write_message_begin`.

use crate::error::Error;
use crate::error::Result;

/// Kind of an RPC message.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Call = 1,
    Reply = 2,
    Exception = 3,
    /// A call with no reply.
    Oneway = 4,
}

impl MessageKind {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageKind::Call),
            2 => Ok(MessageKind::Reply),
            3 => Ok(MessageKind::Exception),
            4 => Ok(MessageKind::Oneway),
            _ => Err(Error::InvalidMessageKind(b)),
        }
    }

    /// Call and Oneway travel client to server; Reply and Exception travel back.
    pub fn is_request(&self) -> bool {
        matches!(self, MessageKind::Call | MessageKind::Oneway)
    }
}

/// The `(kind, method name, sequence id)` triple preceding every payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub kind: MessageKind,
    pub seq: i32,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, kind: MessageKind, seq: i32) -> Self {
        Self { name: name.into(), kind, seq }
    }
}

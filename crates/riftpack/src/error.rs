//! # Error Definitions
//!
//! Every failure the protocol engine can report. All of these are fatal to the
//! message being encoded or decoded; none of them are retried.

use crate::types::TType;

/// Protocol engine errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Attempted to read past the bytes available in the buffer.
    Underflow { needed: usize, available: usize },
    /// Byte does not correspond to a valid wire type.
    InvalidType(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A varint ran past its maximum encoded width.
    InvalidVarint,
    /// A length or element count was negative.
    NegativeSize(i64),
    /// A length or element count exceeded the configured limit.
    SizeLimit { size: usize, limit: usize },
    /// A value does not fit the width declared by its descriptor.
    Overflow { ty: TType, value: i64 },
    /// A value's variant does not match its descriptor.
    TypeMismatch { expected: TType, found: TType },
    /// A container's elements could not be read back to its declared count.
    MalformedContainer(Box<Error>),
    /// A required field was absent.
    MissingField { structure: &'static str, field: &'static str },
    /// A union did not carry exactly one field.
    InvalidUnion { structure: &'static str, count: usize },
    /// Field id 0 is reserved for the stop marker.
    InvalidFieldId(i16),
    /// Two fields in one struct descriptor share an id.
    DuplicateFieldId { structure: &'static str, id: i16 },
    /// Message header carried an unsupported protocol id or version.
    BadVersion(u32),
    /// Message kind byte is outside Call/Reply/Exception/Oneway.
    InvalidMessageKind(u8),
    /// Nesting exceeded `MAX_DEPTH`.
    DepthLimit,
    /// Closed a struct that was never opened.
    ScopeUnderflow,
}

impl Error {
    /// True if the root cause is an underflow, even when wrapped by a container.
    pub fn is_underflow(&self) -> bool {
        match self {
            Error::Underflow { .. } => true,
            Error::MalformedContainer(inner) => inner.is_underflow(),
            _ => false,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Underflow { needed, available } => {
                write!(f, "underflow: needed {} bytes, {} available", needed, available)
            }
            Error::InvalidType(b) => write!(f, "invalid type byte: {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Error::InvalidVarint => write!(f, "varint exceeds maximum width"),
            Error::NegativeSize(n) => write!(f, "negative size: {}", n),
            Error::SizeLimit { size, limit } => write!(f, "size {} exceeds limit {}", size, limit),
            Error::Overflow { ty, value } => write!(f, "overflow: {} does not fit {:?}", value, ty),
            Error::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {:?}, found {:?}", expected, found)
            }
            Error::MalformedContainer(inner) => write!(f, "malformed container: {}", inner),
            Error::MissingField { structure, field } => {
                write!(f, "missing required field '{}' in {}", field, structure)
            }
            Error::InvalidUnion { structure, count } => {
                write!(f, "union {} must set exactly one field, found {}", structure, count)
            }
            Error::InvalidFieldId(id) => write!(f, "invalid field id: {}", id),
            Error::DuplicateFieldId { structure, id } => {
                write!(f, "duplicate field id {} in {}", id, structure)
            }
            Error::BadVersion(v) => write!(f, "bad protocol version: {:#010x}", v),
            Error::InvalidMessageKind(k) => write!(f, "invalid message kind: {}", k),
            Error::DepthLimit => write!(f, "nesting depth limit exceeded"),
            Error::ScopeUnderflow => write!(f, "struct end without matching begin"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

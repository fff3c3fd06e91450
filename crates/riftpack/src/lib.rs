//! # Riftpack
//!
//! The protocol engine of the rift RPC core: encodes typed values into a byte buffer
//! and decodes them back, in either of two wire formats.
//!
//! ## Philosophy
//!
//! - **Self-Describing Enough**: every value on the wire carries (Binary) or implies
//!   (Compact) enough type information to be skipped by a reader that does not know it.
//! - **Closed Type Model**: `TType`, `TypeDescriptor` and `Value` are closed sums, matched
//!   exhaustively by encode, decode and skip.
//! - **Explicit State**: buffers carry cursors, protocols carry the compact field-delta
//!   stack. Nothing is global.
//!
//! ## Example
//!
//! ```
//! use riftpack::{codec, Buffer, CompactProtocol, FieldDescriptor, StructDescriptor, StructValue, TypeDescriptor};
//!
//! static USER: StructDescriptor = StructDescriptor::new("User", &[
//!     FieldDescriptor::required("id", 1, TypeDescriptor::I64),
//!     FieldDescriptor::optional("name", 2, TypeDescriptor::String),
//! ]);
//!
//! let user = StructValue::new().with(1, 7i64).with(2, "ada");
//! let mut proto = CompactProtocol::new();
//! let mut buf = Buffer::new();
//! codec::write_struct(&mut proto, &mut buf, &user, &USER).unwrap();
//!
//! let decoded = codec::read_struct(&mut proto, &mut buf, &USER).unwrap();
//! assert_eq!(decoded, user);
//! assert!(buf.is_empty());
//! ```

pub mod binary;
pub mod buffer;
pub mod codec;
pub mod compact;
pub mod error;
pub mod message;
pub mod protocol;
pub mod skip;
pub mod types;
pub mod value;

pub use binary::BinaryProtocol;
pub use buffer::Buffer;
pub use buffer::Mark;
pub use compact::CompactProtocol;
pub use error::Error;
pub use error::Result;
pub use message::MessageHeader;
pub use message::MessageKind;
pub use protocol::Protocol;
pub use protocol::ProtocolKind;
pub use protocol::ProtocolLimits;
pub use skip::skip;
pub use skip::MAX_DEPTH;
pub use types::FieldDescriptor;
pub use types::FieldHeader;
pub use types::ListHeader;
pub use types::MapHeader;
pub use types::Requiredness;
pub use types::StructDescriptor;
pub use types::StructKind;
pub use types::TType;
pub use types::TypeDescriptor;
pub use value::StructValue;
pub use value::Value;

#[cfg(test)]
mod tests;

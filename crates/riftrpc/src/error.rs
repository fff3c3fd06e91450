//! Error types for the rpc layer.
//!
//! Transport errors are fatal to the connection that produced them. Protocol errors
//! are fatal to the message being read or written, the connection stays usable.

use std::fmt;
use std::io;

use riftpack::MessageKind;

use crate::connection::CallState;
use crate::envelope::ApplicationException;

/// Errors that occur while moving bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport is closed, or was never opened.
    NotOpen,
    /// The peer closed the channel before a complete message arrived.
    Eof,
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// A read did not complete within the channel's read timeout.
    TimedOut,
    /// Whole-message reads need a frame length; streaming transports can't provide one.
    FramingUnsupported,
    /// Any other I/O failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOpen => write!(f, "Transport is not open"),
            Self::Eof => write!(f, "Unexpected end of stream"),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::TimedOut => write!(f, "Read timed out"),
            Self::FramingUnsupported => write!(f, "Transport is not framed"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::Eof,
            // Unix reports an elapsed socket timeout as WouldBlock.
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::NotConnected => Self::NotOpen,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Errors in the content of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The message could not be encoded or decoded.
    Codec(riftpack::Error),
    /// A frame length exceeded the configured maximum.
    FrameTooLarge { size: usize, max: usize },
    /// A reply arrived for a call other than the one awaited.
    SequenceMismatch { expected: i32, received: i32 },
    /// The reply carries the awaited sequence id but names another method.
    WrongMethodName { expected: String, received: String },
    /// A request arrived where a reply was expected, or the reverse.
    UnexpectedMessage(MessageKind),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::FrameTooLarge { size, max } => {
                write!(f, "Frame of {} bytes exceeds maximum of {}", size, max)
            }
            Self::SequenceMismatch { expected, received } => {
                write!(f, "Sequence mismatch: expected {}, received {}", expected, received)
            }
            Self::WrongMethodName { expected, received } => {
                write!(f, "Wrong method name: expected {}, received {}", expected, received)
            }
            Self::UnexpectedMessage(kind) => write!(f, "Unexpected {:?} message", kind),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Transport(TransportError),
    Protocol(ProtocolError),
    /// The peer answered with an exception.
    Application(ApplicationException),
    /// No reply for `seq` arrived before the deadline.
    TimedOut { seq: i32 },
    /// The connection was closed or cancelled while a call was outstanding.
    ConnectionClosed,
    /// A call handle was used after it left the `Sent` state.
    NotPending { seq: i32, state: CallState },
    Config(String),
}

impl Error {
    /// True when decoding ran out of bytes; more input may complete the message.
    pub fn is_underflow(&self) -> bool {
        matches!(self, Self::Protocol(ProtocolError::Codec(e)) if e.is_underflow())
    }

    /// True when the error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Protocol(e) => write!(f, "Protocol error: {}", e),
            Self::Application(e) => write!(f, "Application exception: {}", e),
            Self::TimedOut { seq } => write!(f, "Call {} timed out", seq),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::NotPending { seq, state } => write!(f, "Call {} is not pending ({:?})", seq, state),
            Self::Config(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Application(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<riftpack::Error> for Error {
    fn from(e: riftpack::Error) -> Self {
        Self::Protocol(ProtocolError::Codec(e))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Transport(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

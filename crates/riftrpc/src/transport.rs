//! # Transport
//!
//! Stages outgoing bytes, frames them, and collects incoming bytes from a [`Channel`].
//!
//! ## Format
//!
//! Framed: `[Len: u32 BE][Body: Len]`, one message per frame.
//! Unframed: message bytes back to back, delimited only by the protocol itself.
//!
//! ## Invariants
//! - A frame length above `max_frame_size` is rejected before any of its body is read.
//! - A read that times out keeps whatever part of the frame already arrived, so the
//!   next `read_message` resumes where it stopped.

use std::fmt;
use std::io;
use std::time::Duration;

use riftpack::Buffer;
use tracing::debug;
use tracing::trace;

use crate::channel::Channel;
use crate::channel::Closer;
use crate::error::Error;
use crate::error::ProtocolError;
use crate::error::Result;
use crate::error::TransportError;

const PREFIX_LEN: usize = 4;
const CHUNK_LEN: usize = 8 * 1024;

/// 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// How messages are delimited on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Framing {
    /// Each message is preceded by its 4-byte big-endian length.
    #[default]
    Framed,
    /// Messages are written back to back.
    Unframed,
}

impl Framing {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "framed" => Some(Framing::Framed),
            "unframed" | "buffered" => Some(Framing::Unframed),
            _ => None,
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Framed => write!(f, "framed"),
            Framing::Unframed => write!(f, "unframed"),
        }
    }
}

/// Progress of the frame being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Collecting the length prefix.
    Header { filled: usize },
    /// Collecting `len` body bytes into the read buffer.
    Body { len: usize },
    /// A whole frame sits in the read buffer.
    Ready,
}

pub struct Transport {
    channel: Box<dyn Channel>,
    framing: Framing,
    max_frame_size: usize,
    write_buf: Buffer,
    read_buf: Buffer,
    prefix: [u8; PREFIX_LEN],
    state: FrameState,
    chunk: Vec<u8>,
}

impl Transport {
    pub fn new(channel: Box<dyn Channel>, framing: Framing) -> Self {
        Self {
            channel,
            framing,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
            write_buf: Buffer::new(),
            read_buf: Buffer::new(),
            prefix: [0; PREFIX_LEN],
            state: FrameState::Header { filled: 0 },
            chunk: vec![0; CHUNK_LEN],
        }
    }

    pub fn framed(channel: impl Channel + 'static) -> Self {
        Self::new(Box::new(channel), Framing::Framed)
    }

    pub fn unframed(channel: impl Channel + 'static) -> Self {
        Self::new(Box::new(channel), Framing::Unframed)
    }

    pub fn with_max_frame_size(mut self, max: u32) -> Self {
        self.max_frame_size = max as usize;
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn open(&mut self) -> Result<()> {
        self.channel.open()?;
        debug!(framing = %self.framing, "transport opened");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Closes the channel and discards any staged or partially read bytes.
    pub fn close(&mut self) -> Result<()> {
        self.write_buf.reset();
        self.read_buf.reset();
        self.state = FrameState::Header { filled: 0 };
        self.channel.close()?;
        debug!("transport closed");
        Ok(())
    }

    pub fn closer(&self) -> Option<Closer> {
        self.channel.closer()
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.channel.set_read_timeout(timeout)?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.channel.is_open() {
            Ok(())
        } else {
            Err(TransportError::NotOpen.into())
        }
    }

    /// Stages bytes for the next flush.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.write_buf.write(bytes);
        Ok(())
    }

    /// The staging buffer, for protocols to encode into directly.
    pub fn write_buffer(&mut self) -> &mut Buffer {
        &mut self.write_buf
    }

    /// Sends every staged byte.
    ///
    /// Framed, the bytes go out as one frame; an empty flush sends nothing. The staging
    /// buffer is cleared whether or not the write succeeds.
    pub fn flush(&mut self) -> Result<()> {
        let result = self.flush_staged();
        self.write_buf.reset();
        result
    }

    fn flush_staged(&mut self) -> Result<()> {
        self.ensure_open()?;
        let len = self.write_buf.remaining();
        if len == 0 {
            return Ok(());
        }

        if self.framing == Framing::Framed {
            if len > self.max_frame_size {
                return Err(ProtocolError::FrameTooLarge { size: len, max: self.max_frame_size }.into());
            }
            let prefix = (len as u32).to_be_bytes();
            self.channel.write_all(&prefix)?;
        }
        self.channel.write_all(self.write_buf.as_slice())?;
        self.channel.flush()?;
        trace!(len, framing = %self.framing, "flushed");
        Ok(())
    }

    /// One blocking read from the channel into `chunk`, retrying on interrupt.
    fn read_chunk(&mut self, want: usize) -> Result<usize> {
        let want = want.min(self.chunk.len());
        loop {
            match self.channel.read(&mut self.chunk[..want]) {
                Ok(0) => return Err(TransportError::Eof.into()),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Blocks until a whole frame has arrived and returns it, positioned at the body.
    ///
    /// # Errors
    /// - `ProtocolError::FrameTooLarge` when the prefix exceeds the maximum.
    /// - `TransportError::Eof` when the channel ends before or inside a frame.
    /// - `TransportError::TimedOut` when the read timeout elapses; call again to resume.
    /// - `TransportError::FramingUnsupported` on an unframed transport.
    pub fn read_message(&mut self) -> Result<&mut Buffer> {
        if self.framing == Framing::Unframed {
            return Err(TransportError::FramingUnsupported.into());
        }
        self.ensure_open()?;

        if self.state == FrameState::Ready {
            self.read_buf.reset();
            self.state = FrameState::Header { filled: 0 };
        }

        loop {
            match self.state {
                FrameState::Header { filled } if filled == PREFIX_LEN => {
                    let len = u32::from_be_bytes(self.prefix) as usize;
                    if len > self.max_frame_size {
                        self.state = FrameState::Header { filled: 0 };
                        return Err(ProtocolError::FrameTooLarge { size: len, max: self.max_frame_size }.into());
                    }
                    self.read_buf.reset();
                    self.state = FrameState::Body { len };
                }
                FrameState::Header { filled } => {
                    let n = self.read_into_prefix(filled)?;
                    self.state = FrameState::Header { filled: filled + n };
                }
                FrameState::Body { len } if self.read_buf.write_offset() == len => {
                    trace!(len, "frame received");
                    self.state = FrameState::Ready;
                    return Ok(&mut self.read_buf);
                }
                FrameState::Body { len } => {
                    let missing = len - self.read_buf.write_offset();
                    let n = self.read_body_chunk(missing)?;
                    self.read_buf.write(&self.chunk[..n]);
                }
                FrameState::Ready => unreachable!("ready frames are released above"),
            }
        }
    }

    fn read_into_prefix(&mut self, filled: usize) -> Result<usize> {
        let n = self.read_chunk(PREFIX_LEN - filled).map_err(|e| self.abandon_frame(e))?;
        self.prefix[filled..filled + n].copy_from_slice(&self.chunk[..n]);
        Ok(n)
    }

    fn read_body_chunk(&mut self, missing: usize) -> Result<usize> {
        self.read_chunk(missing).map_err(|e| self.abandon_frame(e))
    }

    /// Anything other than a timeout loses the frame for good.
    fn abandon_frame(&mut self, e: Error) -> Error {
        if e != Error::Transport(TransportError::TimedOut) {
            self.state = FrameState::Header { filled: 0 };
            self.read_buf.reset();
        }
        e
    }

    /// Appends whatever bytes the channel has next to the read buffer.
    ///
    /// Streaming readers call this when a decode underflows, then retry the decode.
    ///
    /// # Errors
    /// `ProtocolError::FrameTooLarge` once more than `max_frame_size` unread bytes are
    /// buffered; the partial message is dropped.
    pub fn fill(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let n = self.read_chunk(CHUNK_LEN)?;
        self.read_buf.write(&self.chunk[..n]);

        let buffered = self.read_buf.remaining();
        if buffered > self.max_frame_size {
            self.read_buf.reset();
            return Err(ProtocolError::FrameTooLarge { size: buffered, max: self.max_frame_size }.into());
        }
        trace!(n, buffered, "filled");
        Ok(n)
    }

    /// The read buffer. Framed, this holds the last frame returned by `read_message`.
    pub fn read_buffer(&mut self) -> &mut Buffer {
        &mut self.read_buf
    }

    /// Drops bytes already consumed from the read buffer. Invalidates outstanding marks.
    pub fn release_consumed(&mut self) {
        if self.framing == Framing::Unframed {
            self.read_buf.compact();
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("framing", &self.framing)
            .field("max_frame_size", &self.max_frame_size)
            .field("open", &self.channel.is_open())
            .field("staged", &self.write_buf.remaining())
            .field("buffered", &self.read_buf.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    #[test]
    fn framed_flush_writes_prefix() -> Result<()> {
        let (a, mut b) = MemoryChannel::pair();
        let mut transport = Transport::framed(a);
        transport.write(b"hello")?;
        transport.flush()?;

        let mut raw = [0u8; 16];
        let n = b.read(&mut raw)?;
        assert_eq!(&raw[..n], &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);
        Ok(())
    }

    #[test]
    fn empty_flush_sends_nothing() -> Result<()> {
        let (a, mut b) = MemoryChannel::pair();
        let mut transport = Transport::framed(a);
        transport.flush()?;

        b.set_read_timeout(Some(Duration::from_millis(10)))?;
        assert!(b.read(&mut [0u8; 4]).is_err());
        Ok(())
    }

    #[test]
    fn frames_roundtrip() -> Result<()> {
        let (a, b) = MemoryChannel::pair();
        let mut tx = Transport::framed(a);
        let mut rx = Transport::framed(b);

        tx.write(b"one")?;
        tx.flush()?;
        tx.write(b"")?;
        tx.write(b"two!")?;
        tx.flush()?;

        assert_eq!(rx.read_message()?.as_slice(), b"one");
        assert_eq!(rx.read_message()?.as_slice(), b"two!");
        Ok(())
    }

    #[test]
    fn oversized_write_is_rejected_and_discarded() -> Result<()> {
        let (a, b) = MemoryChannel::pair();
        let mut tx = Transport::framed(a).with_max_frame_size(4);
        let mut rx = Transport::framed(b);

        tx.write(b"too long")?;
        let err = tx.flush().unwrap_err();
        assert_eq!(err, Error::Protocol(ProtocolError::FrameTooLarge { size: 8, max: 4 }));

        tx.write(b"ok")?;
        tx.flush()?;
        assert_eq!(rx.read_message()?.as_slice(), b"ok");
        Ok(())
    }

    #[test]
    fn unframed_rejects_read_message() {
        let (a, _b) = MemoryChannel::pair();
        let mut transport = Transport::unframed(a);
        assert_eq!(
            transport.read_message().unwrap_err(),
            Error::Transport(TransportError::FramingUnsupported)
        );
    }

    #[test]
    fn write_after_close_is_not_open() -> Result<()> {
        let (a, _b) = MemoryChannel::pair();
        let mut transport = Transport::framed(a);
        transport.close()?;
        assert!(!transport.is_open());
        assert_eq!(transport.write(b"x").unwrap_err(), Error::Transport(TransportError::NotOpen));
        Ok(())
    }

    #[test]
    fn fill_appends_and_reports_eof() -> Result<()> {
        let (mut a, b) = MemoryChannel::pair();
        let mut rx = Transport::unframed(b);
        a.write_all(b"abc")?;
        a.close()?;

        assert_eq!(rx.fill()?, 3);
        assert_eq!(rx.read_buffer().as_slice(), b"abc");
        assert_eq!(rx.fill().unwrap_err(), Error::Transport(TransportError::Eof));
        Ok(())
    }

    #[test]
    fn fill_caps_unread_bytes() -> Result<()> {
        let (mut a, b) = MemoryChannel::pair();
        let mut rx = Transport::unframed(b).with_max_frame_size(8);
        a.write_all(b"12345678")?;
        assert_eq!(rx.fill()?, 8);

        a.write_all(b"9")?;
        let err = rx.fill().unwrap_err();
        assert_eq!(err, Error::Protocol(ProtocolError::FrameTooLarge { size: 9, max: 8 }));
        assert!(rx.read_buffer().is_empty());
        Ok(())
    }

    #[test]
    fn framing_parse() {
        assert_eq!(Framing::parse("FRAMED"), Some(Framing::Framed));
        assert_eq!(Framing::parse(" unframed "), Some(Framing::Unframed));
        assert_eq!(Framing::parse("http"), None);
    }
}

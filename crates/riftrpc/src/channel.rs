//! # Channels
//!
//! A minimal, blocking interface for moving bytes between peers.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: a channel knows nothing about frames, messages or protocols.
//!   It moves opaque bytes, and framing is layered on top by [`Transport`](crate::Transport).
//! - **Cooperative Cancellation**: a blocked read can only be interrupted by closing the
//!   channel from elsewhere, which is what a [`Closer`] is for.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;

/// A bidirectional byte stream.
///
/// This trait is object-safe (`Box<dyn Channel>`).
///
/// # Invariants
/// - `read` returns `Ok(0)` only at end of stream.
/// - `write_all` either writes every byte or fails.
/// - An elapsed read timeout surfaces as `WouldBlock` or `TimedOut`, without consuming.
pub trait Channel: Send {
    fn open(&mut self) -> io::Result<()>;
    fn is_open(&self) -> bool;
    fn close(&mut self) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    /// `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    /// A handle that closes this channel from another thread, if the channel supports it.
    fn closer(&self) -> Option<Closer>;
}

/// Closes a channel from outside the thread that owns it, waking any blocked read.
#[derive(Clone)]
pub struct Closer {
    inner: CloserInner,
}

#[derive(Clone)]
enum CloserInner {
    Tcp(Arc<TcpStream>),
    Memory(Arc<Pipe>, Arc<Pipe>),
}

impl Closer {
    pub fn close(&self) {
        match &self.inner {
            CloserInner::Tcp(stream) => {
                // Shutdown wakes a read blocked on the other handle of the same socket.
                let _ = stream.shutdown(Shutdown::Both);
            }
            CloserInner::Memory(incoming, outgoing) => {
                incoming.close();
                outgoing.close();
            }
        }
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            CloserInner::Tcp(_) => write!(f, "Closer(tcp)"),
            CloserInner::Memory(..) => write!(f, "Closer(memory)"),
        }
    }
}

// ============================================================================
//  TCP
// ============================================================================

/// A TCP socket with `TCP_NODELAY` set.
///
/// Built from an address it connects lazily on [`Channel::open`], and may be reopened
/// after a close.
#[derive(Debug)]
pub struct TcpChannel {
    addr: Option<SocketAddr>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    stream: Option<TcpStream>,
}

impl TcpChannel {
    /// A channel that connects to `addr` when opened.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr: Some(addr), connect_timeout: None, read_timeout: None, stream: None }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connects immediately, trying each resolved address in turn.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    pub fn connect_timeout(addr: &SocketAddr, timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(addr, timeout)?;
        let mut channel = Self::from_stream(stream)?;
        channel.connect_timeout = Some(timeout);
        Ok(channel)
    }

    /// Wraps an accepted or already connected stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let addr = stream.peer_addr().ok();
        Ok(Self { addr, connect_timeout: None, read_timeout: None, stream: Some(stream) })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Channel for TcpChannel {
    fn open(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = self.addr.ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address to connect to"))?;
        let stream = match self.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.read_timeout)?;
        debug!(%addr, "tcp channel connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                // Already shut down by the peer or a Closer.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
                Err(e) => return Err(e),
            }
            debug!(addr = ?self.addr, "tcp channel closed");
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(self.stream()?, bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self.stream()?)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout = timeout;
        match &self.stream {
            Some(stream) => stream.set_read_timeout(timeout),
            None => Ok(()),
        }
    }

    fn closer(&self) -> Option<Closer> {
        let stream = self.stream.as_ref()?.try_clone().ok()?;
        Some(Closer { inner: CloserInner::Tcp(Arc::new(stream)) })
    }
}

// ============================================================================
//  MEMORY
// ============================================================================

#[derive(Debug, Default)]
struct PipeState {
    data: VecDeque<u8>,
    closed: bool,
}

/// One direction of an in-memory channel.
#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn push(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory channel closed"));
        }
        state.data.extend(bytes);
        drop(state);
        self.ready.notify_all();
        Ok(())
    }

    fn pull(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            if !state.data.is_empty() {
                let n = buf.len().min(state.data.len());
                for (dst, src) in buf.iter_mut().zip(state.data.drain(..n)) {
                    *dst = src;
                }
                return Ok(n);
            }
            if state.closed || buf.is_empty() {
                return Ok(0);
            }
            state = match deadline {
                None => self.ready.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::from(io::ErrorKind::WouldBlock));
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// One end of an in-process duplex channel.
///
/// Bytes written on one end are read from the other. Closing either end closes both
/// directions and wakes every blocked reader, which then reads end of stream.
#[derive(Debug)]
pub struct MemoryChannel {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    read_timeout: Option<Duration>,
    /// Cleared by a local close only; a peer close shows up as end of stream.
    open: bool,
}

impl MemoryChannel {
    /// Creates a pair of channels connected to each other.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());

        let a = Self { incoming: b_to_a.clone(), outgoing: a_to_b.clone(), read_timeout: None, open: true };
        let b = Self { incoming: a_to_b, outgoing: b_to_a, read_timeout: None, open: true };

        (a, b)
    }
}

impl Channel for MemoryChannel {
    fn open(&mut self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "memory channel cannot be reopened"))
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        self.incoming.close();
        self.outgoing.close();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.incoming.pull(buf, self.read_timeout)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.outgoing.push(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn closer(&self) -> Option<Closer> {
        Some(Closer { inner: CloserInner::Memory(self.incoming.clone(), self.outgoing.clone()) })
    }
}

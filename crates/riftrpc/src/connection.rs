//! # Connection
//!
//! Pairs a [`Transport`] with a [`Protocol`] and correlates calls with their replies.
//!
//! ## Philosophy
//!
//! - **One Reader**: every operation takes `&mut self`, so one thread reads and writes
//!   at a time. Several calls may be outstanding; whichever `receive_reply` is running
//!   reads the stream and holds replies that belong to the others.
//! - **Cooperative Cancellation**: a [`Canceller`] closes the channel from another
//!   thread. The blocked read fails and the connection tears itself down.
//!
//! ## Invariants
//! - A pending record is removed exactly once: by its reply, by its timeout, or by
//!   teardown.
//! - A reply for a pending call reaches that call, whichever call was being awaited.
//! - Replies for no pending call are skipped whole, so the stream stays in sync.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use riftpack::codec;
use riftpack::skip;
use riftpack::Buffer;
use riftpack::MessageHeader;
use riftpack::MessageKind;
use riftpack::Protocol;
use riftpack::StructDescriptor;
use riftpack::StructValue;
use riftpack::TType;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::channel::Channel;
use crate::channel::Closer;
use crate::config::Config;
use crate::envelope;
use crate::envelope::ApplicationException;
use crate::envelope::ExceptionKind;
use crate::envelope::APPLICATION_EXCEPTION;
use crate::error::Error;
use crate::error::ProtocolError;
use crate::error::Result;
use crate::error::TransportError;
use crate::transport::Framing;
use crate::transport::Transport;

/// Where a call is in its life.
///
/// `Idle -> Sent -> {Completed | Failed | TimedOut}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Flushed, awaiting a reply.
    Sent,
    /// A Reply or Exception with the matching sequence id arrived.
    Completed,
    /// The connection failed while the call was outstanding.
    Failed,
    /// The deadline passed first. A late reply is rejected as a sequence mismatch.
    TimedOut,
}

/// A call that has been sent; pass it to [`Connection::receive_reply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    seq: i32,
    method: String,
    state: CallState,
}

impl CallHandle {
    pub fn seq(&self) -> i32 {
        self.seq
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn state(&self) -> CallState {
        self.state
    }
}

/// A request read by the serving side of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    pub method: String,
    /// `Call` or `Oneway`.
    pub kind: MessageKind,
    pub seq: i32,
    pub args: StructValue,
}

#[derive(Debug)]
struct PendingCall {
    method: String,
    sent_at: Instant,
    /// The whole reply message, when it was read while another call was awaited.
    early: Option<Vec<u8>>,
}

/// What `accept_with` made of the next request.
enum Accepted {
    Args(StructValue),
    UnknownMethod,
    BadArgs(riftpack::Error),
}

/// Removes every pending record, returning how many there were.
fn drain_pending(pending: &DashMap<i32, PendingCall>) -> usize {
    let keys: Vec<i32> = pending.iter().map(|e| *e.key()).collect();
    let mut dropped = 0;
    for key in keys {
        if let Some((seq, call)) = pending.remove(&key) {
            debug!(seq, method = %call.method, elapsed = ?call.sent_at.elapsed(), "pending call dropped");
            dropped += 1;
        }
    }
    dropped
}

/// Cancels a connection from another thread.
#[derive(Debug, Clone)]
pub struct Canceller {
    closer: Option<Closer>,
    pending: Arc<DashMap<i32, PendingCall>>,
}

impl Canceller {
    /// Closes the channel, waking a blocked read, and drops every pending call.
    pub fn cancel(&self) {
        if let Some(closer) = &self.closer {
            closer.close();
        }
        let dropped = drain_pending(&self.pending);
        warn!(dropped, "connection cancelled");
    }
}

/// A transport, a protocol, and the calls awaiting replies over them.
pub struct Connection {
    transport: Transport,
    protocol: Box<dyn Protocol>,
    next_seq: i32,
    pending: Arc<DashMap<i32, PendingCall>>,
    call_timeout: Option<Duration>,
}

impl Connection {
    /// Wraps an already opened transport.
    pub fn new(transport: Transport, protocol: Box<dyn Protocol>) -> Self {
        Self {
            transport,
            protocol,
            next_seq: 1,
            pending: Arc::new(DashMap::new()),
            call_timeout: None,
        }
    }

    /// Builds the transport and protocol `config` describes around `channel` and opens it.
    pub fn with_config(channel: Box<dyn Channel>, config: &Config) -> Result<Self> {
        config.validate()?;
        let mut transport = Transport::new(channel, config.framing).with_max_frame_size(config.max_frame_size);
        transport.open()?;
        let protocol = config.protocol.protocol(config.limits());
        debug!(protocol = %config.protocol, framing = %config.framing, "connection opened");
        Ok(Self::new(transport, protocol).with_call_timeout(config.call_timeout))
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// The sequence id the next call will carry.
    pub fn next_seq(&self) -> i32 {
        self.next_seq
    }

    /// Seeds the sequence generator. Ids wrap from `i32::MAX` to `i32::MIN`.
    pub fn set_next_seq(&mut self, seq: i32) {
        self.next_seq = seq;
    }

    pub fn canceller(&self) -> Canceller {
        Canceller { closer: self.transport.closer(), pending: self.pending.clone() }
    }

    /// Drops every pending call and closes the transport.
    pub fn close(&mut self) -> Result<()> {
        let dropped = drain_pending(&self.pending);
        if dropped > 0 {
            warn!(dropped, "closing with calls outstanding");
        }
        self.transport.close()?;
        debug!("connection closed");
        Ok(())
    }

    fn teardown(&mut self, reason: &Error) {
        let dropped = drain_pending(&self.pending);
        if let Err(e) = self.transport.close() {
            debug!(error = %e, "close during teardown failed");
        }
        warn!(%reason, dropped, "connection torn down");
    }

    /// Tears the connection down when `e` leaves the stream unusable.
    fn after_receive_error(&mut self, e: &Error) {
        let desync = match e {
            // The body of an oversized frame is still on the wire.
            Error::Protocol(ProtocolError::FrameTooLarge { .. }) => true,
            // Without frames there is no way to find the next message.
            Error::Protocol(ProtocolError::Codec(_)) => self.transport.framing() == Framing::Unframed,
            other => other.is_fatal(),
        };
        if desync {
            self.teardown(e);
        }
    }

    /// Encodes one message and flushes it.
    fn send(&mut self, header: &MessageHeader, payload: &StructValue, desc: &StructDescriptor) -> Result<()> {
        if !self.transport.is_open() {
            return Err(Error::ConnectionClosed);
        }
        envelope::write_message(self.protocol.as_mut(), self.transport.write_buffer(), header, payload, desc)?;
        if let Err(e) = self.transport.flush() {
            if e.is_fatal() {
                self.teardown(&e);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Sends a Call and records it as pending.
    pub fn send_call(&mut self, method: &str, args: &StructValue, desc: &StructDescriptor) -> Result<CallHandle> {
        let seq = self.next_seq;
        let mut handle = CallHandle { seq, method: method.to_string(), state: CallState::Idle };

        self.send(&MessageHeader::new(method, MessageKind::Call, seq), args, desc)?;
        self.next_seq = seq.wrapping_add(1);
        self.pending.insert(seq, PendingCall { method: method.to_string(), sent_at: Instant::now(), early: None });
        handle.state = CallState::Sent;

        debug!(seq, method, "call sent");
        Ok(handle)
    }

    /// Sends a Oneway. Nothing is recorded and the sequence id is not consumed.
    pub fn send_oneway(&mut self, method: &str, args: &StructValue, desc: &StructDescriptor) -> Result<i32> {
        let seq = self.next_seq;
        self.send(&MessageHeader::new(method, MessageKind::Oneway, seq), args, desc)?;
        debug!(seq, method, "oneway sent");
        Ok(seq)
    }

    /// Blocks for the reply to `handle`, until `deadline` if one is given.
    ///
    /// # Errors
    /// - `ProtocolError::SequenceMismatch` when a reply for no pending call arrives first.
    ///   That reply is discarded and `handle` stays `Sent`; call again to keep waiting.
    ///
    /// A reply for another pending call is held for that call and the wait goes on.
    /// - `Error::Application` when the peer answered with an exception (`Completed`).
    /// - `Error::TimedOut` when the deadline passes (`TimedOut`). The connection stays usable.
    /// - A transport error fails the whole connection (`Failed`).
    pub fn receive_reply(
        &mut self,
        handle: &mut CallHandle,
        result: &StructDescriptor,
        deadline: Option<Instant>,
    ) -> Result<StructValue> {
        if handle.state != CallState::Sent {
            return Err(Error::NotPending { seq: handle.seq, state: handle.state });
        }
        if !self.pending.contains_key(&handle.seq) {
            // Dropped by close or a Canceller.
            handle.state = CallState::Failed;
            return Err(Error::ConnectionClosed);
        }

        let seq = handle.seq;
        let outcome = self.read_reply(seq, &handle.method, result, deadline);
        match &outcome {
            Ok(_) | Err(Error::Application(_)) => {
                if let Some((_, call)) = self.pending.remove(&seq) {
                    debug!(seq, method = %call.method, elapsed = ?call.sent_at.elapsed(), "call completed");
                }
                handle.state = CallState::Completed;
            }
            Err(Error::Protocol(ProtocolError::SequenceMismatch { received, .. })) => {
                warn!(expected = seq, received, "discarded reply to another call");
            }
            Err(Error::Protocol(ProtocolError::UnexpectedMessage(kind))) => {
                warn!(seq, ?kind, "discarded request received while awaiting a reply");
            }
            Err(Error::TimedOut { .. }) => {
                self.pending.remove(&seq);
                handle.state = CallState::TimedOut;
                warn!(seq, method = %handle.method, "call timed out");
            }
            Err(e) => {
                self.pending.remove(&seq);
                handle.state = CallState::Failed;
                self.after_receive_error(e);
            }
        }
        outcome
    }

    /// Sends a Call and waits for its reply, bounded by the configured call timeout.
    ///
    /// Late replies to earlier, timed out calls are skipped.
    pub fn call(
        &mut self,
        method: &str,
        args: &StructValue,
        args_desc: &StructDescriptor,
        result_desc: &StructDescriptor,
    ) -> Result<StructValue> {
        let deadline = self.call_timeout.map(|t| Instant::now() + t);
        let mut handle = self.send_call(method, args, args_desc)?;
        loop {
            match self.receive_reply(&mut handle, result_desc, deadline) {
                Err(Error::Protocol(ProtocolError::SequenceMismatch { .. })) => continue,
                other => return other,
            }
        }
    }

    fn read_reply(
        &mut self,
        seq: i32,
        method: &str,
        result: &StructDescriptor,
        deadline: Option<Instant>,
    ) -> Result<StructValue> {
        let early = self.pending.get_mut(&seq).and_then(|mut call| call.early.take());
        if let Some(bytes) = early {
            trace!(seq, len = bytes.len(), "reply read earlier");
            let mut buf = Buffer::from_vec(bytes);
            let outcome = match envelope::read_header(self.protocol.as_mut(), &mut buf) {
                Ok(header) => decode_reply(self.protocol.as_mut(), &mut buf, header, method, result),
                Err(e) => Err(e.into()),
            };
            if outcome.is_err() {
                self.protocol.reset();
            }
            return outcome;
        }

        let pending = self.pending.clone();
        loop {
            let received = self.receive(deadline, seq, |proto, buf| {
                let start = buf.read_offset();
                let header = envelope::read_header(proto, buf)?;
                if !header.kind.is_request() && header.seq == seq {
                    return decode_reply(proto, buf, header, method, result).map(Some);
                }

                discard_payload(proto, buf)?;
                if header.kind.is_request() {
                    return Err(ProtocolError::UnexpectedMessage(header.kind).into());
                }
                match pending.get_mut(&header.seq) {
                    Some(mut call) => {
                        debug!(seq = header.seq, awaiting = seq, "reply held for its call");
                        call.early = Some(buf.written()[start..buf.read_offset()].to_vec());
                        Ok(None)
                    }
                    None => Err(ProtocolError::SequenceMismatch { expected: seq, received: header.seq }.into()),
                }
            })?;
            if let Some(value) = received {
                return Ok(value);
            }
        }
    }

    /// Reads one message and hands it to `decode`.
    ///
    /// Framed, the whole frame is read first. Unframed, `decode` runs against whatever is
    /// buffered and is retried from the same position each time more bytes arrive.
    fn receive<T>(
        &mut self,
        deadline: Option<Instant>,
        seq: i32,
        mut decode: impl FnMut(&mut dyn Protocol, &mut Buffer) -> Result<T>,
    ) -> Result<T> {
        match self.transport.framing() {
            Framing::Framed => {
                self.wait_for(deadline, seq, |t| t.read_message().map(|_| ()))?;
                let result = decode(self.protocol.as_mut(), self.transport.read_buffer());
                if result.is_err() {
                    self.protocol.reset();
                }
                result
            }
            Framing::Unframed => {
                self.transport.release_consumed();
                loop {
                    let buf = self.transport.read_buffer();
                    let mark = buf.mark();
                    match decode(self.protocol.as_mut(), buf) {
                        Err(e) if e.is_underflow() => {
                            self.transport.read_buffer().rewind(mark);
                            self.protocol.reset();
                            trace!(buffered = self.transport.read_buffer().remaining(), "partial message, reading more");
                            self.wait_for(deadline, seq, |t| t.fill().map(|_| ()))?;
                        }
                        Err(e) => {
                            self.protocol.reset();
                            return Err(e);
                        }
                        Ok(value) => return Ok(value),
                    }
                }
            }
        }
    }

    /// Runs a blocking transport read, translating the deadline into read timeouts.
    fn wait_for(
        &mut self,
        deadline: Option<Instant>,
        seq: i32,
        mut op: impl FnMut(&mut Transport) -> Result<()>,
    ) -> Result<()> {
        loop {
            let timeout = match deadline {
                None => None,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(Error::TimedOut { seq });
                    }
                    Some(left)
                }
            };
            self.transport.set_read_timeout(timeout)?;
            match op(&mut self.transport) {
                // Partial progress is kept; loop to re-check the deadline.
                Err(Error::Transport(TransportError::TimedOut)) => continue,
                other => return other,
            }
        }
    }

    // ========================================================================
    //  SERVING
    // ========================================================================

    /// Blocks for the next Call or Oneway and decodes its arguments with `args`.
    pub fn accept_call(&mut self, args: &StructDescriptor) -> Result<IncomingCall> {
        self.accept_with(|_| Some(args))
    }

    /// Blocks for the next Call or Oneway, choosing the argument descriptor by method.
    ///
    /// A Call to a method `lookup` does not know is answered with an `UnknownMethod`
    /// exception and the wait continues.
    pub fn accept_with<'d>(
        &mut self,
        lookup: impl Fn(&str) -> Option<&'d StructDescriptor>,
    ) -> Result<IncomingCall> {
        loop {
            let received = self.receive(None, 0, |proto, buf| {
                let header = envelope::read_header(proto, buf)?;
                if !header.kind.is_request() {
                    discard_payload(proto, buf)?;
                    return Err(ProtocolError::UnexpectedMessage(header.kind).into());
                }
                match lookup(header.name.as_str()) {
                    Some(desc) => match codec::read_struct(proto, buf, desc) {
                        Ok(args) => {
                            proto.read_message_end(buf)?;
                            Ok((header, Accepted::Args(args)))
                        }
                        Err(e) if e.is_underflow() => Err(e.into()),
                        Err(e) => Ok((header, Accepted::BadArgs(e))),
                    },
                    None => {
                        discard_payload(proto, buf)?;
                        Ok((header, Accepted::UnknownMethod))
                    }
                }
            });

            let (header, accepted) = match received {
                Ok(received) => received,
                Err(e) => {
                    self.after_receive_error(&e);
                    return Err(e);
                }
            };
            let call = IncomingCall { method: header.name, kind: header.kind, seq: header.seq, args: StructValue::new() };

            match accepted {
                Accepted::Args(args) => {
                    debug!(seq = call.seq, method = %call.method, kind = ?call.kind, "call accepted");
                    return Ok(IncomingCall { args, ..call });
                }
                Accepted::UnknownMethod => {
                    warn!(seq = call.seq, method = %call.method, "call to unknown method");
                    let ex = ApplicationException::new(ExceptionKind::UnknownMethod, format!("unknown method: {}", call.method));
                    self.reply_exception(&call, &ex)?;
                }
                Accepted::BadArgs(e) => {
                    warn!(seq = call.seq, method = %call.method, error = %e, "arguments did not decode");
                    let ex = ApplicationException::new(
                        ExceptionKind::ProtocolError,
                        format!("invalid arguments for {}: {}", call.method, e),
                    );
                    self.reply_exception(&call, &ex)?;
                    let e = Error::from(e);
                    self.after_receive_error(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Answers `call` with a Reply. Oneway calls get no reply.
    pub fn reply(&mut self, call: &IncomingCall, result: &StructValue, desc: &StructDescriptor) -> Result<()> {
        if call.kind == MessageKind::Oneway {
            trace!(seq = call.seq, method = %call.method, "no reply to a oneway call");
            return Ok(());
        }
        self.send(&MessageHeader::new(call.method.as_str(), MessageKind::Reply, call.seq), result, desc)?;
        debug!(seq = call.seq, method = %call.method, "reply sent");
        Ok(())
    }

    /// Answers `call` with an Exception. Oneway calls get no reply.
    pub fn reply_exception(&mut self, call: &IncomingCall, ex: &ApplicationException) -> Result<()> {
        if call.kind == MessageKind::Oneway {
            trace!(seq = call.seq, method = %call.method, "no exception to a oneway call");
            return Ok(());
        }
        let header = MessageHeader::new(call.method.as_str(), MessageKind::Exception, call.seq);
        self.send(&header, &ex.to_value(), &APPLICATION_EXCEPTION)?;
        debug!(seq = call.seq, method = %call.method, kind = ?ex.kind, "exception sent");
        Ok(())
    }
}

/// Decodes the body of a Reply or Exception whose sequence id matched.
fn decode_reply(
    proto: &mut dyn Protocol,
    buf: &mut Buffer,
    header: MessageHeader,
    method: &str,
    result: &StructDescriptor,
) -> Result<StructValue> {
    if header.name != method {
        discard_payload(proto, buf)?;
        return Err(ProtocolError::WrongMethodName { expected: method.to_string(), received: header.name }.into());
    }
    match header.kind {
        MessageKind::Reply => {
            let value = codec::read_struct(proto, buf, result)?;
            proto.read_message_end(buf)?;
            Ok(value)
        }
        MessageKind::Exception => {
            let ex = ApplicationException::read(proto, buf)?;
            proto.read_message_end(buf)?;
            Err(Error::Application(ex))
        }
        kind => {
            discard_payload(proto, buf)?;
            Err(ProtocolError::UnexpectedMessage(kind).into())
        }
    }
}

/// Skips the payload struct of a message nobody will decode.
fn discard_payload(proto: &mut dyn Protocol, buf: &mut Buffer) -> Result<()> {
    skip(proto, buf, TType::Struct)?;
    proto.read_message_end(buf)?;
    Ok(())
}

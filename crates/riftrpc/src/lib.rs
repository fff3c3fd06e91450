//! # Riftrpc
//!
//! Moves [`riftpack`] messages between peers: byte channels, framed and streaming
//! transports, message envelopes and call correlation.
//!
//! ## Philosophy
//!
//! - **Layered**: a [`Channel`] moves bytes, a [`Transport`] finds message boundaries,
//!   a [`Connection`] pairs calls with replies. Each layer knows nothing of the one above.
//! - **Blocking, Bounded**: every wait takes a deadline. A timed out call leaves the
//!   connection usable, only transport failures tear it down.
//!
//! ## Example
//!
//! ```
//! use riftrpc::{Config, Connection, MemoryChannel};
//! use riftpack::{FieldDescriptor, StructDescriptor, StructValue, TypeDescriptor};
//!
//! static ARGS: StructDescriptor = StructDescriptor::new("echo_args", &[
//!     FieldDescriptor::required("text", 1, TypeDescriptor::String),
//! ]);
//!
//! let (a, b) = MemoryChannel::pair();
//! let config = Config::default();
//! let mut client = Connection::with_config(Box::new(a), &config).unwrap();
//! let mut server = Connection::with_config(Box::new(b), &config).unwrap();
//!
//! let mut handle = client.send_call("echo", &StructValue::new().with(1, "hi"), &ARGS).unwrap();
//! let call = server.accept_call(&ARGS).unwrap();
//! server.reply(&call, &call.args, &ARGS).unwrap();
//!
//! let reply = client.receive_reply(&mut handle, &ARGS, None).unwrap();
//! assert_eq!(reply.get_str(1), Some("hi"));
//! ```

use std::net::SocketAddr;
use std::net::ToSocketAddrs;

use tracing::debug;
use tracing::info;

pub mod channel;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod transport;

pub use channel::Channel;
pub use channel::Closer;
pub use channel::MemoryChannel;
pub use channel::TcpChannel;
pub use config::Config;
pub use connection::CallHandle;
pub use connection::CallState;
pub use connection::Canceller;
pub use connection::Connection;
pub use connection::IncomingCall;
pub use envelope::ApplicationException;
pub use envelope::ExceptionKind;
pub use error::Error;
pub use error::ProtocolError;
pub use error::Result;
pub use error::TransportError;
pub use transport::Framing;
pub use transport::Transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Entry point for opening connections.
pub struct Rift;

impl Rift {
    pub fn version() -> &'static str {
        VERSION
    }

    /// Connects over TCP, trying each resolved address in turn.
    pub fn connect_tcp(addr: impl ToSocketAddrs, config: &Config) -> Result<Connection> {
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        let mut last_err = None;
        for addr in addrs {
            let connected = match config.connect_timeout {
                Some(timeout) => TcpChannel::connect_timeout(&addr, timeout),
                None => TcpChannel::connect(addr),
            };
            match connected {
                Ok(channel) => {
                    info!(%addr, "connected");
                    return Self::connection(channel, config);
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => e.into(),
            None => Error::Config("address resolved to nothing".into()),
        })
    }

    /// Wraps an existing channel.
    pub fn connection(channel: impl Channel + 'static, config: &Config) -> Result<Connection> {
        Connection::with_config(Box::new(channel), config)
    }
}

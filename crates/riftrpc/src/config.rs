//! Connection configuration.
//!
//! Built in code with the `with_*` methods, or read from the environment:
//!
//! - `RIFT_PROTOCOL`: `binary` (default) or `compact`
//! - `RIFT_FRAMING`: `framed` (default) or `unframed`
//! - `RIFT_MAX_FRAME_SIZE`: largest accepted frame in bytes (default 16 MiB)
//! - `RIFT_CALL_TIMEOUT_MS`: default call deadline, `0` for none (default 30000)
//! - `RIFT_STRICT_READ`: reject unversioned binary message headers (`1`/`true`)
//!
//! ```bash
//! export RIFT_PROTOCOL=compact
//! export RIFT_CALL_TIMEOUT_MS=500
//! ```

use std::env;
use std::time::Duration;

use riftpack::ProtocolKind;
use riftpack::ProtocolLimits;

use crate::error::Error;
use crate::error::Result;
use crate::transport::Framing;
use crate::transport::DEFAULT_MAX_FRAME_SIZE;

pub const ENV_PROTOCOL: &str = "RIFT_PROTOCOL";
pub const ENV_FRAMING: &str = "RIFT_FRAMING";
pub const ENV_MAX_FRAME_SIZE: &str = "RIFT_MAX_FRAME_SIZE";
pub const ENV_CALL_TIMEOUT_MS: &str = "RIFT_CALL_TIMEOUT_MS";
pub const ENV_STRICT_READ: &str = "RIFT_STRICT_READ";

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub protocol: ProtocolKind,
    pub framing: Framing,
    /// Largest frame accepted or sent, in bytes.
    pub max_frame_size: u32,
    /// Longest string or binary accepted on read. `None` is unbounded.
    pub string_limit: Option<usize>,
    /// Largest declared container count accepted on read. `None` is unbounded.
    pub container_limit: Option<usize>,
    pub strict_read: bool,
    pub strict_write: bool,
    /// Deadline applied by `Connection::call`. `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::Binary,
            framing: Framing::Framed,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            string_limit: None,
            container_limit: None,
            strict_read: false,
            strict_write: true,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from the process environment on top of the defaults.
    ///
    /// # Errors
    /// `Error::Config` naming the variable when a value does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        if let Some(s) = var(ENV_PROTOCOL) {
            config.protocol = ProtocolKind::parse(&s).ok_or_else(|| invalid(ENV_PROTOCOL, &s))?;
        }
        if let Some(s) = var(ENV_FRAMING) {
            config.framing = Framing::parse(&s).ok_or_else(|| invalid(ENV_FRAMING, &s))?;
        }
        if let Some(s) = var(ENV_MAX_FRAME_SIZE) {
            config.max_frame_size = s.parse().map_err(|_| invalid(ENV_MAX_FRAME_SIZE, &s))?;
        }
        if let Some(s) = var(ENV_CALL_TIMEOUT_MS) {
            let ms: u64 = s.parse().map_err(|_| invalid(ENV_CALL_TIMEOUT_MS, &s))?;
            config.call_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(s) = var(ENV_STRICT_READ) {
            config.strict_read = parse_flag(&s).ok_or_else(|| invalid(ENV_STRICT_READ, &s))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(Error::Config("max_frame_size must be greater than zero".into()));
        }
        if self.call_timeout == Some(Duration::ZERO) {
            return Err(Error::Config("call_timeout must be non-zero, use None to wait forever".into()));
        }
        Ok(())
    }

    /// The codec limits this configuration implies.
    pub fn limits(&self) -> ProtocolLimits {
        ProtocolLimits {
            string_limit: self.string_limit,
            container_limit: self.container_limit,
            strict_read: self.strict_read,
            strict_write: self.strict_write,
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_max_frame_size(mut self, max: u32) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn with_string_limit(mut self, limit: Option<usize>) -> Self {
        self.string_limit = limit;
        self
    }

    pub fn with_container_limit(mut self, limit: Option<usize>) -> Self {
        self.container_limit = limit;
        self
    }

    pub fn with_strict_read(mut self, strict: bool) -> Self {
        self.strict_read = strict;
        self
    }

    pub fn with_strict_write(mut self, strict: bool) -> Self {
        self.strict_write = strict;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::Config(format!("{}: invalid value {:?}", key, value))
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

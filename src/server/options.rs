//! Server options and file/environment settings.
//!
//! [`Options`] is what the server reads. Plain values can come from
//! [`Settings`], which is loaded with figment in this order (later wins):
//!
//! 1. built-in defaults
//! 2. `spritz.toml` in the working directory, if present
//! 3. `SPRITZ_*` environment variables (`SPRITZ_WRITE_TIMEOUT_MS=5000`)
//!
//! Callbacks and TLS cannot be expressed in a file; set them in code on the
//! `Options` produced from the settings.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Connection lifecycle events reported to [`Options::conn_state`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConnState {
    /// Accepted, nothing read yet.
    New,
    /// A request on the connection started dispatching.
    Active,
    /// The connection is done.
    Closed,
}

pub type ConnStateHook = Arc<dyn Fn(SocketAddr, ConnState) + Send + Sync>;
pub type ShutdownHook = Arc<dyn Fn() + Send + Sync>;

/// Everything [`Server`](crate::Server) can be configured with.
#[derive(Clone)]
pub struct Options {
    /// Maximum time to receive a request head. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Maximum time, from the request being read, to write the whole
    /// response. On expiry the connection is closed, mid-body if need be.
    /// `None` waits forever.
    pub write_timeout: Option<Duration>,
    /// HTTP/1 read buffer size, which bounds the request head. Zero keeps
    /// hyper's default; smaller non-zero values are raised to hyper's 8 KiB
    /// minimum.
    pub max_header_bytes: usize,
    /// Serve TLS with this configuration.
    #[cfg(feature = "tls")]
    pub tls: Option<Arc<tokio_rustls::rustls::ServerConfig>>,
    /// Called on every connection state change.
    pub conn_state: Option<ConnStateHook>,
    /// How long in-flight connections may keep running after a stop.
    /// Zero waits for all of them.
    pub graceful_timeout: Duration,
    /// Maximum concurrently served connections. Zero means unlimited.
    pub listen_limit: usize,
    /// Called once, when shutdown begins.
    pub shutdown_initiated: Option<ShutdownHook>,
    /// When false, SIGINT and SIGTERM stop the server.
    pub no_signal_handling: bool,
}

impl Default for Options {
    fn default() -> Self {
        Settings::default().into()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Options");
        s.field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("max_header_bytes", &self.max_header_bytes);
        #[cfg(feature = "tls")]
        s.field("tls", &self.tls.is_some());
        s.field("conn_state", &self.conn_state.is_some())
            .field("graceful_timeout", &self.graceful_timeout)
            .field("listen_limit", &self.listen_limit)
            .field("shutdown_initiated", &self.shutdown_initiated.is_some())
            .field("no_signal_handling", &self.no_signal_handling)
            .finish()
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// The serialisable subset of [`Options`]. Durations are in milliseconds.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct Settings {
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub max_header_bytes: usize,
    pub graceful_timeout_ms: u64,
    pub listen_limit: usize,
    pub no_signal_handling: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            read_timeout_ms: None,
            write_timeout_ms: None,
            max_header_bytes: 0,
            graceful_timeout_ms: 0,
            listen_limit: 0,
            no_signal_handling: true,
        }
    }
}

impl Settings {
    /// Defaults, then `spritz.toml`, then `SPRITZ_*` environment variables.
    pub fn load() -> Result<Self, Error> {
        Self::load_from("spritz.toml")
    }

    /// Like [`load`](Self::load) with an explicit file. A missing file is skipped.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SPRITZ_"))
    }
}

impl From<Settings> for Options {
    fn from(s: Settings) -> Self {
        Self {
            read_timeout: s.read_timeout_ms.map(Duration::from_millis),
            write_timeout: s.write_timeout_ms.map(Duration::from_millis),
            max_header_bytes: s.max_header_bytes,
            #[cfg(feature = "tls")]
            tls: None,
            conn_state: None,
            graceful_timeout: Duration::from_millis(s.graceful_timeout_ms),
            listen_limit: s.listen_limit,
            shutdown_initiated: None,
            no_signal_handling: s.no_signal_handling,
        }
    }
}

//! Unified error type.

use crate::response::Capability;

/// The error type returned by spritz's fallible operations.
///
/// Application-level outcomes (404, 400, etc.) are written to the
/// [`ResponseWriter`](crate::ResponseWriter), not returned as `Error`s. This
/// type surfaces wiring mistakes, missing response capabilities, and
/// infrastructure failures: binding a port, accepting a connection, reading a
/// request body.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("http: {0}")]
    Http(#[from] hyper::Error),

    /// The wrapped response destination lacks an optional capability.
    #[error("response destination does not support {0}")]
    Unsupported(Capability),

    /// A route pattern was rejected at registration time.
    #[error("invalid route `{pattern}`: {source}")]
    Route {
        pattern: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("config: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The chain did not commit a response within the configured write timeout.
    #[error("response was not committed before the write timeout")]
    WriteTimeout,
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Config(Box::new(e))
    }
}

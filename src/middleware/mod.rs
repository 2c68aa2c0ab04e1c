//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns such as tracing or panic recovery.
//!
//! Every middleware registered on a [`Dispatcher`](crate::Dispatcher) is
//! wrapped in a [`Scoped`] so it only activates under its path prefix.
//!
//! Built-in middleware:
//! - [`trace`]: per-request span with method, path, status, size, latency
//! - [`recover`]: turns a panic further down the chain into a `500`

mod recover;
mod scope;
mod trace;

pub use recover::{Recover, recover};
pub(crate) use recover::panic_message;
pub use scope::Scoped;
pub use trace::{Trace, trace};

//! # spritz
//!
//! Composable middleware chains with context propagation, served by hyper.
//!
//! ## The model
//!
//! An application is a [`Dispatcher`]: an ordered list of interceptors in
//! front of a [`Router`]. Every request walks the same linked [`Chain`]:
//!
//! - each interceptor runs its front half, may derive a new [`Context`]
//!   with extra values, calls [`Next::run`] (or doesn't, to short-circuit),
//!   then runs its back half
//! - the router picks the terminal handler, or answers 404
//! - the [`ResponseWriter`] records status, size and whether the head went
//!   out, so back halves can see what happened
//!
//! Cancelling the dispatcher's root context stops a running server
//! gracefully and cancels every request context derived from it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::io::Write;
//!
//! use spritz::{Dispatcher, Options, Params, context_handler_fn, middleware, middleware_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), spritz::Error> {
//!     let app = Dispatcher::new()
//!         .middleware("/", middleware::trace())
//!         .middleware("/api", middleware_fn(|cx, w, req, next| {
//!             w.headers_mut().insert("x-api", "1".parse().unwrap());
//!             next.run(cx, w, req);
//!         }))
//!         .get("/api/users/{id}", context_handler_fn(|cx, w, _req| {
//!             let id = cx.value::<Params>().and_then(|p| p.get("id")).unwrap_or("unknown");
//!             let _ = write!(w, r#"{{"id":"{id}"}}"#);
//!         }));
//!
//!     app.serve("0.0.0.0:3000", Options::default()).await
//! }
//! ```
//!
//! The chain itself is synchronous: interceptors and handlers are plain
//! functions, run on tokio's blocking pool. Anything asynchronous they need
//! goes through [`tokio::runtime::Handle::current`].

mod chain;
mod context;
mod dispatcher;
mod error;
mod handler;
mod recorder;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use chain::{Chain, Next};
pub use context::{CancelHandle, Context};
pub use dispatcher::Dispatcher;
pub use error::Error;
pub use handler::{
    BoxedHandler, BoxedMiddleware, Handler, HandlerKind, Middleware, MiddlewareKind,
    context_handler_fn, handler_fn, middleware_fn,
};
pub use recorder::Recorder;
pub use request::Request;
pub use response::{BeforeHook, Capability, CloseNotify, Flush, Hijack, ResponseDestination, ResponseWriter};
pub use router::{Params, Router};
pub use server::{ConnState, ConnStateHook, Options, Server, Settings, ShutdownHandle, ShutdownHook};

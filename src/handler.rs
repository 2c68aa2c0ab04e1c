//! Handler and middleware traits, and the adapters that normalise the
//! accepted callable shapes into them.
//!
//! # The accepted shapes
//!
//! The dispatcher stores every interceptor as one canonical type,
//! [`BoxedMiddleware`] (`Arc<dyn Middleware>`), and every route handler as
//! [`BoxedHandler`]. What callers hand in is a closed set of shapes:
//!
//! ```text
//! HandlerKind::Func         fn(&mut ResponseWriter, &Request)            ← handler_fn
//! HandlerKind::ContextFunc  fn(Context, &mut ResponseWriter, &Request)   ← context_handler_fn
//! HandlerKind::Handler      impl Handler                                 ← HandlerKind::new
//!
//! MiddlewareKind::Func        fn(Context, &mut ResponseWriter,
//!                                Option<&Request>, Next)                 ← middleware_fn
//! MiddlewareKind::Middleware  impl Middleware                            ← MiddlewareKind::new
//! MiddlewareKind::Handler     any HandlerKind, run then continue         ← From<HandlerKind>
//! ```
//!
//! Anything outside the set is a type error, so a wiring mistake fails at
//! compile time rather than on the first request.
//!
//! At request time each link costs one `Arc` deref and one virtual call.

use std::sync::Arc;

use crate::chain::Next;
use crate::context::Context;
use crate::request::Request;
use crate::response::ResponseWriter;

// ── Traits ────────────────────────────────────────────────────────────────────

/// A terminal route handler.
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, cx: Context, w: &mut ResponseWriter<'_>, req: &Request);
}

/// One interceptor in the chain.
///
/// Front-half logic runs before `next.run(..)`, back-half logic after it
/// returns. Skipping `next` short-circuits everything registered later.
/// `req` is `None` for lifecycle invocations that run before any request
/// exists.
///
/// Pass the context you want downstream to see (usually one derived with
/// [`Context::with_value`]) to `next`. [`Next`] is consumed by `run`, so it
/// can be invoked at most once.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>, next: Next<'_>);
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

/// A type-erased interceptor shared across concurrent requests.
pub type BoxedMiddleware = Arc<dyn Middleware>;

// ── Shapes ────────────────────────────────────────────────────────────────────

type HandlerFn = Box<dyn Fn(&mut ResponseWriter<'_>, &Request) + Send + Sync>;
type ContextHandlerFn = Box<dyn Fn(Context, &mut ResponseWriter<'_>, &Request) + Send + Sync>;
type MiddlewareFn = Box<dyn Fn(Context, &mut ResponseWriter<'_>, Option<&Request>, Next<'_>) + Send + Sync>;

/// The handler shapes accepted by route registration.
pub enum HandlerKind {
    Func(HandlerFn),
    ContextFunc(ContextHandlerFn),
    Handler(BoxedHandler),
}

/// The middleware shapes accepted by [`Dispatcher::middleware`](crate::Dispatcher::middleware).
pub enum MiddlewareKind {
    Func(MiddlewareFn),
    Middleware(BoxedMiddleware),
    Handler(HandlerKind),
}

/// Wraps a plain `fn(&mut ResponseWriter, &Request)` closure.
pub fn handler_fn<F>(f: F) -> HandlerKind
where
    F: Fn(&mut ResponseWriter<'_>, &Request) + Send + Sync + 'static,
{
    HandlerKind::Func(Box::new(f))
}

/// Wraps a context-aware `fn(Context, &mut ResponseWriter, &Request)` closure.
pub fn context_handler_fn<F>(f: F) -> HandlerKind
where
    F: Fn(Context, &mut ResponseWriter<'_>, &Request) + Send + Sync + 'static,
{
    HandlerKind::ContextFunc(Box::new(f))
}

/// Wraps an interceptor closure.
pub fn middleware_fn<F>(f: F) -> MiddlewareKind
where
    F: Fn(Context, &mut ResponseWriter<'_>, Option<&Request>, Next<'_>) + Send + Sync + 'static,
{
    MiddlewareKind::Func(Box::new(f))
}

impl HandlerKind {
    pub fn new(handler: impl Handler) -> Self {
        Self::Handler(Arc::new(handler))
    }

    pub(crate) fn into_handler(self) -> BoxedHandler {
        match self {
            Self::Func(f)        => Arc::new(FnHandler(f)),
            Self::ContextFunc(f) => Arc::new(ContextFnHandler(f)),
            Self::Handler(h)     => h,
        }
    }
}

impl MiddlewareKind {
    pub fn new(middleware: impl Middleware) -> Self {
        Self::Middleware(Arc::new(middleware))
    }

    pub(crate) fn into_middleware(self) -> BoxedMiddleware {
        match self {
            Self::Func(f)       => Arc::new(FnMiddleware(f)),
            Self::Middleware(m) => m,
            Self::Handler(h)    => Arc::new(HandlerMiddleware(h.into_handler())),
        }
    }
}

impl From<HandlerKind> for MiddlewareKind {
    fn from(handler: HandlerKind) -> Self {
        Self::Handler(handler)
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

struct FnHandler(HandlerFn);

impl Handler for FnHandler {
    fn serve(&self, _cx: Context, w: &mut ResponseWriter<'_>, req: &Request) {
        (self.0)(w, req)
    }
}

struct ContextFnHandler(ContextHandlerFn);

impl Handler for ContextFnHandler {
    fn serve(&self, cx: Context, w: &mut ResponseWriter<'_>, req: &Request) {
        (self.0)(cx, w, req)
    }
}

struct FnMiddleware(MiddlewareFn);

impl Middleware for FnMiddleware {
    fn handle(&self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>, next: Next<'_>) {
        (self.0)(cx, w, req, next)
    }
}

/// A handler used as middleware: serves the request, then continues.
/// Without a request there is nothing to serve and it only continues.
struct HandlerMiddleware(BoxedHandler);

impl Middleware for HandlerMiddleware {
    fn handle(&self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>, next: Next<'_>) {
        if let Some(r) = req {
            self.0.serve(cx.clone(), w, r);
        }
        next.run(cx, w, req);
    }
}

//! The composition root.
//!
//! A [`Dispatcher`] owns three things: the ordered list of registered
//! interceptors, the [`Router`] that terminates every chain, and the root
//! [`Context`] every request context is derived from. Registration methods
//! consume and return `self`, so once the dispatcher is handed to a server it
//! can no longer change; the chain built from it is shared read-only by every
//! request.
//!
//! ```rust
//! use spritz::{Dispatcher, Recorder, handler_fn, middleware_fn};
//!
//! let app = Dispatcher::new()
//!     .middleware("/", middleware_fn(|cx, w, req, next| {
//!         let _ = w.write(b"start:");
//!         next.run(cx, w, req);
//!         let _ = w.write(b":end");
//!     }))
//!     .get("/", handler_fn(|w, _req| { let _ = w.write(b"hello"); }));
//!
//! let req: spritz::Request = http::Request::get("/").body(bytes::Bytes::new()).unwrap().into();
//! let mut rec = Recorder::new();
//! app.dispatch(&mut rec, Some(&req));
//! assert_eq!(rec.body_str(), "start:hello:end");
//! ```

use std::sync::Arc;

use http::Method;
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::chain::Chain;
use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedMiddleware, HandlerKind, MiddlewareKind};
use crate::middleware::Scoped;
use crate::request::Request;
use crate::response::{ResponseDestination, ResponseWriter};
use crate::router::Router;
use crate::server::{Options, Server};

/// Ordered middleware plus a terminal router, under one root context.
pub struct Dispatcher {
    cx: Context,
    router: Arc<Router>,
    middlewares: Vec<BoxedMiddleware>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            cx: Context::background(),
            router: Arc::new(Router::new()),
            middlewares: Vec::new(),
        }
    }

    /// Replaces the root context. Every request context derives from it, and
    /// cancelling it stops a running server gracefully.
    pub fn with_context(mut self, cx: Context) -> Self {
        self.cx = cx;
        self
    }

    /// Replaces the router, dropping any routes registered so far.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Arc::new(router);
        self
    }

    /// Appends an interceptor that activates under `pattern`.
    ///
    /// Interceptors run in registration order on the way in and in reverse
    /// on the way out. `""` and `"/"` match every request.
    pub fn middleware(mut self, pattern: &str, middleware: impl Into<MiddlewareKind>) -> Self {
        let inner = middleware.into().into_middleware();
        self.middlewares.push(Arc::new(Scoped::new(pattern, inner)));
        self
    }

    /// Registers a `GET` handler under `pattern`.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or conflicting pattern; see [`Router::on`].
    pub fn get(self, pattern: &str, handler: HandlerKind) -> Self {
        self.handle(Method::GET, pattern, handler)
    }

    /// Registers a `POST` handler under `pattern`.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or conflicting pattern; see [`Router::on`].
    pub fn post(self, pattern: &str, handler: HandlerKind) -> Self {
        self.handle(Method::POST, pattern, handler)
    }

    /// Registers a handler for an arbitrary method.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or conflicting pattern; see [`Router::on`].
    pub fn handle(self, method: Method, pattern: &str, handler: HandlerKind) -> Self {
        self.try_handle(method, pattern, handler)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Fallible form of [`Dispatcher::handle`].
    pub fn try_handle(mut self, method: Method, pattern: &str, handler: HandlerKind) -> Result<Self, Error> {
        Arc::make_mut(&mut self.router).add(method, pattern, handler)?;
        Ok(self)
    }

    /// The registered interceptors, in call order, each wrapped in its scope.
    pub fn middlewares(&self) -> &[BoxedMiddleware] {
        &self.middlewares
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Links the registered interceptors in front of the router.
    pub fn chain(&self) -> Chain {
        let mut links = self.middlewares.clone();
        links.push(Arc::clone(&self.router) as BoxedMiddleware);
        Chain::new(links)
    }

    /// Runs one request through a freshly built chain and commits the
    /// response. `req` is `None` for lifecycle invocations.
    ///
    /// Servers should build the chain once with [`chain`](Self::chain) and
    /// reuse it; this is the convenience form for embedding and tests.
    pub fn dispatch(&self, dest: &mut dyn ResponseDestination, req: Option<&Request>) {
        let chain = self.chain();
        let mut w = ResponseWriter::new(dest);
        chain.run(self.cx.child(), &mut w, req);
        w.finish();
    }

    /// Freezes the dispatcher into a [`Server`].
    pub fn into_server(self, options: Options) -> Server {
        Server::new(self, options)
    }

    /// Binds `addr` and serves until stopped. See [`Server::serve`].
    pub async fn serve(self, addr: impl ToSocketAddrs, options: Options) -> Result<(), Error> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, options).await
    }

    /// Serves on an already bound listener until stopped.
    pub async fn serve_listener(self, listener: TcpListener, options: Options) -> Result<(), Error> {
        self.into_server(options).serve(listener).await
    }

    pub(crate) fn into_parts(self) -> (Context, Chain) {
        let chain = self.chain();
        (self.cx, chain)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::handler::{context_handler_fn, handler_fn, middleware_fn};
    use crate::recorder::Recorder;

    fn get(path: &str) -> Request {
        http::Request::get(path).body(Bytes::new()).unwrap().into()
    }

    #[test]
    fn nested_interceptors_accumulate_lifo_trace() {
        let result = Arc::new(Mutex::new(String::new()));
        let push = |s: &'static str, result: &Arc<Mutex<String>>| result.lock().unwrap().push_str(s);

        let (r1, r2, r3) = (Arc::clone(&result), Arc::clone(&result), Arc::clone(&result));
        let app = Dispatcher::new()
            .middleware("", middleware_fn(move |cx, w, req, next| {
                push("foo", &r1);
                next.run(cx, w, req);
                push("ban", &r1);
            }))
            .middleware("", middleware_fn(move |cx, w, req, next| {
                push("bar", &r2);
                next.run(cx, w, req);
                push("baz", &r2);
            }))
            .middleware("", middleware_fn(move |_cx, w, _req, _next| {
                push("bat", &r3);
                w.set_status(StatusCode::BAD_REQUEST);
            }));

        let mut rec = Recorder::new();
        app.dispatch(&mut rec, None);

        assert_eq!(*result.lock().unwrap(), "foobarbatbazban");
        assert_eq!(rec.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn middlewares_lists_registrations() {
        let app = Dispatcher::new();
        assert_eq!(app.middlewares().len(), 0);

        let app = app.middleware("", middleware_fn(|_cx, w, _req, _next| w.set_status(StatusCode::OK)));
        assert_eq!(app.middlewares().len(), 1);

        // the listed interceptor behaves like the registered one
        let chain = Chain::new(app.middlewares().to_vec());
        let mut rec = Recorder::new();
        let mut w = ResponseWriter::new(&mut rec);
        chain.run(Context::background(), &mut w, None);
        drop(w);
        assert_eq!(rec.heads_written(), 1);
    }

    #[test]
    fn context_values_reach_the_handler() {
        struct Key(&'static str);

        let app = Dispatcher::new()
            .middleware("/", middleware_fn(|cx, w, req, next| {
                next.run(cx.with_value(Key("value")), w, req);
            }))
            .get("/", context_handler_fn(|cx, w, _req| {
                let v = cx.value::<Key>().map_or("missing", |k| k.0);
                let _ = w.write(v.as_bytes());
            }));

        let mut rec = Recorder::new();
        app.dispatch(&mut rec, Some(&get("/")));
        assert_eq!(rec.body_str(), "value");
    }

    #[test]
    fn root_context_values_are_inherited() {
        struct Tenant(&'static str);

        let app = Dispatcher::new()
            .with_context(Context::background().with_value(Tenant("acme")))
            .get("/", context_handler_fn(|cx, w, _req| {
                let _ = w.write(cx.value::<Tenant>().map_or("", |t| t.0).as_bytes());
            }));

        let mut rec = Recorder::new();
        app.dispatch(&mut rec, Some(&get("/")));
        assert_eq!(rec.body_str(), "acme");
    }

    #[test]
    fn scoped_middleware_only_runs_under_prefix() {
        let app = Dispatcher::new()
            .middleware("/api", middleware_fn(|cx, w, req, next| {
                let _ = w.write(b"[api]");
                next.run(cx, w, req);
            }))
            .get("/api/users", handler_fn(|w, _req| { let _ = w.write(b"users"); }))
            .get("/apikey", handler_fn(|w, _req| { let _ = w.write(b"key"); }));

        let mut rec = Recorder::new();
        app.dispatch(&mut rec, Some(&get("/api/users")));
        assert_eq!(rec.body_str(), "[api]users");

        let mut rec = Recorder::new();
        app.dispatch(&mut rec, Some(&get("/apikey")));
        assert_eq!(rec.body_str(), "key");
    }

    #[test]
    fn unrouted_request_gets_404_after_middleware() {
        let app = Dispatcher::new().post("/submit", handler_fn(|w, _req| w.set_status(StatusCode::CREATED)));

        let mut rec = Recorder::new();
        app.dispatch(&mut rec, Some(&get("/submit")));
        assert_eq!(rec.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn empty_response_commits_default_status() {
        let app = Dispatcher::new().get("/", handler_fn(|_w, _req| {}));

        let mut rec = Recorder::new();
        app.dispatch(&mut rec, Some(&get("/")));
        assert_eq!(rec.heads_written(), 1);
        assert_eq!(rec.status(), StatusCode::OK);
    }

    #[test]
    fn try_handle_reports_conflicts() {
        let app = Dispatcher::new().get("/", handler_fn(|_w, _req| {}));
        assert!(app.try_handle(Method::GET, "/", handler_fn(|_w, _req| {})).is_err());
    }

    #[test]
    fn lifted_handler_as_middleware() {
        let app = Dispatcher::new()
            .middleware("/", handler_fn(|w, _req| { let _ = w.write(b"banner|"); }))
            .get("/", handler_fn(|w, _req| { let _ = w.write(b"body"); }));

        let mut rec = Recorder::new();
        app.dispatch(&mut rec, Some(&get("/")));
        assert_eq!(rec.body_str(), "banner|body");
    }
}

//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. The router is the last
//! interceptor of every chain: it picks the terminal handler, hands it a
//! context carrying the matched [`Params`], and then calls its own `next`,
//! which is always the sentinel.
//!
//! An unmatched request is answered with `404 page not found`; the router
//! never leaves a request without a response.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::chain::Next;
use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, HandlerKind, Middleware};
use crate::request::Request;
use crate::response::ResponseWriter;

/// The application router.
///
/// Build it once at startup. Each [`Router::on`] call returns `self` so
/// registrations chain naturally.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax and reach the handler as [`Params`]
    /// in its context:
    ///
    /// ```rust
    /// # use spritz::{Params, Router, context_handler_fn};
    /// # use http::Method;
    /// Router::new().on(Method::GET, "/users/{id}", context_handler_fn(|cx, w, _req| {
    ///     let id = cx.value::<Params>().and_then(|p| p.get("id")).unwrap_or("unknown");
    ///     let _ = w.write(id.as_bytes());
    /// }));
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid pattern or conflicts with an existing
    /// route. Use [`Router::add`] to get the error instead.
    pub fn on(mut self, method: Method, path: &str, handler: HandlerKind) -> Self {
        self.add(method, path, handler)
            .unwrap_or_else(|e| panic!("{e}"));
        self
    }

    /// Fallible form of [`Router::on`].
    pub fn add(&mut self, method: Method, path: &str, handler: HandlerKind) -> Result<(), Error> {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_handler())
            .map_err(|source| Error::Route { pattern: path.to_owned(), source })
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, Params)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, Params(params)))
    }

    /// Routes one request to its terminal handler, or answers 404.
    pub fn route(&self, cx: Context, w: &mut ResponseWriter<'_>, req: &Request) {
        match self.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                let cx = if params.is_empty() { cx } else { cx.with_value(params) };
                handler.serve(cx, w, req);
            }
            None => not_found(w, req),
        }
    }
}

impl Middleware for Router {
    fn handle(&self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>, next: Next<'_>) {
        if let Some(r) = req {
            self.route(cx.clone(), w, r);
        }
        next.run(cx, w, req);
    }
}

fn not_found(w: &mut ResponseWriter<'_>, req: &Request) {
    debug!(method = %req.method(), path = req.path(), "no route");
    w.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    w.set_status(StatusCode::NOT_FOUND);
    if let Err(e) = w.write(b"404 page not found\n") {
        debug!("failed to write 404 body: {e}");
    }
}

// ── Params ────────────────────────────────────────────────────────────────────

/// Path parameters captured by the matched route, in pattern order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `get("id")` on `/users/42` returns `Some("42")`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

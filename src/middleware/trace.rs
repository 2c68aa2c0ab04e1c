//! Per-request tracing span.

use std::time::Instant;

use tracing::{info, info_span};

use crate::chain::Next;
use crate::context::Context;
use crate::handler::{Middleware, MiddlewareKind};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Opens a `request` span around the rest of the chain and logs the outcome
/// once it unwinds.
///
/// Register it first so the span covers everything else:
///
/// ```rust
/// use spritz::{Dispatcher, middleware};
///
/// let app = Dispatcher::new().middleware("/", middleware::trace());
/// ```
pub fn trace() -> MiddlewareKind {
    MiddlewareKind::new(Trace)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn handle(&self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>, next: Next<'_>) {
        let Some(r) = req else {
            return next.run(cx, w, req);
        };

        let span = info_span!("request", method = %r.method(), path = r.path());
        let _entered = span.enter();
        let started = Instant::now();

        next.run(cx, w, req);

        info!(
            status = w.status().as_u16(),
            bytes = w.size(),
            latency_us = started.elapsed().as_micros() as u64,
            "request completed"
        );
    }
}

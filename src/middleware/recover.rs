//! Panic recovery.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use http::StatusCode;
use tracing::error;

use crate::chain::Next;
use crate::context::Context;
use crate::handler::{Middleware, MiddlewareKind};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Catches a panic anywhere further down the chain, logs it, and answers
/// `500 Internal Server Error` if nothing was committed yet.
///
/// Without it a panicking request still gets a `500` from the server, but
/// interceptors registered before the panic never run their back halves.
pub fn recover() -> MiddlewareKind {
    MiddlewareKind::new(Recover)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Recover;

impl Middleware for Recover {
    fn handle(&self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>, next: Next<'_>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| next.run(cx, &mut *w, req)));

        if let Err(payload) = outcome {
            let message = panic_message(&*payload);
            error!(path = req.map(Request::path), panic = message, "recovered from panic");

            if !w.written() {
                w.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }
}

/// The message a panic was raised with, when it has one.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::chain::Chain;
    use crate::handler::middleware_fn;
    use crate::recorder::Recorder;

    fn run(chain: &Chain) -> Recorder {
        let req: Request = http::Request::get("/boom").body(Bytes::new()).unwrap().into();
        let mut rec = Recorder::new();
        let mut w = ResponseWriter::new(&mut rec);
        chain.run(Context::background(), &mut w, Some(&req));
        drop(w);
        rec
    }

    #[test]
    fn panic_before_commit_becomes_500() {
        let chain = Chain::new(vec![
            recover().into_middleware(),
            middleware_fn(|_cx, _w, _req, _next| panic!("kaboom")).into_middleware(),
        ]);

        assert_eq!(run(&chain).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn panic_after_commit_keeps_committed_status() {
        let chain = Chain::new(vec![
            recover().into_middleware(),
            middleware_fn(|_cx, w, _req, _next| {
                let _ = w.write(b"partial");
                panic!("kaboom");
            })
            .into_middleware(),
        ]);

        let rec = run(&chain);
        assert_eq!(rec.status(), StatusCode::OK);
        assert_eq!(rec.body_str(), "partial");
    }
}

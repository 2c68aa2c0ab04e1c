//! Minimal spritz example: nested middleware, a context value, routing.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!
//! Ctrl-C stops the server gracefully.

use std::io::Write;

use http::StatusCode;
use spritz::{Dispatcher, Options, Params, Settings, context_handler_fn, handler_fn, middleware, middleware_fn};

/// Stamped by the greeting middleware, read by the root handler.
struct Greeting(&'static str);

#[tokio::main]
async fn main() -> Result<(), spritz::Error> {
    tracing_subscriber::fmt::init();

    let app = Dispatcher::new()
        .middleware("/", middleware::trace())
        .middleware("/", middleware::recover())
        // every response body is wrapped in start:...:end
        .middleware("/", middleware_fn(|cx, w, req, next| {
            let _ = w.write(b"start:");
            next.run(cx, w, req);
            let _ = w.write(b":end");
        }))
        .middleware("/", middleware_fn(|cx, w, req, next| {
            next.run(cx.with_value(Greeting("hello")), w, req);
        }))
        .get("/", context_handler_fn(|cx, w, _req| {
            let greeting = cx.value::<Greeting>().map_or("", |g| g.0);
            let _ = w.write(greeting.as_bytes());
        }))
        .get("/users/{id}", context_handler_fn(|cx, w, _req| {
            let id = cx.value::<Params>().and_then(|p| p.get("id")).unwrap_or("unknown");
            let _ = write!(w, r#"{{"id":"{id}","name":"alice"}}"#);
        }))
        .post("/users", handler_fn(|w, req| {
            if req.body().is_empty() {
                w.set_status(StatusCode::BAD_REQUEST);
                return;
            }
            w.headers_mut().insert("location", "/users/99".parse().unwrap());
            w.set_status(StatusCode::CREATED);
        }));

    let mut options = Options::from(Settings::load()?);
    options.no_signal_handling = false;

    app.serve("0.0.0.0:3000", options).await
}

//! Path-prefix scoping.

use crate::chain::Next;
use crate::context::Context;
use crate::handler::{BoxedMiddleware, Middleware};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Activates the wrapped middleware only for requests under a path prefix.
///
/// `""` and `"/"` match everything, including lifecycle invocations with no
/// request. Any other prefix is compared with a trailing `/`, so `"/api"`
/// and `"/api/"` both match `/api`, `/api/` and `/api/users` but not
/// `/apikey`. Outside the prefix the wrapper is transparent: it calls `next`.
pub struct Scoped {
    prefix: Option<String>,
    inner: BoxedMiddleware,
}

impl Scoped {
    pub fn new(pattern: &str, inner: BoxedMiddleware) -> Self {
        let prefix = match pattern {
            "" | "/" => None,
            p if p.ends_with('/') => Some(p.to_owned()),
            p => Some(format!("{p}/")),
        };
        Self { prefix, inner }
    }

    pub fn matches(&self, req: Option<&Request>) -> bool {
        match (&self.prefix, req) {
            (None, _) | (_, None) => true,
            (Some(prefix), Some(req)) => {
                // Same as `format!("{path}/").starts_with(prefix)`, minus the allocation.
                let path = req.path();
                path.starts_with(prefix.as_str()) || path == &prefix[..prefix.len() - 1]
            }
        }
    }
}

impl Middleware for Scoped {
    fn handle(&self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>, next: Next<'_>) {
        if self.matches(req) {
            self.inner.handle(cx, w, req, next);
        } else {
            next.run(cx, w, req);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::chain::Chain;
    use crate::handler::middleware_fn;
    use crate::recorder::Recorder;

    fn noop() -> BoxedMiddleware {
        middleware_fn(|cx, w, req, next| next.run(cx, w, req)).into_middleware()
    }

    fn get(path: &str) -> Request {
        http::Request::get(path).body(Bytes::new()).unwrap().into()
    }

    #[test]
    fn prefix_matches_on_segment_boundaries() {
        for pattern in ["/api", "/api/"] {
            let scoped = Scoped::new(pattern, noop());
            for path in ["/api", "/api/", "/api/x", "/api/x/y"] {
                assert!(scoped.matches(Some(&get(path))), "{pattern} should match {path}");
            }
            for path in ["/apikey", "/", "/ap", "/other/api"] {
                assert!(!scoped.matches(Some(&get(path))), "{pattern} should not match {path}");
            }
        }
    }

    #[test]
    fn wildcards_match_everything_including_no_request() {
        for pattern in ["", "/"] {
            let scoped = Scoped::new(pattern, noop());
            assert!(scoped.matches(Some(&get("/anything"))));
            assert!(scoped.matches(None));
        }
        assert!(Scoped::new("/api", noop()).matches(None));
    }

    #[test]
    fn out_of_scope_requests_pass_through() {
        let gate = middleware_fn(|_cx, w, _req, _next| w.set_status(StatusCode::FORBIDDEN)).into_middleware();
        let scoped: BoxedMiddleware = Arc::new(Scoped::new("/admin", gate));
        let chain = Chain::new(vec![
            scoped,
            middleware_fn(|_cx, w, _req, _next| { let _ = w.write(b"reached"); }).into_middleware(),
        ]);

        let run = |path: &str| {
            let req = get(path);
            let mut rec = Recorder::new();
            let mut w = ResponseWriter::new(&mut rec);
            chain.run(Context::background(), &mut w, Some(&req));
            drop(w);
            rec
        };

        let public = run("/public");
        assert_eq!(public.status(), StatusCode::OK);
        assert_eq!(public.body_str(), "reached");

        let admin = run("/admin/users");
        assert_eq!(admin.status(), StatusCode::FORBIDDEN);
        assert_eq!(admin.body_str(), "");
    }
}

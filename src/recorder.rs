//! In-memory response destination.
//!
//! Captures everything a chain produces so tests (and embedders that never
//! touch a socket) can inspect it afterwards:
//!
//! ```rust
//! use spritz::{Dispatcher, Recorder, handler_fn};
//!
//! let app = Dispatcher::new().get("/", handler_fn(|w, _req| {
//!     w.write(b"hi").unwrap();
//! }));
//!
//! let req: spritz::Request = http::Request::get("/").body(bytes::Bytes::new()).unwrap().into();
//! let mut rec = Recorder::new();
//! app.dispatch(&mut rec, Some(&req));
//!
//! assert_eq!(rec.body_str(), "hi");
//! ```

use std::io;

use http::{HeaderMap, StatusCode};

use crate::response::{Flush, ResponseDestination};

/// Records status, headers and body. Supports [`Flush`] and nothing else.
#[derive(Debug, Default)]
pub struct Recorder {
    status: Option<StatusCode>,
    headers: HeaderMap,
    committed_headers: HeaderMap,
    body: Vec<u8>,
    heads: usize,
    flushed: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status, or `200 OK` if nothing was committed.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn body(&self) -> &[u8] { &self.body }
    pub fn body_str(&self) -> String { String::from_utf8_lossy(&self.body).into_owned() }

    /// Live header map, including edits made after the commit.
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Snapshot of the headers as they were when the head was committed.
    pub fn headers_at_commit(&self) -> &HeaderMap { &self.committed_headers }

    /// How many times a head reached this destination.
    pub fn heads_written(&self) -> usize { self.heads }

    pub fn flushed(&self) -> bool { self.flushed }
}

impl ResponseDestination for Recorder {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_head(&mut self, status: StatusCode) {
        self.heads += 1;
        if self.status.is_none() {
            self.status = Some(status);
            self.committed_headers = self.headers.clone();
        }
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        Some(self)
    }
}

impl Flush for Recorder {
    fn flush(&mut self) -> io::Result<()> {
        self.flushed = true;
        Ok(())
    }
}

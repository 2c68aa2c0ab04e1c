//! Incoming HTTP request type.

use bytes::Bytes;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Uri};

/// An incoming HTTP request with its body already collected.
///
/// Shared by reference along the chain. Per-request data that middleware
/// wants to hand downstream belongs in the [`Context`](crate::Context), not
/// here.
#[derive(Debug)]
pub struct Request {
    head: Parts,
    body: Bytes,
}

impl Request {
    pub(crate) fn from_parts(head: Parts, body: Bytes) -> Self {
        Self { head, body }
    }

    pub fn method(&self) -> &Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn extensions(&self) -> &Extensions { &self.head.extensions }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (head, body) = req.into_parts();
        Self::from_parts(head, body)
    }
}

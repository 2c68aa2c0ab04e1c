//! The instrumented response sink.
//!
//! Every request gets exactly one [`ResponseWriter`]. It wraps the real
//! destination (a hyper connection, a [`Recorder`](crate::Recorder), or
//! anything implementing [`ResponseDestination`]) and keeps the books:
//!
//! - **status**: `200 OK` until set explicitly or until the first byte is
//!   written, whichever comes first. After that it is fixed.
//! - **size**: cumulative body bytes accepted by the destination.
//! - **written**: whether the head has been committed.
//! - **before hooks**: run once, newest first, right before the head is
//!   committed. The place to stamp headers that depend on the final status.
//!
//! # Optional capabilities
//!
//! Streaming flush, connection takeover and close notification are not part
//! of every destination. A destination advertises each one by returning
//! `Some` from the matching accessor; the writer asks first and delegates.
//! When a capability is missing the call fails with
//! [`Error::Unsupported`](crate::Error::Unsupported) instead of silently
//! doing nothing.
//!
//! Writing after a successful [`hijack`](ResponseWriter::hijack) is
//! unspecified.

use std::fmt;
use std::io;
use std::mem;

use http::{HeaderMap, StatusCode};
use hyper::upgrade::OnUpgrade;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;

// ── Capabilities ──────────────────────────────────────────────────────────────

/// Optional, out-of-band abilities a destination may support.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Capability {
    /// Push buffered body bytes to the client now.
    Flush,
    /// Take over the underlying connection for a protocol upgrade.
    Hijack,
    /// Learn when the client has gone away.
    CloseNotify,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flush       => "stream flushing",
            Self::Hijack      => "connection hijacking",
            Self::CloseNotify => "close notification",
        })
    }
}

pub trait Flush {
    fn flush(&mut self) -> io::Result<()>;
}

pub trait Hijack {
    /// Hands over the pending connection upgrade. Respond with
    /// `101 Switching Protocols` and await the returned future off the
    /// request path to obtain the raw connection.
    fn hijack(&mut self) -> io::Result<OnUpgrade>;
}

pub trait CloseNotify {
    /// A token that is cancelled once the client stops listening.
    fn close_notify(&mut self) -> CancellationToken;
}

// ── Destination ───────────────────────────────────────────────────────────────

/// Where a response actually goes.
///
/// The writer guarantees [`write_head`](Self::write_head) is called exactly
/// once and before any [`write_body`](Self::write_body).
pub trait ResponseDestination {
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn write_head(&mut self, status: StatusCode);
    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn flusher(&mut self) -> Option<&mut dyn Flush> { None }
    fn hijacker(&mut self) -> Option<&mut dyn Hijack> { None }
    fn close_notifier(&mut self) -> Option<&mut dyn CloseNotify> { None }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// A pre-write hook: sees the status about to be committed and may still
/// edit headers.
pub type BeforeHook<'a> = Box<dyn FnOnce(StatusCode, &mut HeaderMap) + 'a>;

/// Per-request wrapper around a [`ResponseDestination`].
///
/// Also implements [`io::Write`], so `write!(w, "...")` works.
pub struct ResponseWriter<'a> {
    dest: &'a mut dyn ResponseDestination,
    status: StatusCode,
    size: usize,
    written: bool,
    before: Vec<BeforeHook<'a>>,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(dest: &'a mut dyn ResponseDestination) -> Self {
        Self { dest, status: StatusCode::OK, size: 0, written: false, before: Vec::new() }
    }

    /// Response headers. Edits made after the head is committed are not sent.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.dest.headers_mut()
    }

    /// Commits the head with `status`. Inert once the head is committed.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.written {
            debug!(current = self.status.as_u16(), ignored = status.as_u16(), "status already committed");
            return;
        }
        self.commit(status);
    }

    /// Writes body bytes, committing `200 OK` first if nothing was committed.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.written {
            self.commit(self.status);
        }
        let n = self.dest.write_body(buf)?;
        self.size += n;
        Ok(n)
    }

    /// Registers a hook to run right before the head is committed.
    /// Hooks run newest first. A hook added after the commit never runs.
    pub fn before(&mut self, hook: impl FnOnce(StatusCode, &mut HeaderMap) + 'a) {
        self.before.push(Box::new(hook));
    }

    /// Commits the default status if the chain produced nothing.
    pub fn finish(&mut self) {
        if !self.written {
            self.commit(self.status);
        }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn size(&self) -> usize { self.size }
    pub fn written(&self) -> bool { self.written }

    pub fn supports(&mut self, capability: Capability) -> bool {
        match capability {
            Capability::Flush       => self.dest.flusher().is_some(),
            Capability::Hijack      => self.dest.hijacker().is_some(),
            Capability::CloseNotify => self.dest.close_notifier().is_some(),
        }
    }

    /// Pushes buffered body bytes downstream, committing the head first.
    pub fn flush_stream(&mut self) -> Result<(), Error> {
        if !self.supports(Capability::Flush) {
            return Err(Error::Unsupported(Capability::Flush));
        }
        self.finish();
        match self.dest.flusher() {
            Some(flusher) => Ok(flusher.flush()?),
            None => Err(Error::Unsupported(Capability::Flush)),
        }
    }

    /// Takes over the connection. See [`Hijack::hijack`].
    pub fn hijack(&mut self) -> Result<OnUpgrade, Error> {
        let hijacker = self.dest.hijacker().ok_or(Error::Unsupported(Capability::Hijack))?;
        Ok(hijacker.hijack()?)
    }

    /// A token cancelled once the client goes away.
    pub fn close_notify(&mut self) -> Result<CancellationToken, Error> {
        let notifier = self.dest.close_notifier().ok_or(Error::Unsupported(Capability::CloseNotify))?;
        Ok(notifier.close_notify())
    }

    fn commit(&mut self, status: StatusCode) {
        self.status = status;
        self.written = true;
        let hooks = mem::take(&mut self.before);
        for hook in hooks.into_iter().rev() {
            hook(status, self.dest.headers_mut());
        }
        self.dest.write_head(status);
    }
}

impl io::Write for ResponseWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseWriter::write(self, buf)
    }

    /// Like [`flush_stream`](ResponseWriter::flush_stream) it commits the head
    /// and then flushes the destination, but a destination without [`Flush`]
    /// is not an error here: nothing is buffered at this layer.
    fn flush(&mut self) -> io::Result<()> {
        self.finish();
        match self.dest.flusher() {
            Some(flusher) => flusher.flush(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ResponseWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("size", &self.size)
            .field("written", &self.written)
            .field("before", &self.before.len())
            .finish()
    }
}

//! The socket-backed response destination.
//!
//! The chain runs on a blocking thread and writes into a
//! [`StreamDestination`]; the connection task on the other side turns what
//! arrives into a hyper response. The head goes over a oneshot as soon as it
//! is committed, body bytes over a bounded channel in chunks of up to
//! [`CHUNK`] bytes. A full channel blocks the chain, which is the
//! back-pressure from a slow client.
//!
//! A response that cannot complete (the chain panicked after committing,
//! or the write deadline passed) ends with an error frame rather than a
//! clean end of stream, so hyper drops the connection and the client sees a
//! truncated response instead of a short one.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use hyper::body::{Body, Frame, SizeHint};
use hyper::upgrade::OnUpgrade;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::response::{CloseNotify, Flush, Hijack, ResponseDestination};

/// Body bytes buffered before they are handed to the connection.
pub(crate) const CHUNK: usize = 8 * 1024;

/// Chunks in flight between the chain and the connection.
const CHANNEL_DEPTH: usize = 16;

pub(crate) type Head = (StatusCode, HeaderMap);

type Chunk = io::Result<Bytes>;

pub(crate) struct StreamDestination {
    headers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    body: mpsc::Sender<Chunk>,
    buf: BytesMut,
    upgrade: Option<OnUpgrade>,
    closed: CancellationToken,
}

/// Streams what the chain writes as a hyper response body.
///
/// Dropping it (hyper does once the client is gone or the response is
/// complete) cancels the close-notify token.
pub(crate) struct ChannelBody {
    rx: mpsc::Receiver<Chunk>,
    deadline: Option<Pin<Box<Sleep>>>,
    _closed: DropGuard,
}

/// Builds a connected destination/body pair plus the receiver for the head.
pub(crate) fn channel(upgrade: Option<OnUpgrade>) -> (StreamDestination, ChannelBody, oneshot::Receiver<Head>) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(CHANNEL_DEPTH);
    let closed = CancellationToken::new();

    let dest = StreamDestination {
        headers: HeaderMap::new(),
        head: Some(head_tx),
        body: body_tx,
        buf: BytesMut::new(),
        upgrade,
        closed: closed.clone(),
    };
    let body = ChannelBody { rx: body_rx, deadline: None, _closed: closed.drop_guard() };
    (dest, body, head_rx)
}

impl StreamDestination {
    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.body
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
    }

    /// Sends whatever is still buffered. Called once the chain has returned.
    pub(crate) fn finish(mut self) -> io::Result<()> {
        self.send_buffered()
    }

    /// Gives up on the response. Before the commit the head is withdrawn and
    /// the connection answers `500`; after it, buffered bytes are discarded
    /// and the body ends with `err`.
    pub(crate) fn abort(mut self, err: io::Error) {
        if self.head.take().is_some() {
            return;
        }
        self.buf.clear();
        // a closed channel means hyper is already gone
        let _ = self.body.blocking_send(Err(err));
    }
}

impl ResponseDestination for StreamDestination {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_head(&mut self, status: StatusCode) {
        if let Some(tx) = self.head.take() {
            // the connection task may already have timed out; nothing to tell
            let _ = tx.send((status, self.headers.clone()));
        }
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.body.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"));
        }
        self.buf.extend_from_slice(buf);
        if self.buf.len() >= CHUNK {
            self.send_buffered()?;
        }
        Ok(buf.len())
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        Some(self)
    }

    fn hijacker(&mut self) -> Option<&mut dyn Hijack> {
        if self.upgrade.is_some() { Some(self) } else { None }
    }

    fn close_notifier(&mut self) -> Option<&mut dyn CloseNotify> {
        Some(self)
    }
}

impl Flush for StreamDestination {
    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

impl Hijack for StreamDestination {
    fn hijack(&mut self) -> io::Result<OnUpgrade> {
        self.upgrade
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "connection already hijacked"))
    }
}

impl CloseNotify for StreamDestination {
    fn close_notify(&mut self) -> CancellationToken {
        self.closed.clone()
    }
}

impl ChannelBody {
    /// Fails the body once `deadline` passes, closing the connection.
    pub(crate) fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline.map(|at| Box::pin(tokio::time::sleep_until(at)));
        self
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = &mut *self;
        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                this.deadline = None;
                // later writes from the chain fail fast
                this.rx.close();
                return Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout elapsed"))));
            }
        }
        this.rx.poll_recv(cx).map(|chunk| chunk.map(|res| res.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

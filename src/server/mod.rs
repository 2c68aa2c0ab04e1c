//! HTTP server and graceful shutdown.
//!
//! Each connection runs on its own task; each request on it is collected,
//! then pushed through the shared [`Chain`] on a blocking thread. The
//! response head is sent as soon as the chain commits it, and the body
//! streams while the chain is still writing.
//!
//! # Stopping
//!
//! The server stops when its root [`Context`] is cancelled, when
//! [`ShutdownHandle::stop`] is called, or (unless
//! [`Options::no_signal_handling`] is set) on SIGINT/SIGTERM. It then:
//!
//! 1. Stops accepting; new connections are refused.
//! 2. Asks every open connection to finish its in-flight request and close.
//! 3. Waits up to [`Options::graceful_timeout`] for them, aborting whatever
//!    is left afterwards.
//! 4. Returns from [`Server::serve`].

mod observer;
mod options;
mod stream;

use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use observer::ShutdownHandle;
pub use options::{ConnState, ConnStateHook, Options, Settings, ShutdownHook};

use crate::chain::Chain;
use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::middleware::panic_message;
use crate::request::Request;
use crate::response::ResponseWriter;
use observer::observe;
use stream::ChannelBody;

/// hyper refuses HTTP/1 read buffers smaller than this.
const MIN_BUF_SIZE: usize = 8 * 1024;

/// A configured server, ready to [`serve`](Server::serve) a listener.
pub struct Server {
    shared: Arc<Shared>,
}

/// What every connection task needs. Read-only while serving.
struct Shared {
    chain: Arc<Chain>,
    root: Context,
    options: Options,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Freezes `dispatcher` into a server. Its chain is built once here and
    /// shared by every request.
    pub fn new(dispatcher: Dispatcher, options: Options) -> Self {
        let (root, chain) = dispatcher.into_parts();
        let shutdown = ShutdownHandle::new(options.graceful_timeout);
        Self {
            shared: Arc::new(Shared { chain: Arc::new(chain), root, options, shutdown }),
        }
    }

    /// A handle that stops this server from anywhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shared.shutdown.clone()
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Accepts connections on `listener` until stopped.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        let shared = self.shared;
        let addr = listener.local_addr()?;
        info!(%addr, "spritz listening");

        let observer = tokio::spawn(observe(shared.root.clone(), shared.shutdown.clone()));
        if !shared.options.no_signal_handling {
            tokio::spawn(stop_on_signal(shared.shutdown.clone()));
        }

        let limit = match shared.options.listen_limit {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        let mut tasks = JoinSet::new();

        loop {
            // With a listen limit, wait for a free slot before accepting.
            let permit = match &limit {
                Some(slots) => tokio::select! {
                    biased;
                    () = shared.shutdown.stopped() => break,
                    permit = Arc::clone(slots).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            tokio::select! {
                biased;

                () = shared.shutdown.stopped() => break,

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    tasks.spawn(handle_connection(Arc::clone(&shared), stream, peer, permit));
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        info!(in_flight = tasks.len(), "shutting down, draining connections");
        if let Some(hook) = &shared.options.shutdown_initiated {
            hook();
        }

        let grace = shared.shutdown.grace();
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if grace.is_zero() {
            drain.await;
        } else if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(remaining = tasks.len(), ?grace, "grace period elapsed, aborting connections");
            tasks.shutdown().await;
        }

        match observer.await {
            Ok(why) => debug!(?why, "observer exited"),
            Err(e) => error!("observer task failed: {e}"),
        }
        info!("spritz stopped");
        Ok(())
    }
}

impl Shared {
    fn conn_state(&self, peer: SocketAddr, state: ConnState) {
        if let Some(hook) = &self.options.conn_state {
            hook(peer, state);
        }
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn handle_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer: SocketAddr,
    _permit: Option<OwnedSemaphorePermit>,
) {
    shared.conn_state(peer, ConnState::New);

    #[cfg(feature = "tls")]
    if let Some(config) = &shared.options.tls {
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::clone(config));
        match acceptor.accept(stream).await {
            Ok(tls) => serve_connection(&shared, tls, peer).await,
            Err(e) => debug!(%peer, "tls handshake failed: {e}"),
        }
        shared.conn_state(peer, ConnState::Closed);
        return;
    }

    serve_connection(&shared, stream, peer).await;
    shared.conn_state(peer, ConnState::Closed);
}

async fn serve_connection<I>(shared: &Arc<Shared>, io: I, peer: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut builder = ConnBuilder::new(TokioExecutor::new());
    {
        let mut http1 = builder.http1();
        http1.timer(TokioTimer::new());
        if let Some(timeout) = shared.options.read_timeout {
            http1.header_read_timeout(timeout);
        }
        if shared.options.max_header_bytes > 0 {
            http1.max_buf_size(shared.options.max_header_bytes.max(MIN_BUF_SIZE));
        }
    }

    let svc = {
        let shared = Arc::clone(shared);
        // Called once per request on the connection, not once per connection.
        service_fn(move |req| respond(Arc::clone(&shared), req, peer))
    };

    let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), svc);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        () = shared.shutdown.stopped() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = res {
        debug!(%peer, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the chain and hands hyper the response as soon
/// as its head is committed.
///
/// The write timeout runs from here: a head that is not committed in time
/// closes the connection, and so does a body still streaming at the deadline.
async fn respond(
    shared: Arc<Shared>,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
) -> Result<http::Response<ChannelBody>, Error> {
    shared.conn_state(peer, ConnState::Active);
    let deadline = shared.options.write_timeout.map(|limit| Instant::now() + limit);

    let (mut parts, body) = req.into_parts();
    let upgrade = parts.extensions.remove::<OnUpgrade>();
    let body = body.collect().await?.to_bytes();
    let req = Request::from_parts(parts, body);

    let (mut dest, body, head) = stream::channel(upgrade);
    let body = body.with_deadline(deadline);
    let chain = Arc::clone(&shared.chain);
    let cx = shared.root.child();

    tokio::task::spawn_blocking(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut w = ResponseWriter::new(&mut dest);
            chain.run(cx, &mut w, Some(&req));
            w.finish();
        }));
        match outcome {
            Ok(()) => {
                if let Err(e) = dest.finish() {
                    debug!("response body dropped: {e}");
                }
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(%peer, path = req.path(), panic = message, "request panicked");
                dest.abort(io::Error::other(format!("request panicked: {message}")));
            }
        }
    });

    let head = match deadline {
        Some(at) => match tokio::time::timeout_at(at, head).await {
            Ok(head) => head,
            Err(_) => {
                warn!(%peer, "response not committed in time, closing connection");
                return Err(Error::WriteTimeout);
            }
        },
        None => head.await,
    };

    let mut resp = http::Response::new(body);
    match head {
        Ok((status, headers)) => {
            *resp.status_mut() = status;
            *resp.headers_mut() = headers;
        }
        // The head is only withdrawn when the chain panicked before committing.
        Err(_) => *resp.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR,
    }
    Ok(resp)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

async fn stop_on_signal(handle: ShutdownHandle) {
    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            handle.stop();
        }
        () = handle.stopped() => {}
    }
}

/// Resolves on the first SIGINT or SIGTERM. A signal that cannot be
/// listened for is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}

//! Stop coordination between the root context and a running server.
//!
//! A server stops for one of two reasons: its root context was cancelled,
//! or someone called [`ShutdownHandle::stop`]. Whichever comes first wins,
//! and the observer task exits either way so nothing leaks once the server
//! has returned.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::Context;

/// Stops a running [`Server`](crate::Server). Cheap to clone.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    stopping: CancellationToken,
    grace: OnceLock<Duration>,
    default_grace: Duration,
}

impl ShutdownHandle {
    pub(crate) fn new(default_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                stopping: CancellationToken::new(),
                grace: OnceLock::new(),
                default_grace,
            }),
        }
    }

    /// Begins a graceful stop using the configured grace period.
    ///
    /// Returns `true` for the call that actually initiated the stop; later
    /// calls are no-ops.
    pub fn stop(&self) -> bool {
        self.stop_within(self.inner.default_grace)
    }

    /// Begins a graceful stop, allowing in-flight connections `grace` to
    /// finish. Zero waits for all of them.
    pub fn stop_within(&self, grace: Duration) -> bool {
        if self.inner.grace.set(grace).is_err() {
            return false;
        }
        self.inner.stopping.cancel();
        true
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.is_cancelled()
    }

    /// Resolves once a stop has begun.
    pub async fn stopped(&self) {
        self.inner.stopping.cancelled().await;
    }

    /// The grace period of the stop in progress, or the configured default.
    pub fn grace(&self) -> Duration {
        self.inner.grace.get().copied().unwrap_or(self.inner.default_grace)
    }
}

/// Why [`observe`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Observed {
    ContextCancelled,
    ServerStopped,
}

/// Waits for whichever comes first: `root` cancelled or the server stopped.
/// A cancelled root triggers the stop.
pub(crate) async fn observe(root: Context, handle: ShutdownHandle) -> Observed {
    tokio::select! {
        () = root.done() => {
            debug!("root context cancelled");
            handle.stop();
            Observed::ContextCancelled
        }
        () = handle.stopped() => Observed::ServerStopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_stop_counts() {
        let handle = ShutdownHandle::new(Duration::from_secs(5));
        assert!(!handle.is_stopping());
        assert_eq!(handle.grace(), Duration::from_secs(5));

        assert!(handle.clone().stop_within(Duration::from_millis(10)));
        assert!(!handle.stop());
        assert!(handle.is_stopping());
        assert_eq!(handle.grace(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn cancelled_root_stops_the_server() {
        let (root, cancel) = Context::background().with_cancel();
        let handle = ShutdownHandle::new(Duration::ZERO);
        let task = tokio::spawn(observe(root, handle.clone()));

        cancel.cancel();

        assert_eq!(task.await.unwrap(), Observed::ContextCancelled);
        assert!(handle.is_stopping());
        // the observer already stopped it, so a later stop is a no-op
        assert!(!handle.stop());
    }

    #[tokio::test]
    async fn stopped_server_releases_the_observer() {
        let (root, _cancel) = Context::background().with_cancel();
        let handle = ShutdownHandle::new(Duration::ZERO);
        let task = tokio::spawn(observe(root.clone(), handle.clone()));

        assert!(handle.stop());

        assert_eq!(task.await.unwrap(), Observed::ServerStopped);
        assert!(!root.is_cancelled());
    }
}

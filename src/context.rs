//! Per-request execution context.
//!
//! A [`Context`] carries two things down the middleware chain:
//!
//! - **Values**: an immutable, typed key/value chain. Each value is keyed by
//!   its Rust type. [`Context::with_value`] returns a *new* context that
//!   shadows any earlier value of the same type; the parent is never touched.
//! - **Cancellation**: a [`CancellationToken`]. Cancelling a context cancels
//!   every context derived from it. A child can never un-cancel, and
//!   cancelling a child never reaches its parent.
//!
//! Cloning is two reference-count increments. Pass it by value to `next`.
//!
//! ```rust
//! use spritz::Context;
//!
//! struct RequestId(u64);
//!
//! let root = Context::background();
//! let cx = root.with_value(RequestId(7));
//!
//! assert_eq!(cx.value::<RequestId>().map(|id| id.0), Some(7));
//! assert!(root.value::<RequestId>().is_none());
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Immutable, derivable, cancellable value carrier threaded through the chain.
#[derive(Clone)]
pub struct Context {
    values: Option<Arc<Entry>>,
    cancel: CancellationToken,
}

/// One link of the value chain. Lookups walk from the newest entry back to
/// the root, so the most recent value of a type wins.
struct Entry {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Entry>>,
}

impl Context {
    /// An empty root context. It carries no values and is never cancelled on
    /// its own; derive a cancellable child with [`with_cancel`](Self::with_cancel).
    pub fn background() -> Self {
        Self { values: None, cancel: CancellationToken::new() }
    }

    /// Returns a child context that additionally carries `value`, shadowing
    /// any value of the same type in `self`.
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        let entry = Entry {
            key: TypeId::of::<T>(),
            value: Arc::new(value),
            parent: self.values.clone(),
        };
        Self { values: Some(Arc::new(entry)), cancel: self.cancel.clone() }
    }

    /// Looks up the most recently added value of type `T`.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        let key = TypeId::of::<T>();
        let mut cursor = self.values.as_deref();
        while let Some(entry) = cursor {
            if entry.key == key {
                return entry.value.downcast_ref::<T>();
            }
            cursor = entry.parent.as_deref();
        }
        None
    }

    /// Returns a child context that is cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        Self { values: self.values.clone(), cancel: self.cancel.child_token() }
    }

    /// Returns a child context plus the handle that cancels it (and everything
    /// derived from it).
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let child = self.child();
        let handle = CancelHandle(child.cancel.clone());
        (child, handle)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once this context is cancelled.
    ///
    /// Interceptors on the blocking request path should poll
    /// [`is_cancelled`](Self::is_cancelled) instead; cancellation is advisory.
    pub async fn done(&self) {
        self.cancel.cancelled().await;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut cursor = self.values.as_deref();
        while let Some(entry) = cursor {
            depth += 1;
            cursor = entry.parent.as_deref();
        }
        f.debug_struct("Context")
            .field("values", &depth)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels the context it was created with.
#[derive(Clone, Debug)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

//! The linked middleware chain.
//!
//! Given interceptors `[I₁, I₂, …, Iₙ]` the chain is built from the tail:
//!
//! ```text
//! Void                      ← sentinel, built first, does nothing
//! Node(Iₙ, → Void)
//! …
//! Node(I₁, → Node(I₂, …))   ← head
//! ```
//!
//! Running the head calls `I₁` with a [`Next`] pointing at `I₂`'s node, and so
//! on. Because every interceptor runs its back half only after `next`
//! returns, the call order for `[A, B, C]` in front of a handler `H` is
//!
//! ```text
//! A-before → B-before → C-before → H → C-after → B-after → A-after
//! ```
//!
//! The chain is read-only once built and can be shared by every request.

use std::fmt;

use crate::context::Context;
use crate::handler::BoxedMiddleware;
use crate::request::Request;
use crate::response::ResponseWriter;

/// One link: an interceptor plus its successor, or the terminal sentinel.
enum Link {
    Node { middleware: BoxedMiddleware, next: Box<Link> },
    Void,
}

/// An immutable, singly linked chain of interceptors.
pub struct Chain {
    head: Link,
    len: usize,
}

impl Chain {
    /// Links `middlewares` in order. Insertion order is call order.
    pub fn new(middlewares: Vec<BoxedMiddleware>) -> Self {
        let len = middlewares.len();
        let head = middlewares
            .into_iter()
            .rev()
            .fold(Link::Void, |next, middleware| Link::Node { middleware, next: Box::new(next) });
        Self { head, len }
    }

    /// Runs the chain from the head. Returns once every interceptor that ran
    /// has finished its back half.
    pub fn run(&self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>) {
        Next { link: &self.head }.run(cx, w, req);
    }

    /// Number of interceptors, not counting the sentinel.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("len", &self.len).finish()
    }
}

impl Drop for Chain {
    // Unlink iteratively so long chains cannot overflow the stack on drop.
    fn drop(&mut self) {
        let mut cursor = std::mem::replace(&mut self.head, Link::Void);
        while let Link::Node { middleware, next } = cursor {
            drop(middleware);
            cursor = *next;
        }
    }
}

/// The rest of the chain, bound to one interceptor invocation.
///
/// `run` consumes it: an interceptor can continue the chain at most once.
pub struct Next<'a> {
    link: &'a Link,
}

impl Next<'_> {
    /// Invokes the next interceptor with `cx`. A no-op at the sentinel.
    pub fn run(self, cx: Context, w: &mut ResponseWriter<'_>, req: Option<&Request>) {
        match self.link {
            Link::Node { middleware, next } => middleware.handle(cx, w, req, Next { link: &**next }),
            Link::Void => {}
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.link {
            Link::Node { .. } => "Next(Node)",
            Link::Void => "Next(Void)",
        })
    }
}

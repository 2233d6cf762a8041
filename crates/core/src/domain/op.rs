//! Units of queued graph work

use super::context::Context;
use super::graph::GraphError;

/// Outcome of applying an [`Op`]
pub type OpResult = Result<(), GraphError>;

/// A graph mutation applied by the queue worker
///
/// Implementations should be quick; heavy preparation belongs before the enqueue.
/// The context passed to `apply` is cancelled on shutdown, and long-running ops are
/// expected to watch it. Nothing preempts an op that does not.
pub trait Op: Send {
    fn apply(self: Box<Self>, ctx: &Context) -> OpResult;
}

/// Owned, type-erased op as it sits in the mailbox
pub type BoxedOp = Box<dyn Op>;

/// Adapter turning a closure into an [`Op`]
pub struct Func<F>(F);

impl<F> Func<F>
where
    F: FnOnce(&Context) -> OpResult + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Op for Func<F>
where
    F: FnOnce(&Context) -> OpResult + Send,
{
    fn apply(self: Box<Self>, ctx: &Context) -> OpResult {
        (self.0)(ctx)
    }
}

//! Serialized mutation of a shared audio processing graph
//!
//! Structural changes to the graph (attach, detach, connect, disconnect) are
//! funnelled through a single worker thread owned by a [`Queue`]. The
//! [`Dispatcher`] binds such a queue to one [`Graph`] and offers typed
//! synchronous and fire-and-forget helpers on top of it.

pub mod domain;

pub use domain::{
    BoxedOp, BusIndex, Context, Dispatcher, Func, Graph, GraphError, NodeHandle, Op, OpResult,
    Queue, QueueConfig, QueueError, QueueState, QueueStatsSnapshot,
};

//! Domain entities and business rules

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod graph;
pub mod op;
pub mod queue;

pub use config::{ConfigError, LogConfig, PatchbayConfig, QueueConfig};
pub use context::Context;
pub use dispatcher::Dispatcher;
pub use graph::{BusIndex, Graph, GraphError, NodeHandle};
pub use op::{BoxedOp, Func, Op, OpResult};
pub use queue::{Queue, QueueError, QueueState, QueueStatsSnapshot};

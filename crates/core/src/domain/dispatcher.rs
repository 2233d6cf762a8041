//! Graph dispatcher: typed graph mutations funnelled through one [`Queue`]
//!
//! Two call styles are offered:
//! - synchronous (`attach`, `detach`, `run_sync`): the caller blocks until its op
//!   ran on the worker and receives the graph's result
//! - fire-and-forget (`connect`, `disconnect_node_input`, `disconnect_node_output`,
//!   `enqueue`): the caller only learns that the op was accepted. Graph errors on
//!   this path are dropped; these mutations are expected to tolerate benign races
//!   such as connecting an already connected pair.

use super::context::Context;
use super::graph::{BusIndex, Graph, NodeHandle};
use super::op::{Func, Op, OpResult};
use super::queue::{Queue, QueueError, Result};
use crossbeam::channel::{self, Receiver, after, select};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Binds one graph to one mutation queue
///
/// Cloning is cheap and every clone feeds the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    graph: Option<Arc<dyn Graph>>,
    queue: Option<Arc<Queue>>,
}

impl Dispatcher {
    /// Create a dispatcher; `None` for the queue creates one with default capacity
    pub fn new(graph: Option<Arc<dyn Graph>>, queue: Option<Arc<Queue>>) -> Self {
        let queue = queue.unwrap_or_else(|| Arc::new(Queue::default()));
        Self {
            graph,
            queue: Some(queue),
        }
    }

    /// Dispatcher with no queue behind it
    ///
    /// Synchronous calls run inline on the caller's thread; asynchronous ones
    /// report [`QueueError::NotInitialized`].
    pub fn unqueued(graph: Option<Arc<dyn Graph>>) -> Self {
        Self { graph, queue: None }
    }

    pub fn start(&self) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.start(),
            None => Ok(()),
        }
    }

    pub fn close(&self) {
        if let Some(queue) = &self.queue {
            queue.close();
        }
    }

    pub fn queue(&self) -> Option<&Arc<Queue>> {
        self.queue.as_ref()
    }

    pub fn graph(&self) -> Option<&Arc<dyn Graph>> {
        self.graph.as_ref()
    }

    /// Schedule an arbitrary op on the worker, serialized with graph mutations
    pub fn enqueue<O: Op + 'static>(&self, op: O) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.enqueue(op),
            None => Err(QueueError::NotInitialized),
        }
    }

    /// Run `f` on the worker and wait for its result
    ///
    /// Returns the error `f` produced, or [`QueueError::Canceled`] when the queue
    /// shuts down before `f` ran. Without a queue, or when already on the worker
    /// thread, `f` runs inline.
    pub fn run_sync<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Context) -> OpResult + Send + 'static,
    {
        let queue = match &self.queue {
            Some(queue) if !queue.on_worker_thread() => queue,
            Some(queue) => return f(queue.context()).map_err(QueueError::from),
            None => return f(&Context::background()).map_err(QueueError::from),
        };
        let done = self.submit(queue, f)?;
        wait_for_completion(queue, done, None)
    }

    /// Like [`run_sync`](Self::run_sync), but stop waiting after `timeout`
    ///
    /// On timeout the op stays queued and still runs; its result is dropped.
    pub fn run_sync_timeout<F>(&self, f: F, timeout: Duration) -> Result<()>
    where
        F: FnOnce(&Context) -> OpResult + Send + 'static,
    {
        let queue = match &self.queue {
            Some(queue) if !queue.on_worker_thread() => queue,
            Some(queue) => return f(queue.context()).map_err(QueueError::from),
            None => return f(&Context::background()).map_err(QueueError::from),
        };
        let done = self.submit(queue, f)?;
        let result = wait_for_completion(queue, done, Some(timeout));
        if let Err(QueueError::Timeout(_)) = result {
            debug!(timeout_ms = timeout.as_millis() as u64, "Gave up waiting for graph op");
        }
        result
    }

    /// Attach a node, waiting until it is part of the graph
    pub fn attach(&self, node: NodeHandle) -> Result<()> {
        let graph = self.graph.clone();
        self.run_sync(move |_| match graph {
            Some(graph) => graph.attach(node),
            None => Ok(()),
        })
    }

    /// Detach a node, waiting until it is out of the graph
    pub fn detach(&self, node: NodeHandle) -> Result<()> {
        let graph = self.graph.clone();
        self.run_sync(move |_| match graph {
            Some(graph) => graph.detach(node),
            None => Ok(()),
        })
    }

    /// Queue a connection; only acceptance is reported
    pub fn connect(
        &self,
        src: NodeHandle,
        dst: NodeHandle,
        from_bus: BusIndex,
        to_bus: BusIndex,
    ) -> Result<()> {
        let graph = self.graph.clone();
        self.enqueue(Func::new(move |_: &Context| match graph {
            Some(graph) => graph.connect(src, dst, from_bus, to_bus),
            None => Ok(()),
        }))
    }

    /// Queue a disconnect of one input bus; only acceptance is reported
    pub fn disconnect_node_input(&self, node: NodeHandle, bus: BusIndex) -> Result<()> {
        let graph = self.graph.clone();
        self.enqueue(Func::new(move |_: &Context| match graph {
            Some(graph) => graph.disconnect_input(node, bus),
            None => Ok(()),
        }))
    }

    /// Queue a disconnect of one output bus; only acceptance is reported
    pub fn disconnect_node_output(&self, node: NodeHandle, bus: BusIndex) -> Result<()> {
        let graph = self.graph.clone();
        self.enqueue(Func::new(move |_: &Context| match graph {
            Some(graph) => graph.disconnect_output(node, bus),
            None => Ok(()),
        }))
    }

    /// Enqueue `f` wrapped so that its result lands in a fresh one-slot channel
    fn submit<F>(&self, queue: &Queue, f: F) -> Result<Receiver<OpResult>>
    where
        F: FnOnce(&Context) -> OpResult + Send + 'static,
    {
        let (done_tx, done_rx) = channel::bounded(1);
        queue.enqueue(Func::new(move |ctx: &Context| {
            let result = f(ctx);
            // The caller may have stopped waiting; never block the worker on it.
            if done_tx.try_send(result.clone()).is_err() {
                trace!("Graph op completed with nobody waiting");
            }
            result
        }))?;
        Ok(done_rx)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("has_graph", &self.graph.is_some())
            .field("queue", &self.queue)
            .finish()
    }
}

/// Wait for a submitted op, the queue's shutdown, or the timeout
fn wait_for_completion(
    queue: &Queue,
    done: Receiver<OpResult>,
    timeout: Option<Duration>,
) -> Result<()> {
    let shutdown = queue.context().done();
    let deadline = timeout.map(after).unwrap_or_else(channel::never);
    select! {
        recv(done) -> result => match result {
            Ok(result) => result.map_err(QueueError::from),
            // The op was dropped unapplied during shutdown.
            Err(_) => Err(QueueError::Canceled),
        },
        recv(shutdown) -> _ => match done.try_recv() {
            Ok(result) => result.map_err(QueueError::from),
            Err(_) => Err(QueueError::Canceled),
        },
        recv(deadline) -> _ => Err(QueueError::Timeout(timeout.unwrap_or_default())),
    }
}

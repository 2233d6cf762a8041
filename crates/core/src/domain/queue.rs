//! Serialized graph mutation queue
//!
//! A [`Queue`] owns a bounded mailbox of [`Op`]s and exactly one worker thread that
//! applies them in enqueue order. Because that worker is the only consumer, the
//! graph it mutates needs no lock of its own.
//!
//! Shutdown is bounded: [`Queue::close`] cancels the shared [`Context`], and the
//! worker applies whatever is still buffered for at most the drain window before
//! it exits. Ops left after the window are discarded.

use super::config::QueueConfig;
use super::context::Context;
use super::graph::GraphError;
use super::op::{BoxedOp, Op};
use crossbeam::channel::{self, Receiver, Sender, select};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Errors surfaced by the queue and the dispatcher built on it
#[derive(Debug, Error)]
pub enum QueueError {
    /// There is no queue or mailbox behind the caller
    #[error("Queue not initialized")]
    NotInitialized,

    /// The queue is shutting down or already shut down
    #[error("Queue closed")]
    Closed,

    /// The queue shut down before the awaited op completed
    #[error("Operation canceled")]
    Canceled,

    /// The caller stopped waiting before the awaited op completed
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn queue worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The op ran and the graph rejected it
    #[error("Graph failure: {0}")]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Lifecycle of a [`Queue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueState {
    Unstarted,
    Running,
    Closing,
    Closed,
}

/// Counters maintained by the worker
#[derive(Debug, Default)]
struct QueueStats {
    applied: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    discarded: AtomicU64,
    last_duration_us: AtomicU64,
    max_duration_us: AtomicU64,
}

impl QueueStats {
    fn record(&self, elapsed: Duration, ok: bool) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.applied.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.last_duration_us.store(micros, Ordering::Relaxed);
        self.max_duration_us.fetch_max(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            last_duration: Duration::from_micros(self.last_duration_us.load(Ordering::Relaxed)),
            max_duration: Duration::from_micros(self.max_duration_us.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of the worker counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatsSnapshot {
    /// Ops applied, successful or not
    pub applied: u64,
    /// Applied ops that returned an error
    pub failed: u64,
    /// Empty mailbox entries skipped
    pub skipped: u64,
    /// Ops dropped because the drain window ran out
    pub discarded: u64,
    pub last_duration: Duration,
    pub max_duration: Duration,
}

struct Lifecycle {
    state: QueueState,
    worker: Option<JoinHandle<()>>,
    /// Held by the worker while it runs; dropped when it exits
    exit_tx: Option<Sender<()>>,
}

/// Bounded FIFO of graph ops applied by a single worker thread
pub struct Queue {
    tx: Sender<Option<BoxedOp>>,
    rx: Receiver<Option<BoxedOp>>,
    ctx: Context,
    capacity: usize,
    drain_timeout: Duration,
    slow_op_threshold: Duration,
    stats: Arc<QueueStats>,
    lifecycle: Mutex<Lifecycle>,
    exited: Receiver<()>,
    worker_thread: Arc<OnceLock<ThreadId>>,
}

impl Queue {
    /// Create a queue with the given mailbox capacity (0 = default)
    pub fn new(capacity: usize) -> Self {
        Self::with_config(&QueueConfig::with_capacity(capacity))
    }

    pub fn with_config(config: &QueueConfig) -> Self {
        let capacity = config.effective_capacity();
        let (tx, rx) = channel::bounded(capacity);
        let (exit_tx, exited) = channel::bounded(0);

        debug!(capacity, drain_ms = config.drain_timeout_ms, "Creating graph queue");

        Self {
            tx,
            rx,
            ctx: Context::new(),
            capacity,
            drain_timeout: config.drain_timeout(),
            slow_op_threshold: config.slow_op_threshold(),
            stats: Arc::new(QueueStats::default()),
            lifecycle: Mutex::new(Lifecycle {
                state: QueueState::Unstarted,
                worker: None,
                exit_tx: Some(exit_tx),
            }),
            exited,
            worker_thread: Arc::new(OnceLock::new()),
        }
    }

    /// Spawn the worker thread
    ///
    /// Only the first call on an unstarted queue does anything. Starting a queue
    /// that was already closed is a no-op as well: queues are not reusable.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != QueueState::Unstarted {
            return Ok(());
        }
        let Some(exit_tx) = lifecycle.exit_tx.take() else {
            return Ok(());
        };

        let worker = Worker {
            rx: self.rx.clone(),
            ctx: self.ctx.clone(),
            drain_timeout: self.drain_timeout,
            slow_op_threshold: self.slow_op_threshold,
            stats: Arc::clone(&self.stats),
        };
        let worker_thread = Arc::clone(&self.worker_thread);

        let spawned = thread::Builder::new()
            .name("patchbay-graph-queue".to_string())
            .spawn(move || {
                let _exit = exit_tx;
                let _ = worker_thread.set(thread::current().id());
                worker.run();
            });

        match spawned {
            Ok(handle) => {
                lifecycle.worker = Some(handle);
                lifecycle.state = QueueState::Running;
                debug!(capacity = self.capacity, "Graph queue started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn graph queue worker");
                self.ctx.cancel();
                lifecycle.state = QueueState::Closed;
                Err(QueueError::Spawn(e))
            }
        }
    }

    /// Place an op in the mailbox, blocking while it is full
    pub fn enqueue<O: Op + 'static>(&self, op: O) -> Result<()> {
        self.enqueue_boxed(Some(Box::new(op)))
    }

    /// Place an already boxed op in the mailbox
    ///
    /// `None` is accepted and skipped by the worker.
    pub fn enqueue_boxed(&self, op: Option<BoxedOp>) -> Result<()> {
        if self.ctx.is_cancelled() {
            return Err(QueueError::Closed);
        }
        select! {
            send(self.tx, op) -> sent => sent.map_err(|_| QueueError::Closed),
            recv(self.ctx.done()) -> _ => Err(QueueError::Closed),
        }
    }

    /// Stop the worker and wait until it has exited
    ///
    /// Safe to call any number of times, from any number of threads; every caller
    /// returns once the worker is gone. Called from inside an op (on the worker
    /// thread itself) it only signals shutdown.
    pub fn close(&self) {
        self.ctx.cancel();

        if self.on_worker_thread() {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == QueueState::Running {
                lifecycle.state = QueueState::Closing;
            }
            return;
        }

        let (worker, exit_tx) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != QueueState::Closed {
                lifecycle.state = QueueState::Closing;
            }
            (lifecycle.worker.take(), lifecycle.exit_tx.take())
        };
        drop(exit_tx);

        match worker {
            Some(handle) => {
                if handle.join().is_err() {
                    error!("Graph queue worker panicked");
                }
            }
            // Either never started or another caller is joining; both end with the
            // exit signal disconnected.
            None => {
                let _ = self.exited.recv();
            }
        }

        let mut lifecycle = self.lifecycle();
        if lifecycle.state != QueueState::Closed {
            lifecycle.state = QueueState::Closed;
            debug!("Graph queue closed");
        }
    }

    pub fn state(&self) -> QueueState {
        self.lifecycle().state
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ops currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// The shared context, cancelled when the queue closes
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the calling thread is this queue's worker
    pub fn on_worker_thread(&self) -> bool {
        self.worker_thread.get() == Some(&thread::current().id())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::with_config(&QueueConfig::default())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("state", &self.state())
            .field("capacity", &self.capacity)
            .field("buffered", &self.len())
            .finish()
    }
}

/// State moved onto the worker thread
struct Worker {
    rx: Receiver<Option<BoxedOp>>,
    ctx: Context,
    drain_timeout: Duration,
    slow_op_threshold: Duration,
    stats: Arc<QueueStats>,
}

impl Worker {
    fn run(self) {
        trace!("Graph queue worker running");
        let done = self.ctx.done();
        loop {
            select! {
                recv(done) -> _ => {
                    self.drain();
                    break;
                }
                recv(self.rx) -> msg => match msg {
                    Ok(Some(op)) => self.apply(op),
                    Ok(None) => self.skip(),
                    Err(_) => break,
                },
            }
        }
        trace!("Graph queue worker exited");
    }

    /// Apply what is still buffered until the mailbox is empty or the window closes
    fn drain(&self) {
        let deadline = Instant::now() + self.drain_timeout;
        while Instant::now() < deadline {
            match self.rx.try_recv() {
                Ok(Some(op)) => self.apply(op),
                Ok(None) => self.skip(),
                Err(_) => break,
            }
        }

        let discarded = self.rx.try_iter().count() as u64;
        if discarded > 0 {
            self.stats.discarded.fetch_add(discarded, Ordering::Relaxed);
            debug!(discarded, "Drain window elapsed, discarding buffered graph ops");
        }
    }

    fn apply(&self, op: BoxedOp) {
        let started = Instant::now();
        let result = op.apply(&self.ctx);
        let elapsed = started.elapsed();

        self.stats.record(elapsed, result.is_ok());
        if elapsed > self.slow_op_threshold {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slow_op_threshold.as_millis() as u64,
                "Graph mutation exceeded target duration"
            );
        }
    }

    fn skip(&self) {
        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
        trace!("Skipping empty graph op");
    }
}

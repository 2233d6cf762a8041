//! In-memory processing graph
//!
//! [`MemoryGraph`] stands in for the native engine: it owns node storage, tracks
//! which nodes are attached and which output feeds which input bus, and keeps a
//! log of every structural mutation in the order it was applied.
//!
//! It also watches the single-mutator discipline the queue is meant to provide:
//! overlapping structural calls and the set of threads that mutated the graph are
//! recorded so tests can assert on them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, info, warn};
use patchbay_core::domain::graph::{BusIndex, Graph, GraphError, NodeHandle, Result};

/// Kind of processing node, fixing its default bus layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Source with a single output
    Player,
    /// Sums its inputs into one output
    Mixer,
    /// Single input, single output
    Effect,
    /// Terminal sink
    Output,
}

impl NodeKind {
    pub const MIXER_INPUTS: u32 = 8;

    /// Number of (input, output) buses
    pub fn buses(&self) -> (u32, u32) {
        match self {
            NodeKind::Player => (0, 1),
            NodeKind::Mixer => (Self::MIXER_INPUTS, 1),
            NodeKind::Effect => (1, 1),
            NodeKind::Output => (1, 0),
        }
    }
}

/// One edge of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Connection {
    pub src: NodeHandle,
    pub from_bus: BusIndex,
    pub dst: NodeHandle,
    pub to_bus: BusIndex,
}

/// A structural change that was applied successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Attach(NodeHandle),
    Detach(NodeHandle),
    Connect(Connection),
    DisconnectInput { node: NodeHandle, bus: BusIndex },
    DisconnectOutput { node: NodeHandle, bus: BusIndex },
}

#[derive(Debug)]
struct NodeSlot {
    kind: NodeKind,
    inputs: u32,
    outputs: u32,
    attached: bool,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<NodeHandle, NodeSlot>,
    /// Keyed by destination input bus; an input has at most one source
    inputs: HashMap<(NodeHandle, BusIndex), (NodeHandle, BusIndex)>,
    log: Vec<Mutation>,
}

impl GraphState {
    fn node(&self, node: NodeHandle) -> Result<&NodeSlot> {
        if node.is_null() {
            return Err(GraphError::NullHandle);
        }
        self.nodes.get(&node).ok_or(GraphError::UnknownNode(node))
    }

    fn attached(&self, node: NodeHandle) -> Result<&NodeSlot> {
        let slot = self.node(node)?;
        if !slot.attached {
            return Err(GraphError::NotAttached(node));
        }
        Ok(slot)
    }
}

/// In-memory graph implementing [`Graph`]
pub struct MemoryGraph {
    state: Mutex<GraphState>,
    next_handle: AtomicU64,
    running: AtomicBool,
    mutating: AtomicBool,
    overlapping: AtomicU64,
    mutators: Mutex<HashSet<ThreadId>>,
    mutation_delay: Duration,
}

impl MemoryGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            next_handle: AtomicU64::new(1),
            running: AtomicBool::new(false),
            mutating: AtomicBool::new(false),
            overlapping: AtomicU64::new(0),
            mutators: Mutex::new(HashSet::new()),
            mutation_delay: Duration::ZERO,
        }
    }

    /// Make every structural call take at least `delay`
    ///
    /// Widens the window in which overlapping mutations would be observed.
    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = delay;
        self
    }

    /// Allocate a detached node and return its handle
    pub fn create_node(&self, kind: NodeKind) -> NodeHandle {
        let handle = NodeHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (inputs, outputs) = kind.buses();
        self.state().nodes.insert(
            handle,
            NodeSlot {
                kind,
                inputs,
                outputs,
                attached: false,
            },
        );
        debug!(node = %handle, ?kind, "Created node");
        handle
    }

    /// Free a node's storage. Refused while the node is attached.
    pub fn release(&self, node: NodeHandle) -> Result<()> {
        let mut state = self.state();
        if state.node(node)?.attached {
            return Err(GraphError::StillAttached(node));
        }
        state.nodes.remove(&node);
        debug!(node = %node, "Released node");
        Ok(())
    }

    pub fn kind(&self, node: NodeHandle) -> Option<NodeKind> {
        self.state().nodes.get(&node).map(|slot| slot.kind)
    }

    pub fn is_attached(&self, node: NodeHandle) -> bool {
        self.state().nodes.get(&node).is_some_and(|slot| slot.attached)
    }

    pub fn attached_count(&self) -> usize {
        self.state().nodes.values().filter(|slot| slot.attached).count()
    }

    /// Source feeding input bus `bus` of `node`, if any
    pub fn source_of(&self, node: NodeHandle, bus: BusIndex) -> Option<(NodeHandle, BusIndex)> {
        self.state().inputs.get(&(node, bus)).copied()
    }

    /// All current connections, sorted
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self
            .state()
            .inputs
            .iter()
            .map(|(&(dst, to_bus), &(src, from_bus))| Connection {
                src,
                from_bus,
                dst,
                to_bus,
            })
            .collect();
        connections.sort();
        connections
    }

    /// Successful mutations in the order they were applied
    pub fn mutation_log(&self) -> Vec<Mutation> {
        self.state().log.clone()
    }

    /// Number of distinct threads that performed structural mutations
    pub fn mutator_thread_count(&self) -> usize {
        self.mutators
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Structural calls that started while another was still in progress
    pub fn overlapping_mutations(&self) -> u64 {
        self.overlapping.load(Ordering::Acquire)
    }

    /// Read-only, callable from any thread
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
        info!("Memory graph {}", if running { "started" } else { "stopped" });
    }

    fn state(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_mutation(&self) -> MutationGuard<'_> {
        if self.mutating.swap(true, Ordering::AcqRel) {
            self.overlapping.fetch_add(1, Ordering::AcqRel);
            warn!("Overlapping structural mutation detected");
        }
        self.mutators
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(thread::current().id());
        if !self.mutation_delay.is_zero() {
            thread::sleep(self.mutation_delay);
        }
        MutationGuard { graph: self }
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

struct MutationGuard<'a> {
    graph: &'a MemoryGraph,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.graph.mutating.store(false, Ordering::Release);
    }
}

fn check_bus(node: NodeHandle, bus: BusIndex, available: u32) -> Result<()> {
    if bus >= available {
        return Err(GraphError::BusOutOfRange {
            node,
            bus,
            available,
        });
    }
    Ok(())
}

impl Graph for MemoryGraph {
    fn attach(&self, node: NodeHandle) -> Result<()> {
        let _guard = self.begin_mutation();
        let mut state = self.state();
        if state.node(node)?.attached {
            return Err(GraphError::AlreadyAttached(node));
        }
        if let Some(slot) = state.nodes.get_mut(&node) {
            slot.attached = true;
        }
        state.log.push(Mutation::Attach(node));
        debug!(node = %node, "Attached node");
        Ok(())
    }

    fn detach(&self, node: NodeHandle) -> Result<()> {
        let _guard = self.begin_mutation();
        let mut state = self.state();
        state.attached(node)?;
        state
            .inputs
            .retain(|&(dst, _), &mut (src, _)| dst != node && src != node);
        if let Some(slot) = state.nodes.get_mut(&node) {
            slot.attached = false;
        }
        state.log.push(Mutation::Detach(node));
        debug!(node = %node, "Detached node");
        Ok(())
    }

    fn connect(&self, src: NodeHandle, dst: NodeHandle, from_bus: BusIndex, to_bus: BusIndex) -> Result<()> {
        let _guard = self.begin_mutation();
        let mut state = self.state();
        let outputs = state.attached(src)?.outputs;
        let inputs = state.attached(dst)?.inputs;
        if src == dst {
            return Err(GraphError::SelfConnection(src));
        }
        check_bus(src, from_bus, outputs)?;
        check_bus(dst, to_bus, inputs)?;

        // Connecting into an occupied input replaces its source.
        if let Some(previous) = state.inputs.insert((dst, to_bus), (src, from_bus)) {
            if previous != (src, from_bus) {
                debug!(dst = %dst, to_bus, replaced = %previous.0, "Replaced input source");
            }
        }
        let connection = Connection {
            src,
            from_bus,
            dst,
            to_bus,
        };
        state.log.push(Mutation::Connect(connection));
        debug!(src = %src, from_bus, dst = %dst, to_bus, "Connected nodes");
        Ok(())
    }

    fn disconnect_input(&self, node: NodeHandle, bus: BusIndex) -> Result<()> {
        let _guard = self.begin_mutation();
        let mut state = self.state();
        let inputs = state.attached(node)?.inputs;
        check_bus(node, bus, inputs)?;
        state.inputs.remove(&(node, bus));
        state.log.push(Mutation::DisconnectInput { node, bus });
        debug!(node = %node, bus, "Disconnected input");
        Ok(())
    }

    fn disconnect_output(&self, node: NodeHandle, bus: BusIndex) -> Result<()> {
        let _guard = self.begin_mutation();
        let mut state = self.state();
        let outputs = state.attached(node)?.outputs;
        check_bus(node, bus, outputs)?;
        state
            .inputs
            .retain(|_, &mut (src, from_bus)| !(src == node && from_bus == bus));
        state.log.push(Mutation::DisconnectOutput { node, bus });
        debug!(node = %node, bus, "Disconnected output");
        Ok(())
    }
}

impl Drop for MemoryGraph {
    fn drop(&mut self) {
        let state = self.state();
        debug!(nodes = state.nodes.len(), "Dropping memory graph");
    }
}

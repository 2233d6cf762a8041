//! The processing graph guarded by the mutation queue
//!
//! The graph itself lives outside this crate (a native engine, or the in-memory
//! stand-in from the `infra` crate). This module only fixes the narrow interface
//! the queue needs and the opaque handle type nodes are referred to by.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors reported by a graph mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The null handle was passed where a node is required
    #[error("Node handle is null")]
    NullHandle,

    /// The handle does not name a node owned by this graph
    #[error("Unknown node: {0}")]
    UnknownNode(NodeHandle),

    /// The node must be attached for this operation
    #[error("Node {0} is not attached")]
    NotAttached(NodeHandle),

    #[error("Node {0} is already attached")]
    AlreadyAttached(NodeHandle),

    /// The node cannot be released while it is still part of the graph
    #[error("Node {0} is still attached")]
    StillAttached(NodeHandle),

    #[error("Bus {bus} out of range for node {node} ({available} available)")]
    BusOutOfRange {
        node: NodeHandle,
        bus: BusIndex,
        available: u32,
    },

    #[error("Node {0} cannot be connected to itself")]
    SelfConnection(NodeHandle),

    /// Failure reported by the underlying engine
    #[error("Engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// Index of an input or output bus on a node
pub type BusIndex = u32;

/// Opaque token naming a node inside a graph
///
/// Handles are plain values: copying one does not extend the node's lifetime.
/// The graph that minted a handle owns the node storage; a handle stays valid
/// until the graph releases the node, which it refuses to do while the node is
/// attached. After a detach the creator may keep using the handle (for example
/// to re-attach it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle(u64);

impl NodeHandle {
    /// Handle that never names a node
    pub const NULL: NodeHandle = NodeHandle(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural mutations of a processing graph
///
/// Implementations are not expected to tolerate concurrent structural mutation.
/// The queue guarantees every call below is made from its single worker thread;
/// the `Send + Sync` bound only lets the handle travel to that thread.
pub trait Graph: Send + Sync {
    /// Add a node to the graph
    fn attach(&self, node: NodeHandle) -> Result<()>;

    /// Remove a node from the graph, dropping all of its connections
    fn detach(&self, node: NodeHandle) -> Result<()>;

    /// Connect output bus `from_bus` of `src` to input bus `to_bus` of `dst`
    fn connect(&self, src: NodeHandle, dst: NodeHandle, from_bus: BusIndex, to_bus: BusIndex) -> Result<()>;

    /// Break whatever feeds input bus `bus` of `node`
    fn disconnect_input(&self, node: NodeHandle, bus: BusIndex) -> Result<()>;

    /// Break every connection leaving output bus `bus` of `node`
    fn disconnect_output(&self, node: NodeHandle, bus: BusIndex) -> Result<()>;
}

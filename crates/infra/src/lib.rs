//! Infrastructure implementations for patchbay

pub mod audio;

pub use audio::{
    Connection, MemoryGraph, Mutation, NodeKind, TapError, TapFormat, TapInfo, TapKey, TapRegistry,
};

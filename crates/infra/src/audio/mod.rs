//! In-memory stand-ins for the native audio layer
//!
//! - `engine`: a processing graph implementing `patchbay_core::Graph`
//! - `tap`: the registry of installed taps

pub mod engine;
pub mod tap;

pub use engine::*;
pub use tap::*;

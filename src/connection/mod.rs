//! Connection Management Module
//!
//! Listener registration and the per-rule accept loops.

pub mod manager;
pub mod registry;

pub use manager::{ConnectionManager, ForwarderHandle, ForwarderStats};
pub use registry::ListenerRegistry;

//! Configuration Module
//!
//! Handles service settings and forwarding rule loading.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::*;

//! tcpfwd Library
//!
//! TCP port forwarder: listens on local ports and relays every accepted
//! connection, byte for byte, to the target configured for that port.

pub mod config;
pub mod connection;
pub mod logging;
pub mod relay;
pub mod shutdown;

pub use config::{ConfigManager, ForwardingRule, Settings};
pub use connection::{ConnectionManager, ForwarderHandle, ListenerRegistry};
pub use relay::RelayEngine;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the forwarder
pub type Result<T> = anyhow::Result<T>;

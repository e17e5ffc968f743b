//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default buffer size for a single copy direction (32 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default listening port when only a target is given on the command line
pub const DEFAULT_PORT: u16 = 1337;

/// A single forwarding rule: everything accepted on `port` is relayed to `target`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ForwardingRule {
    /// Target address in `host:port` form
    pub target: String,
    /// Local port to listen on
    pub port: u16,
}

impl ForwardingRule {
    pub fn new(target: impl Into<String>, port: u16) -> Self {
        Self {
            target: target.into(),
            port,
        }
    }
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} => {}", self.port, self.target)
    }
}

/// Service settings, loaded from an optional TOML file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Interface the listeners bind to
    pub listen_host: String,
    /// Read buffer size per copy direction, in bytes
    pub buffer_size: usize,
    pub log_level: String,
    /// Directory for the daily log files
    pub log_dir: PathBuf,
    pub log_to_file: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            log_level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            log_to_file: true,
        }
    }
}

//! Data Relay Module
//!
//! Dials targets and copies bytes both ways between client and target.

pub mod copy;
pub mod engine;
pub mod session;

pub use copy::{copy_stream, format_bytes, CopyOutcome};
pub use engine::RelayEngine;
pub use session::{Direction, Endpoints, RelaySession, SessionSummary};

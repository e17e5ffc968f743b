//! Relay Session

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::{debug, info};

use super::copy::format_bytes;

/// Local and remote address pair of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
}

impl Endpoints {
    /// Read both addresses off a stream; a peer that already vanished shows as unknown
    pub fn of(stream: &TcpStream) -> Self {
        Self {
            local: stream.local_addr().ok(),
            remote: stream.peer_addr().ok(),
        }
    }
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn addr(a: &Option<SocketAddr>) -> String {
            a.map(|a| a.to_string())
                .unwrap_or_else(|| "[unknown]".to_string())
        }
        write!(f, "[LOCAL: {} | REMOTE: {}]", addr(&self.local), addr(&self.remote))
    }
}

/// Which way bytes flow inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to target
    Upstream,
    /// Target to client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => write!(f, "client => target"),
            Direction::Downstream => write!(f, "target => client"),
        }
    }
}

/// A paired client/target connection
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: u64,
    /// Target as configured in the rule
    pub target: String,
    pub client: Endpoints,
    pub upstream: Endpoints,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Statistics of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: u64,
    pub target: String,
    pub duration: Duration,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl SessionSummary {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }
}

impl RelaySession {
    pub fn new(session_id: u64, target: String, client: Endpoints, upstream: Endpoints) -> Self {
        debug!(
            "Creating relay session {}: {} -> {}",
            session_id, client, upstream
        );

        Self {
            session_id,
            target,
            client,
            upstream,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Source and destination endpoints for a copy direction
    pub fn endpoints(&self, direction: Direction) -> (Endpoints, Endpoints) {
        match direction {
            Direction::Upstream => (self.client, self.upstream),
            Direction::Downstream => (self.upstream, self.client),
        }
    }

    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Add to the counter of the given direction
    pub fn add_bytes(&self, direction: Direction, bytes: u64) {
        let counter = match direction {
            Direction::Upstream => &self.bytes_up,
            Direction::Downstream => &self.bytes_down,
        };
        counter.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            target: self.target.clone(),
            duration: self.duration(),
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
        }
    }

    /// Log session statistics
    pub fn log_stats(&self) {
        let duration = self.duration();
        // format_duration prints down to nanoseconds otherwise
        let duration = Duration::from_millis(duration.as_millis() as u64);

        info!(
            session_id = self.session_id,
            target = %self.target,
            duration_ms = duration.as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            "Relay session completed"
        );

        info!(
            "[{}] session closed: {} <-> {} | Duration: {} | Up: {} | Down: {}",
            self.session_id,
            self.client,
            self.upstream,
            humantime::format_duration(duration),
            format_bytes(self.bytes_up()),
            format_bytes(self.bytes_down())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(local: &str, remote: &str) -> Endpoints {
        Endpoints {
            local: Some(local.parse().unwrap()),
            remote: Some(remote.parse().unwrap()),
        }
    }

    #[test]
    fn test_endpoints_display() {
        let ep = endpoints("127.0.0.1:8000", "127.0.0.1:50000");
        assert_eq!(
            ep.to_string(),
            "[LOCAL: 127.0.0.1:8000 | REMOTE: 127.0.0.1:50000]"
        );

        let unknown = Endpoints {
            local: None,
            remote: None,
        };
        assert_eq!(unknown.to_string(), "[LOCAL: [unknown] | REMOTE: [unknown]]");
    }

    #[test]
    fn test_direction_endpoints() {
        let client = endpoints("127.0.0.1:8000", "127.0.0.1:50000");
        let upstream = endpoints("127.0.0.1:50001", "127.0.0.1:9000");
        let session = RelaySession::new(7, "127.0.0.1:9000".to_string(), client, upstream);

        assert_eq!(session.endpoints(Direction::Upstream), (client, upstream));
        assert_eq!(session.endpoints(Direction::Downstream), (upstream, client));
    }

    #[test]
    fn test_byte_counters() {
        let client = endpoints("127.0.0.1:8000", "127.0.0.1:50000");
        let upstream = endpoints("127.0.0.1:50001", "127.0.0.1:9000");
        let session = RelaySession::new(1, "127.0.0.1:9000".to_string(), client, upstream);

        assert_eq!(session.total_bytes(), 0);

        session.add_bytes(Direction::Upstream, 1024);
        session.add_bytes(Direction::Downstream, 2048);
        session.add_bytes(Direction::Upstream, 1);

        let summary = session.to_summary();
        assert_eq!(summary.session_id, 1);
        assert_eq!(summary.target, "127.0.0.1:9000");
        assert_eq!(summary.bytes_up, 1025);
        assert_eq!(summary.bytes_down, 2048);
        assert_eq!(summary.total_bytes(), 3073);
    }
}

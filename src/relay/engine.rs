//! Relay Engine

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use super::copy::{is_already_closed, run_copy_task};
use super::session::{Direction, Endpoints, RelaySession, SessionSummary};
use crate::config::{Settings, DEFAULT_BUFFER_SIZE};
use crate::Result;

/// Dials targets and relays data between client and target connections
#[derive(Debug, Clone)]
pub struct RelayEngine {
    buffer_size: usize,
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayEngine {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self { buffer_size }
    }

    /// Create a relay engine from settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_buffer_size(settings.buffer_size)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Open the outbound connection for a rule. A single attempt, no retry.
    pub async fn connect_to_target(&self, target: &str) -> Result<TcpStream> {
        debug!("Attempting to connect to target: {}", target);

        TcpStream::connect(target)
            .await
            .with_context(|| format!("could not connect to target [{}]", target))
    }

    /// Serve one accepted client: dial `target`, relay both ways, tear down.
    ///
    /// Returns an error when the dial fails; in that case no copy task runs
    /// and the client connection is closed on return.
    pub async fn run_session(
        &self,
        session_id: u64,
        client: TcpStream,
        target: &str,
    ) -> Result<SessionSummary> {
        let client_endpoints = Endpoints::of(&client);
        let target_stream = self.connect_to_target(target).await?;
        let target_endpoints = Endpoints::of(&target_stream);

        info!(
            "[{}] connection to server {} established!",
            session_id, target_endpoints
        );

        let session = Arc::new(RelaySession::new(
            session_id,
            target.to_string(),
            client_endpoints,
            target_endpoints,
        ));

        self.relay(session, client, target_stream).await
    }

    /// Run both copy directions and wait for both before closing anything
    pub async fn relay(
        &self,
        session: Arc<RelaySession>,
        client: TcpStream,
        target: TcpStream,
    ) -> Result<SessionSummary> {
        let (client_read, client_write) = client.into_split();
        let (target_read, target_write) = target.into_split();

        let upstream = tokio::spawn(run_copy_task(
            Arc::clone(&session),
            Direction::Upstream,
            client_read,
            target_write,
            self.buffer_size,
        ));
        let downstream = tokio::spawn(run_copy_task(
            Arc::clone(&session),
            Direction::Downstream,
            target_read,
            client_write,
            self.buffer_size,
        ));

        let (upstream, downstream) = tokio::join!(upstream, downstream);

        // A panicked task already dropped its halves, so both sockets are closed either way
        let (client_read, target_write, _) = upstream.map_err(|e| {
            anyhow!("[{}] {} task failed: {}", session.session_id, Direction::Upstream, e)
        })?;
        let (target_read, client_write, _) = downstream.map_err(|e| {
            anyhow!("[{}] {} task failed: {}", session.session_id, Direction::Downstream, e)
        })?;

        match target_read.reunite(target_write) {
            Ok(target) => Self::close_target(&session, target).await,
            Err(e) => error!(
                "[{}] could not reassemble target {}: {}",
                session.session_id, session.upstream, e
            ),
        }
        drop(client_read);
        drop(client_write);

        session.log_stats();
        Ok(session.to_summary())
    }

    async fn close_target(session: &RelaySession, mut target: TcpStream) {
        match target.shutdown().await {
            Ok(()) => debug!("[{}] target {} closed", session.session_id, session.upstream),
            Err(e) if is_already_closed(&e) => {
                debug!("[{}] target {} was already closed", session.session_id, session.upstream)
            }
            Err(e) => error!(
                "[{}] could not close target {}: {}",
                session.session_id, session.upstream, e
            ),
        }
    }
}

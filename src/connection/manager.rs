//! Connection Manager Implementation

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use super::registry::ListenerRegistry;
use crate::config::{ForwardingRule, Settings};
use crate::relay::{Endpoints, RelayEngine};
use crate::Result;

/// Counters shared by all accept loops
#[derive(Debug, Default)]
struct Counters {
    total_sessions: AtomicU64,
    active_sessions: AtomicUsize,
    failed_sessions: AtomicU64,
    accept_errors: AtomicU64,
}

/// Snapshot of forwarder activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderStats {
    /// Connections accepted so far
    pub total_sessions: u64,
    pub active_sessions: usize,
    /// Sessions that ended with an error (dial failure or a crashed copy task)
    pub failed_sessions: u64,
    pub accept_errors: u64,
}

/// Turns forwarding rules into listeners and accept loops
pub struct ConnectionManager {
    rules: Arc<[ForwardingRule]>,
    registry: Arc<ListenerRegistry>,
    engine: Arc<RelayEngine>,
    next_session_id: Arc<AtomicU64>,
    counters: Arc<Counters>,
}

/// Running accept loops, one per rule that got a listener
pub struct ForwarderHandle {
    loops: Vec<(ForwardingRule, JoinHandle<()>)>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(settings: &Settings, rules: Vec<ForwardingRule>) -> Result<Self> {
        let listen_host = settings
            .listen_host
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid listen host: {}", settings.listen_host))?;

        Ok(Self {
            rules: rules.into(),
            registry: Arc::new(ListenerRegistry::new(listen_host)),
            engine: Arc::new(RelayEngine::from_settings(settings)),
            next_session_id: Arc::new(AtomicU64::new(1)),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Register listeners and spawn one accept loop per rule.
    ///
    /// A rule whose port cannot be bound is logged and skipped; the other
    /// rules are unaffected.
    pub async fn start(&self) -> ForwarderHandle {
        let mut loops = Vec::with_capacity(self.rules.len());

        for rule in self.rules.iter() {
            let listener = match self.registry.ensure_listener(rule.port).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Not forwarding {}: {:#}", rule, e);
                    continue;
                }
            };

            let handle = tokio::spawn(Self::accept_loop(
                rule.clone(),
                listener,
                Arc::clone(&self.engine),
                Arc::clone(&self.next_session_id),
                Arc::clone(&self.counters),
            ));
            loops.push((rule.clone(), handle));
        }

        info!(
            "Started {} of {} forwarding rules",
            loops.len(),
            self.rules.len()
        );
        ForwarderHandle { loops }
    }

    /// Accept forever; every connection becomes an independent relay session
    #[instrument(skip_all, fields(port = rule.port, target = %rule.target))]
    async fn accept_loop(
        rule: ForwardingRule,
        listener: Arc<TcpListener>,
        engine: Arc<RelayEngine>,
        next_session_id: Arc<AtomicU64>,
        counters: Arc<Counters>,
    ) {
        info!("Starting connection acceptance loop for {}", rule);

        loop {
            match listener.accept().await {
                Ok((client, addr)) => {
                    let session_id = next_session_id.fetch_add(1, Ordering::Relaxed);
                    let client_endpoints = Endpoints::of(&client);
                    info!("[{}] CLIENT: {}", session_id, client_endpoints);
                    info!("[{}] TARGET: {}", session_id, rule.target);
                    debug!("[{}] client {} connected", session_id, addr);

                    counters.total_sessions.fetch_add(1, Ordering::Relaxed);
                    counters.active_sessions.fetch_add(1, Ordering::Relaxed);

                    let engine = Arc::clone(&engine);
                    let counters = Arc::clone(&counters);
                    let target = rule.target.clone();

                    tokio::spawn(async move {
                        match engine.run_session(session_id, client, &target).await {
                            Ok(summary) => debug!(
                                "[{}] relay completed, {} bytes total",
                                session_id,
                                summary.total_bytes()
                            ),
                            Err(e) => {
                                counters.failed_sessions.fetch_add(1, Ordering::Relaxed);
                                error!("[{}] {:#}", session_id, e);
                            }
                        }
                        counters.active_sessions.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                Err(e) => {
                    counters.accept_errors.fetch_add(1, Ordering::Relaxed);
                    error!("could not accept client connection: {}", e);
                }
            }
        }
    }

    /// Get forwarder statistics
    pub fn stats(&self) -> ForwarderStats {
        ForwarderStats {
            total_sessions: self.counters.total_sessions.load(Ordering::Relaxed),
            active_sessions: self.counters.active_sessions.load(Ordering::Relaxed),
            failed_sessions: self.counters.failed_sessions.load(Ordering::Relaxed),
            accept_errors: self.counters.accept_errors.load(Ordering::Relaxed),
        }
    }
}

impl ForwarderHandle {
    /// Number of accept loops that were started
    pub fn running_loops(&self) -> usize {
        self.loops.len()
    }

    /// Rules that have a live accept loop
    pub fn active_rules(&self) -> Vec<&ForwardingRule> {
        self.loops.iter().map(|(rule, _)| rule).collect()
    }

    /// Wait on the accept loops; they only end when aborted or on panic
    pub async fn wait(&mut self) {
        for (rule, handle) in self.loops.iter_mut() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Accept loop for {} failed: {}", rule, e);
                }
            }
        }
    }

    /// Stop all accept loops. Sessions already running are not affected.
    pub fn abort(&self) {
        for (_, handle) in &self.loops {
            handle.abort();
        }
    }
}

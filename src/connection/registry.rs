//! Listener Registry

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Result;

/// Outcome of the first bind attempt on a port
#[derive(Debug)]
enum PortState {
    Bound(Arc<TcpListener>),
    /// Bind failed; kept so later rules on the port see the same result
    Failed(String),
}

/// Owns the listening sockets, at most one per local port.
///
/// Listeners live as long as the registry; rules that share a port share
/// the socket. The first bind attempt decides the port for every rule.
#[derive(Debug)]
pub struct ListenerRegistry {
    listen_host: IpAddr,
    ports: Mutex<HashMap<u16, PortState>>,
}

impl ListenerRegistry {
    pub fn new(listen_host: IpAddr) -> Self {
        Self {
            listen_host,
            ports: Mutex::new(HashMap::new()),
        }
    }

    /// Bind a listener for `port` unless the port was already tried.
    ///
    /// The lock is held across the bind so concurrent callers for the same
    /// port all get the same socket, or the same bind error.
    pub async fn ensure_listener(&self, port: u16) -> Result<Arc<TcpListener>> {
        let mut ports = self.ports.lock().await;

        match ports.get(&port) {
            Some(PortState::Bound(listener)) => {
                debug!("Reusing listener for port {}", port);
                return Ok(Arc::clone(listener));
            }
            Some(PortState::Failed(reason)) => {
                return Err(anyhow!("port {} is unavailable: {}", port, reason));
            }
            None => {}
        }

        let bind_addr = SocketAddr::new(self.listen_host, port);
        let listener = match TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind listener on {}", bind_addr))
        {
            Ok(listener) => listener,
            Err(e) => {
                ports.insert(port, PortState::Failed(format!("{:#}", e)));
                return Err(e);
            }
        };

        match listener.local_addr() {
            Ok(addr) => info!("Listening on {}", addr),
            Err(_) => info!("Listening on {}", bind_addr),
        }

        let listener = Arc::new(listener);
        ports.insert(port, PortState::Bound(Arc::clone(&listener)));
        Ok(listener)
    }

    /// Listener registered for `port`, if any
    pub async fn get(&self, port: u16) -> Option<Arc<TcpListener>> {
        match self.ports.lock().await.get(&port) {
            Some(PortState::Bound(listener)) => Some(Arc::clone(listener)),
            _ => None,
        }
    }

    /// Actual bound address of the listener for `port`
    pub async fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.get(port)
            .await
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Ports with a live listener, in ascending order
    pub async fn ports(&self) -> Vec<u16> {
        self.collect_ports(|state| matches!(state, PortState::Bound(_)))
            .await
    }

    /// Ports whose bind failed, in ascending order
    pub async fn failed_ports(&self) -> Vec<u16> {
        self.collect_ports(|state| matches!(state, PortState::Failed(_)))
            .await
    }

    async fn collect_ports<F>(&self, filter: F) -> Vec<u16>
    where
        F: Fn(&PortState) -> bool,
    {
        let mut ports: Vec<u16> = self
            .ports
            .lock()
            .await
            .iter()
            .filter(|(_, state)| filter(state))
            .map(|(port, _)| *port)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Number of live listeners
    pub async fn len(&self) -> usize {
        self.ports().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let registry = ListenerRegistry::new(localhost());
        assert!(registry.is_empty().await);

        let first = registry.ensure_listener(0).await.unwrap();
        let second = registry.ensure_listener(0).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.ports().await, vec![0]);
        assert_eq!(
            registry.local_addr(0).await,
            Some(first.local_addr().unwrap())
        );
    }

    #[tokio::test]
    async fn test_concurrent_registration_binds_once() {
        let registry = Arc::new(ListenerRegistry::new(localhost()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.ensure_listener(0).await.unwrap()
            }));
        }

        let mut listeners = Vec::new();
        for task in tasks {
            listeners.push(task.await.unwrap());
        }

        assert_eq!(registry.len().await, 1);
        assert!(listeners.iter().all(|l| Arc::ptr_eq(l, &listeners[0])));
    }

    #[tokio::test]
    async fn test_bind_failure_is_not_registered() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let registry = ListenerRegistry::new(localhost());
        assert!(registry.ensure_listener(port).await.is_err());
        assert!(registry.get(port).await.is_none());
        assert!(registry.is_empty().await);
        assert_eq!(registry.failed_ports().await, vec![port]);
    }

    #[tokio::test]
    async fn test_failed_port_stays_failed_after_it_frees_up() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let registry = ListenerRegistry::new(localhost());
        assert!(registry.ensure_listener(port).await.is_err());

        drop(taken);

        let err = registry.ensure_listener(port).await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));
        assert!(registry.get(port).await.is_none());
        assert_eq!(registry.failed_ports().await, vec![port]);
    }

    #[tokio::test]
    async fn test_distinct_ports_get_distinct_listeners() {
        let a = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let b = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port_a = a.local_addr().unwrap().port();
        let port_b = b.local_addr().unwrap().port();
        drop(a);
        drop(b);

        let registry = ListenerRegistry::new(localhost());
        registry.ensure_listener(port_a).await.unwrap();
        registry.ensure_listener(port_b).await.unwrap();
        registry.ensure_listener(port_a).await.unwrap();

        assert_eq!(registry.len().await, 2);
        let mut expected = vec![port_a, port_b];
        expected.sort_unstable();
        assert_eq!(registry.ports().await, expected);
    }
}

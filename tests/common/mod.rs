//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tcpfwd::{ConnectionManager, ForwarderHandle, ForwardingRule, Settings};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Settings for tests: loopback only, no log files
pub fn test_settings() -> Settings {
    Settings {
        listen_host: "127.0.0.1".to_string(),
        buffer_size: 4096,
        log_level: "debug".to_string(),
        log_dir: PathBuf::from("logs"),
        log_to_file: false,
    }
}

/// Get a free port, so we can run multiple tests
pub fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Echo server that writes `tag` once per connection, then echoes until EOF
pub async fn spawn_tagged_echo_server(tag: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            tokio::spawn(async move {
                if stream.write_all(tag).await.is_err() {
                    return;
                }
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Plain echo server
pub async fn spawn_echo_server() -> SocketAddr {
    spawn_tagged_echo_server(b"").await
}

/// Server that reports everything it received once the peer closes
pub async fn spawn_recording_server() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let _ = stream.read_to_end(&mut received).await;
                let _ = tx.send(received);
            });
        }
    });

    (addr, rx)
}

/// Start a forwarder for `rules` on loopback
pub async fn start_forwarder(rules: Vec<ForwardingRule>) -> (ConnectionManager, ForwarderHandle) {
    let manager = ConnectionManager::new(&test_settings(), rules).unwrap();
    let handle = manager.start().await;
    (manager, handle)
}

/// Connect to the forwarder listener registered for `port`
pub async fn connect_to_forwarder(manager: &ConnectionManager, port: u16) -> TcpStream {
    let addr = manager
        .registry()
        .local_addr(port)
        .await
        .expect("no listener registered for port");
    tokio::time::timeout(Duration::from_secs(2), TcpStream::connect(addr))
        .await
        .expect("connect timed out")
        .unwrap()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use wsfs::config::ServerConfig;
use wsfs::http::{HttpServer, ServerError};
use wsfs::lifecycle::Shutdown;
use wsfs::net::AddressFamily;

/// A server running in the background on ephemeral loopback ports.
pub struct TestServer {
    pub server: HttpServer,
    pub shutdown: Shutdown,
    pub root: TempDir,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Address of `family`'s listener, waiting up to two seconds for it.
    pub async fn addr(&self, family: AddressFamily) -> SocketAddr {
        for _ in 0..400 {
            if let Some(addr) = self.server.local_addr(family) {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} listener never came up", family);
    }

    /// Stop the server and return what `run` returned.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        self.task.await.expect("server task panicked")
    }
}

/// Document root with a few fixed files.
pub fn document_root() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "<h1>wsfs</h1>\n").unwrap();
    std::fs::write(root.path().join("hello.txt"), "hello, world\n").unwrap();
    root
}

/// Loopback-only IPv4 config with the cache on and short timeouts.
pub fn test_config(root: &TempDir) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listeners.ipv4.address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.listeners.ipv4.port = 0;
    config.listeners.ipv6.enabled = false;
    config.timeouts.idle_read_secs = 1;
    config.timeouts.write_secs = 2;
    config.target = root.path().to_path_buf();
    config
}

/// Start a server; `configure` may adjust the default test config.
pub async fn start_server(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let root = document_root();
    let mut config = test_config(&root);
    configure(&mut config);

    let server = HttpServer::new(Arc::new(config));
    let shutdown = Shutdown::new();
    let task = {
        let server = server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(&shutdown).await })
    };

    TestServer {
        server,
        shutdown,
        root,
        task,
    }
}

/// Send raw bytes and read until the server closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("response timed out")
        .unwrap();
    response
}

/// `GET target` over HTTP/1.1.
pub async fn get(addr: SocketAddr, target: &str) -> Vec<u8> {
    let request = format!("GET {} HTTP/1.1\r\nHost: test\r\n\r\n", target);
    send_raw(addr, request.as_bytes()).await
}

/// Status line of a raw response.
pub fn status_line(response: &[u8]) -> String {
    let text = String::from_utf8_lossy(response);
    text.lines().next().unwrap_or_default().to_string()
}

/// Body of a raw response (everything after the blank line).
pub fn body(response: &[u8]) -> &[u8] {
    response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| &response[idx + 4..])
        .unwrap_or_default()
}

/// Whether this host can bind IPv6 loopback at all.
pub fn ipv6_available() -> bool {
    std::net::TcpListener::bind("[::1]:0").is_ok()
}

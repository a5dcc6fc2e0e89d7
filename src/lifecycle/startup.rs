//! Startup orchestration.
//!
//! # Responsibilities
//! - Wire signal handling to the shutdown coordinator
//! - Start the server's listeners and wait for them to end
//! - Drain in-flight connections before returning
//!
//! # Design Decisions
//! - Configuration arrives fully built and validated; nothing here reads
//!   flags or files
//! - The drain is bounded by the idle and write timeouts, the longest a
//!   well-behaved connection can still take

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::http::server::{HttpServer, ServerError};
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;

/// Run the server for `config` until a stop signal arrives or every
/// listener has ended.
pub async fn run(config: Arc<ServerConfig>) -> Result<(), ServerError> {
    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());
    let result = run_until(config, &shutdown).await;
    signals.abort();
    result
}

/// Like [`run`], with the shutdown trigger supplied by the caller.
pub async fn run_until(config: Arc<ServerConfig>, shutdown: &Shutdown) -> Result<(), ServerError> {
    tracing::info!(
        target_dir = %config.target.display(),
        ipv4 = config.listeners.ipv4.enabled,
        ipv6 = config.listeners.ipv6.enabled,
        cache = config.cache.enabled,
        "wsfs {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let server = HttpServer::new(Arc::clone(&config));
    let result = server.run(shutdown).await;

    let limit = config.timeouts.idle_read() + config.timeouts.write();
    if !server.tracker().drain(limit).await {
        tracing::warn!(
            remaining = server.tracker().active_count(),
            "Connections still open after drain deadline"
        );
    }

    tracing::info!("Shutdown complete");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    #[tokio::test]
    async fn stops_when_triggered() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.listeners.ipv4.address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.listeners.ipv4.port = 0;
        config.listeners.ipv6.enabled = false;
        config.target = dir.path().to_path_buf();

        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_until(Arc::new(config), &shutdown),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
    }
}

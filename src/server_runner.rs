//! Server startup and accept loop
//!
//! Binds the loopback listener and serves until interrupted. Every
//! accepted connection becomes an independent session task; a crashed or
//! stalled session never blocks acceptance of new ones.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

use crate::config::{CliArgs, ConnConfig, Endpoint};
use crate::core::{session, SessionManager};
use crate::logger::log;

/// TCP keepalive interval. Dead peers are detected in ~45s (3 probes x 15s).
const TCP_KEEPALIVE_SECS: u64 = 15;

/// Shared state for the accept loop
pub struct Relay {
    /// The endpoint triple this instance serves
    pub endpoint: Endpoint,
    /// Connection performance configuration
    pub conn_config: ConnConfig,
    /// Active session tracking
    pub sessions: SessionManager,
}

impl Relay {
    pub fn new(endpoint: Endpoint, conn_config: ConnConfig) -> Self {
        Self {
            endpoint,
            conn_config,
            sessions: SessionManager::new(),
        }
    }
}

/// Bind the loopback listener with SO_REUSEADDR for fast restarts.
pub fn bind_listener(local_port: u16, backlog: i32) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    // Allow immediate rebind after restart (skip TIME_WAIT)
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(TcpListener::from_std(socket.into())?)
}

/// Build the relay state and serve until Ctrl-C.
pub async fn run(cli: CliArgs) -> Result<()> {
    let relay = Arc::new(Relay::new(cli.endpoint(), ConnConfig::from_cli(&cli)));
    let listener = bind_listener(relay.endpoint.local_port, relay.conn_config.tcp_backlog)?;
    serve(relay, listener).await
}

/// Run the accept loop on an already-bound listener.
///
/// Must run inside a `LocalSet`: sessions hold Lua handler state and are
/// spawned as local tasks.
pub async fn serve(relay: Arc<Relay>, listener: TcpListener) -> Result<()> {
    let local_addr = listener.local_addr()?;
    log::info!(
        address = %local_addr,
        endpoint = %relay.endpoint,
        plugin_dir = %relay.conn_config.plugin_dir.display(),
        "Relay started"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let peer_addr = peer.to_string();
                        log::connection(&peer_addr, "new");
                        tune_stream(&stream, &relay.conn_config);

                        let relay = Arc::clone(&relay);
                        tokio::task::spawn_local(async move {
                            session::handle(relay, stream, peer_addr.clone()).await;
                            log::connection(&peer_addr, "closed");
                        });
                    }
                    Err(e) => {
                        log::error!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = &mut shutdown => {
                let signalled = relay.sessions.shutdown_all();
                log::info!(sessions = signalled, "Shutdown signal received, stopping");
                break;
            }
        }
    }

    Ok(())
}

/// Apply latency and keepalive socket options.
pub(crate) fn tune_stream(stream: &TcpStream, config: &ConnConfig) {
    if config.tcp_nodelay {
        let _ = stream.set_nodelay(true);
    }

    // Detect dead peers even when a pipe is parked in a blocking read
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(TCP_KEEPALIVE_SECS))
        .with_interval(Duration::from_secs(TCP_KEEPALIVE_SECS));
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener(0, 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(addr.ip(), std::net::IpAddr::from(Ipv4Addr::LOCALHOST));
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_listener_rejects_taken_port() {
        let first = bind_listener(0, 16).unwrap();
        let port = first.local_addr().unwrap().port();
        assert!(bind_listener(port, 16).is_err());
    }

    #[test]
    fn test_tcp_keepalive_interval() {
        // 3 probes × 15s interval = ~45s detection time
        let detection_time = TCP_KEEPALIVE_SECS * 3;
        assert!(
            detection_time <= 60,
            "keepalive detection should be under 60s"
        );
    }
}

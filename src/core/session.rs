//! Session handling
//!
//! A session is one accepted local connection plus its paired remote
//! connection and the two Pipes bridging them. Sessions are fully
//! independent: every error here is logged and absorbed so the accept
//! loop keeps serving other connections.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnConfig, Endpoint};
use crate::core::hooks::Direction;
use crate::core::pipe::Pipe;
use crate::core::sessions::SessionId;
use crate::error::{Result, TaplineError};
use crate::logger::log;
use crate::plugin::PluginHandler;
use crate::server_runner::{tune_stream, Relay};

/// Handle one accepted connection end to end.
pub async fn handle(relay: Arc<Relay>, client: TcpStream, peer_addr: String) {
    let (id, close) = relay.sessions.register(peer_addr.clone());

    // Unregister on every path out of this session
    let sessions = relay.sessions.clone();
    let _guard = scopeguard::guard((), move |_| {
        sessions.unregister(id);
    });

    if let Err(e) = run(&relay, client, &peer_addr, id, close).await {
        log::warn!(
            session = id,
            peer = %peer_addr,
            endpoint = %relay.endpoint,
            error = %e,
            "Session aborted"
        );
    }
}

/// Open the remote connection, build both handlers, and bridge until both
/// Pipes have terminated. Both sockets are released on every exit path.
async fn run(
    relay: &Relay,
    client: TcpStream,
    peer_addr: &str,
    id: SessionId,
    close: CancellationToken,
) -> Result<()> {
    let remote = connect_remote(&relay.endpoint, &relay.conn_config).await?;
    tune_stream(&remote, &relay.conn_config);

    // Handler load or validation failure aborts the session here, before
    // any bridging begins
    let bundle = relay
        .conn_config
        .plugin_dir
        .join(relay.endpoint.plugin_base());
    let outbound_handler = PluginHandler::open(bundle.join(Direction::ClientToServer.script_name()))?;
    let inbound_handler = PluginHandler::open(bundle.join(Direction::ServerToClient.script_name()))?;

    log::debug!(
        session = id,
        peer = %peer_addr,
        endpoint = %relay.endpoint,
        "Session bridging"
    );

    let (client_read, client_write) = client.into_split();
    let (remote_read, remote_write) = remote.into_split();

    let outbound = Pipe::new(
        id,
        Direction::ClientToServer,
        client_read,
        remote_write,
        outbound_handler,
        close.clone(),
    );
    let inbound = Pipe::new(
        id,
        Direction::ServerToClient,
        remote_read,
        client_write,
        inbound_handler,
        close,
    );

    let (up, down) = tokio::join!(outbound.run(), inbound.run());

    log::info!(
        session = id,
        peer = %peer_addr,
        up = up,
        down = down,
        "Session finished"
    );
    Ok(())
}

async fn connect_remote(endpoint: &Endpoint, config: &ConnConfig) -> Result<TcpStream> {
    match tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect((endpoint.remote_address.as_str(), endpoint.remote_port)),
    )
    .await
    {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TaplineError::Transport(format!(
            "connect to {}:{} failed: {}",
            endpoint.remote_address, endpoint.remote_port, e
        ))),
        Err(_) => Err(TaplineError::Transport(format!(
            "connect to {}:{} timed out",
            endpoint.remote_address, endpoint.remote_port
        ))),
    }
}

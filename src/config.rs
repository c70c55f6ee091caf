//! Configuration module for the relay
//!
//! Handles CLI argument parsing with environment variable support. The
//! required configuration is the endpoint triple: the loopback port to
//! listen on and the fixed remote endpoint to bridge to.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    // Try parsing as humantime duration first (e.g., "60s", "2m", "1h30m")
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    // Fall back to parsing as plain seconds for backwards compatibility
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

/// CLI arguments for the relay
///
/// Supports environment variables with TAPLINE_ prefix
#[derive(Parser, Debug, Clone)]
#[command(author, version)]
#[command(about = "Transparent loopback TCP relay with hot-reloadable Lua packet handlers")]
#[command(override_usage = "tapline <LOCAL_PORT> <REMOTE_ADDRESS> <REMOTE_PORT>")]
pub struct CliArgs {
    /// Loopback port to listen on
    pub local_port: u16,

    /// Remote address to bridge every accepted connection to
    pub remote_address: String,

    /// Remote port to bridge every accepted connection to
    pub remote_port: u16,

    /// Directory containing handler script bundles
    /// (one "<local_port>-<remote_address>-<remote_port>" directory per endpoint)
    #[arg(long, env = "TAPLINE_PLUGIN_DIR", default_value = "plugins")]
    pub plugin_dir: PathBuf,

    /// Log mode: trace, debug, info, warn, error (default: info)
    #[arg(long, env = "TAPLINE_LOG_MODE", default_value = "info")]
    pub log_mode: String,

    /// TCP connect timeout to the remote endpoint (default: 5s)
    #[arg(long, env = "TAPLINE_CONNECT_TIMEOUT", default_value = "5s", value_parser = parse_duration, help_heading = "Performance")]
    pub connect_timeout: Duration,

    /// TCP listen backlog for pending connections (default: 1024)
    #[arg(
        long,
        env = "TAPLINE_TCP_BACKLOG",
        default_value_t = 1024,
        help_heading = "Performance"
    )]
    pub tcp_backlog: i32,

    /// Enable TCP_NODELAY for lower latency (default: true)
    #[arg(
        long,
        env = "TAPLINE_TCP_NODELAY",
        default_value_t = true,
        help_heading = "Performance"
    )]
    pub tcp_nodelay: bool,
}

impl CliArgs {
    /// The endpoint triple this relay instance serves.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            local_port: self.local_port,
            remote_address: self.remote_address.clone(),
            remote_port: self.remote_port,
        }
    }
}

/// The relay's fixed endpoint triple: every session accepted on
/// `local_port` is bridged to `remote_address:remote_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
}

impl Endpoint {
    /// Handler bundle name for this endpoint, e.g. "7777-localhost-25565".
    /// The bundle directory holds `cl.lua` and `sv.lua`.
    pub fn plugin_base(&self) -> String {
        format!(
            "{}-{}-{}",
            self.local_port, self.remote_address, self.remote_port
        )
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}:{}",
            self.local_port, self.remote_address, self.remote_port
        )
    }
}

/// Connection performance configuration handed to the runner
#[derive(Debug, Clone)]
pub struct ConnConfig {
    pub plugin_dir: PathBuf,
    pub connect_timeout: Duration,
    pub tcp_backlog: i32,
    pub tcp_nodelay: bool,
}

impl ConnConfig {
    /// Build connection config from CLI args
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self {
            plugin_dir: cli.plugin_dir.clone(),
            connect_timeout: cli.connect_timeout,
            tcp_backlog: cli.tcp_backlog,
            tcp_nodelay: cli.tcp_nodelay,
        }
    }
}

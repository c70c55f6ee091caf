//! Hook traits for extensibility
//!
//! Defines the seam between the bridging engine and the packet handlers
//! injected into it.

use bytes::Bytes;

use crate::error::Result;

/// A packet handler sits inside one direction of a session and sees every
/// chunk that crosses it.
///
/// Synchronous by design: transform and chunk-size queries run to
/// completion without yielding, so a handler swap can never race with an
/// in-flight call. The suspension points of a Pipe are exactly its stream
/// read and write.
pub trait PacketHandler {
    /// Preferred read size for the next chunk, queried before every read.
    /// May change between calls; callers must not assume a constant.
    fn chunk_size(&mut self) -> Result<usize>;

    /// Inspect or rewrite one chunk. `None` means forward the original
    /// bytes unchanged; `Some(bytes)` replaces them (empty drops the chunk).
    fn transform(&mut self, chunk: &[u8]) -> Result<Option<Bytes>>;
}

/// Direction of byte flow within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to remote server
    ClientToServer,
    /// Remote server back to client
    ServerToClient,
}

impl Direction {
    /// Handler script name for this direction within an endpoint bundle.
    pub fn script_name(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "cl.lua",
            Direction::ServerToClient => "sv.lua",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToServer => write!(f, "client->server"),
            Direction::ServerToClient => write!(f, "server->client"),
        }
    }
}

//! One direction of a session
//!
//! A Pipe reads chunks from its source, passes them through its packet
//! handler, and writes the result to its sink. Shutdown is cooperative:
//! the shared close signal is checked between iterations, never during an
//! in-flight read or write.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::hooks::{Direction, PacketHandler};
use crate::core::sessions::SessionId;
use crate::logger::log;

/// One direction of byte flow within a session
pub struct Pipe<R, W, H> {
    session: SessionId,
    direction: Direction,
    source: R,
    sink: W,
    handler: H,
    close: CancellationToken,
}

impl<R, W, H> Pipe<R, W, H>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: PacketHandler,
{
    pub fn new(
        session: SessionId,
        direction: Direction,
        source: R,
        sink: W,
        handler: H,
        close: CancellationToken,
    ) -> Self {
        Self {
            session,
            direction,
            source,
            sink,
            handler,
            close,
        }
    }

    /// Run the bridge loop until end-of-stream, an error, or the close
    /// signal. Every termination raises the shared close signal so the
    /// sibling Pipe stops at its next check. Errors are logged here with
    /// directional context and never propagate to the accept loop.
    ///
    /// Returns the number of bytes forwarded to the sink.
    pub async fn run(mut self) -> u64 {
        let mut buf = Vec::new();
        let mut forwarded: u64 = 0;

        loop {
            if self.close.is_cancelled() {
                log::debug!(
                    session = self.session,
                    direction = %self.direction,
                    "Close signal observed, stopping"
                );
                break;
            }

            // The preferred size may change after a handler reload
            let size = match self.handler.chunk_size() {
                Ok(size) => size,
                Err(e) => {
                    log::warn!(
                        session = self.session,
                        direction = %self.direction,
                        error = %e,
                        "Handler chunk size query failed, terminating pipe"
                    );
                    break;
                }
            };
            buf.resize(size, 0);

            let n = match self.source.read(&mut buf).await {
                Ok(0) => {
                    log::debug!(
                        session = self.session,
                        direction = %self.direction,
                        "End of stream"
                    );
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    log::debug!(
                        session = self.session,
                        direction = %self.direction,
                        error = %e,
                        "Read error, terminating pipe"
                    );
                    break;
                }
            };

            let output = match self.handler.transform(&buf[..n]) {
                Ok(output) => output,
                Err(e) => {
                    let opcode_hex = format!("0x{:02X}", buf[0]);
                    log::warn!(
                        session = self.session,
                        direction = %self.direction,
                        opcode = %opcode_hex,
                        error = %e,
                        "Handler transform failed, terminating pipe"
                    );
                    break;
                }
            };

            // No output means forward the original chunk unchanged
            let bytes: &[u8] = output.as_deref().unwrap_or(&buf[..n]);
            if let Err(e) = self.sink.write_all(bytes).await {
                log::debug!(
                    session = self.session,
                    direction = %self.direction,
                    error = %e,
                    "Write error, terminating pipe"
                );
                break;
            }
            forwarded += bytes.len() as u64;
        }

        // First failure wins; cancelling an already-cancelled token is a no-op
        self.close.cancel();
        let _ = self.sink.shutdown().await;
        forwarded
    }
}

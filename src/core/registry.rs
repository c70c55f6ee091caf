//! Opcode dispatch
//!
//! Maps the first byte of a chunk to a handler function. The registry is
//! built once per handler module load from an ordered list of
//! (opcode, handler) pairs and is paired with exactly one fallback for
//! unmapped opcodes.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{Result, TaplineError};
use crate::logger::log;

/// Handler for a registered opcode. Receives the payload (the chunk minus
/// its opcode byte); `None` means the caller forwards the original chunk
/// unchanged.
pub type HandlerFn = Box<dyn Fn(&[u8]) -> Result<Option<Bytes>>>;

/// Handler for unmapped opcodes. Receives the opcode and the payload.
pub type FallbackFn = Box<dyn Fn(u8, &[u8]) -> Result<Option<Bytes>>>;

/// Opcode-keyed dispatch table with a single fallback
pub struct HandlerRegistry {
    entries: HashMap<u8, HandlerFn>,
    fallback: FallbackFn,
}

impl HandlerRegistry {
    /// Build a registry from an ordered list of (opcode, handler) pairs.
    ///
    /// Opcodes are unique per module; registering the same opcode twice is
    /// a validation error.
    pub fn new(pairs: Vec<(u8, HandlerFn)>, fallback: FallbackFn) -> Result<Self> {
        let mut entries = HashMap::with_capacity(pairs.len());
        for (opcode, handler) in pairs {
            if entries.insert(opcode, handler).is_some() {
                return Err(TaplineError::PluginValidation(format!(
                    "duplicate handler for opcode 0x{:02X}",
                    opcode
                )));
            }
        }
        Ok(Self { entries, fallback })
    }

    /// Build a registry whose fallback logs the opcode with a hex dump of
    /// the payload and forwards the chunk unchanged.
    pub fn with_default_fallback(pairs: Vec<(u8, HandlerFn)>) -> Result<Self> {
        Self::new(
            pairs,
            Box::new(|opcode, payload| {
                let opcode_hex = format!("0x{:02X}", opcode);
                log::debug!(
                    opcode = %opcode_hex,
                    payload = %hex_dump(payload),
                    "Unhandled opcode"
                );
                Ok(None)
            }),
        )
    }

    /// Dispatch one chunk: the first byte selects the handler, the rest is
    /// the payload. Unmapped opcodes go to the fallback. `None` means the
    /// caller forwards the original chunk, opcode byte included, unchanged.
    ///
    /// # Panics
    ///
    /// Panics on an empty chunk; callers must never dispatch empty input.
    pub fn dispatch(&self, chunk: &[u8]) -> Result<Option<Bytes>> {
        assert!(!chunk.is_empty(), "dispatch requires a non-empty chunk");
        let opcode = chunk[0];
        let payload = &chunk[1..];
        match self.entries.get(&opcode) {
            Some(handler) => handler(payload),
            None => (self.fallback)(opcode, payload),
        }
    }

    /// Number of registered opcodes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no opcode is registered (every chunk goes to the fallback)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut opcodes: Vec<u8> = self.entries.keys().copied().collect();
        opcodes.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("opcodes", &opcodes)
            .finish_non_exhaustive()
    }
}

/// Uppercase space-separated hex dump, e.g. "DE AD BE EF"
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

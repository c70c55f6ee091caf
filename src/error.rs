use std::io;
use thiserror::Error;

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum TaplineError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Handler module could not be read or executed
    #[error("Plugin load error: {0}")]
    PluginLoad(String),

    /// Handler module is missing part of the required API surface
    #[error("Plugin validation error: {0}")]
    PluginValidation(String),

    /// Error raised inside a handler script
    #[error("Script error: {0}")]
    Script(#[from] mlua::Error),

    /// Network connection error
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TaplineError>;

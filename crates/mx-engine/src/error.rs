//! Error types for mx-engine

use mx_control::ControlError;
use mx_core::{CoreError, ModuleId, PortRef};
use mx_plugin::PluginError;
use thiserror::Error;

/// Graph and server errors. Never produced on the real-time path.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Connection would feed a module from itself or from a later module
    #[error("Connection {from:?} -> {to:?} would create a feedback edge")]
    CyclicTopology { from: PortRef, to: PortRef },

    #[error("No such module: {0}")]
    NoSuchModule(ModuleId),

    #[error("No such port: {0:?}")]
    NoSuchPort(PortRef),

    #[error("Ports must connect an output to an input")]
    DirectionMismatch,

    #[error("Ports carry different kinds of data")]
    KindMismatch,

    #[error("No such chain: {0}")]
    NoSuchChain(String),

    #[error("Chain already exists: {0}")]
    DuplicateChain(String),

    #[error("Audio server error: {0}")]
    Server(String),

    #[error("Port is not connected: {0:?}")]
    NotConnected(PortRef),

    #[error("Module {0} is not a controller")]
    NotAController(ModuleId),

    #[error("No control input at {0}")]
    NoSuchPath(String),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;

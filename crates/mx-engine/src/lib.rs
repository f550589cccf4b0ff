//! MX mixer engine
//!
//! The signal graph and everything that runs it:
//! - `Group`: one audio-server client; try-locks its chains every cycle
//! - `Chain`: ordered controls ++ modules, forward-only connections
//! - `Module`: ports plus a closed `Backend` (built-in or hosted plugin)
//! - `Mixer`: groups, OSC path addressing, learn and translations
//! - `ControlSurface`: OSC listener feeding the mixer
//! - `project`: two-pass save/restore of the whole graph
//!
//! # Threads
//!
//! ```text
//! server RT thread ──► Group::process ──try_lock──► Chain::process ──► Module::process
//! UI thread ─────────► Group::lock (blocking) ──► structural changes
//! OSC listener ──────► crossbeam channel ──► ControlSurface::drain (UI thread)
//! ```

pub mod builtin;
pub mod chain;
pub mod control_surface;
mod error;
pub mod group;
pub mod mixer;
pub mod module;
pub mod project;
pub mod server;
pub mod smoother;

pub use builtin::{BuiltIn, ControlMode};
pub use chain::Chain;
pub use control_surface::ControlSurface;
pub use error::{EngineError, EngineResult};
pub use group::Group;
pub use mixer::Mixer;
pub use module::{Backend, Module, ModuleContext, ServerBinding};
pub use project::{ChainRecord, ConnectionRecord, GroupRecord, LogEntry, ModuleRecord, ProjectFile, RestoreError, RestoreReport};
pub use server::{MemoryIo, MemoryServer, NullIo, ServerClient, ServerIo, ServerPortId};
pub use smoother::ParamSmoother;

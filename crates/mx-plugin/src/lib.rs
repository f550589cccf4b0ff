//! Module backends and plugin hosting
//!
//! Every processing unit in a chain is driven through one contract,
//! [`ModuleBackend`]. Built-in modules implement it directly; plugins are
//! hosted through per-format adapters that implement it on top of a
//! format-neutral [`NativeInstance`]:
//! - LADSPA (port index ids, per-channel replication, real C ABI via libloading)
//! - LV2 (symbol ids, worker extension over a lock-free ring)
//! - VST2 (index ids, chunk state, `canDo("bypass")`)
//! - VST3 (sparse ParamIDs, read-only params as read-back outputs)
//! - CLAP (sparse clap_ids, state extension)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Module (mx-engine)                                              │
//! │    └── ModuleBackend ─┬── built-ins                              │
//! │                       └── LadspaPlugin / Lv2Plugin / Vst2Plugin  │
//! │                           Vst3Plugin / ClapPlugin                │
//! │                              └── HostedPlugin (ParamMap, ports)  │
//! │                                     └── Box<dyn NativeInstance>  │
//! │                                                                  │
//! │  PluginResolver ─┬── PluginRegistry (in-process factories)       │
//! │                  └── DynamicLoader (libloading + format bridges) │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use mx_core::{Cycle, Port, PortLayout};
use thiserror::Error;

pub mod clap;
pub mod hosted;
pub mod ladspa;
mod ladspa_sys;
pub mod loader;
pub mod lv2;
pub mod native;
pub mod params;
pub mod registry;
pub mod scanner;
#[cfg(test)]
mod test_support;
pub mod vst2;
pub mod vst3;

pub use clap::ClapPlugin;
pub use hosted::HostedPlugin;
pub use ladspa::LadspaPlugin;
pub use loader::DynamicLoader;
pub use lv2::Lv2Plugin;
pub use native::{NativeDescriptor, NativeInstance, NativeParam, NativeParamId, WorkMessage, Worker};
pub use params::ParamMap;
pub use registry::{InstanceFactory, PluginRegistry, PluginResolver};
pub use scanner::{PluginCategory, PluginFormat, PluginInfo, PluginScanner};
pub use vst2::Vst2Plugin;
pub use vst3::Vst3Plugin;

/// Plugin hosting errors
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Failed to load plugin: {0}")]
    LoadFailed(String),

    #[error("Plugin format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("Missing entry symbol `{symbol}` in {path}")]
    MissingSymbol { symbol: String, path: String },

    #[error("Incompatible plugin ABI: {0}")]
    AbiMismatch(String),

    #[error("Plugin initialization failed: {0}")]
    InitFailed(String),

    #[error("Unsupported channel configuration: {0}")]
    Arity(String),

    #[error("State error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Where the module is in its plugin lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleState {
    #[default]
    Unloaded,
    Loading,
    Active,
    Bypassed,
    Unloading,
}

impl ModuleState {
    /// States in which `process` does real work
    #[inline]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Active | Self::Bypassed)
    }
}

/// Contract every module backend satisfies.
///
/// Only [`process`](ModuleBackend::process) runs on the real-time thread: it
/// must finish in bounded time, never allocate, never take a lock the UI
/// thread can hold and never panic. Everything else is called from the UI
/// thread with the owning group's lock held.
pub trait ModuleBackend: Send {
    /// Display name
    fn name(&self) -> &str;

    /// Port list for a freshly constructed module
    fn create_ports(&mut self) -> Vec<Port>;

    /// Output count this backend would have with `n` audio inputs
    fn can_support_inputs(&self, n: usize) -> Option<usize>;

    /// Add or remove audio inputs (and dependent outputs). False when the
    /// arity is not supported; `ports` is then left unchanged.
    fn configure_inputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool;

    /// Outputs follow from the inputs for most backends, so only the
    /// current count is accepted by default.
    fn configure_outputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool {
        PortLayout::of(ports).audio_out.len() == n
    }

    /// Read inputs, write every output for `cycle.frames` frames
    fn process(&mut self, ports: &mut [Port], cycle: &Cycle);

    fn set_bypass(&mut self, bypass: bool);

    /// Pipeline delay in frames
    fn latency(&self) -> u32 {
        0
    }

    fn buffer_size_changed(&mut self, _frames: usize) {}

    fn sample_rate_changed(&mut self, _sample_rate: f32) {}

    /// Opaque state blob; lossless for every automatable parameter
    fn save_state(&self, _ports: &[Port]) -> PluginResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn restore_state(&mut self, _ports: &mut [Port], _data: &[u8]) -> PluginResult<()> {
        Ok(())
    }

    /// Native parameter id ⇄ port index map (hosted plugins only)
    fn param_map(&self) -> Option<&ParamMap> {
        None
    }
}

//! Built-in modules
//!
//! The modules every strip is assembled from. Each one implements
//! [`ModuleBackend`] directly; [`BuiltIn`] closes over them so a `Module`
//! can dispatch without boxing.

use mx_core::{Port, PortDirection, PortKind};
use mx_plugin::ModuleBackend;

mod audio_io;
mod controller;
mod gain;
mod meter;
mod mono_pan;

pub use audio_io::{AudioInputModule, AudioOutputModule};
pub use controller::{ControlMode, ControllerModule};
pub use gain::GainModule;
pub use meter::MeterModule;
pub use mono_pan::MonoPanModule;

pub enum BuiltIn {
    Gain(GainModule),
    MonoPan(MonoPanModule),
    Meter(MeterModule),
    Controller(ControllerModule),
    AudioInput(AudioInputModule),
    AudioOutput(AudioOutputModule),
}

impl BuiltIn {
    /// Stable name used in project files
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Gain(_) => "gain",
            Self::MonoPan(_) => "mono_pan",
            Self::Meter(_) => "meter",
            Self::Controller(_) => "controller",
            Self::AudioInput(_) => "audio_input",
            Self::AudioOutput(_) => "audio_output",
        }
    }

    pub fn get(&self) -> &dyn ModuleBackend {
        match self {
            Self::Gain(m) => m,
            Self::MonoPan(m) => m,
            Self::Meter(m) => m,
            Self::Controller(m) => m,
            Self::AudioInput(m) => m,
            Self::AudioOutput(m) => m,
        }
    }

    pub fn get_mut(&mut self) -> &mut dyn ModuleBackend {
        match self {
            Self::Gain(m) => m,
            Self::MonoPan(m) => m,
            Self::Meter(m) => m,
            Self::Controller(m) => m,
            Self::AudioInput(m) => m,
            Self::AudioOutput(m) => m,
        }
    }

    /// Server-side direction of `port` when it is backed by an audio server
    /// port, `None` when it only lives inside the graph.
    pub fn server_direction(&self, port: &Port) -> Option<PortDirection> {
        match self {
            Self::AudioInput(_) if port.is(PortDirection::Output, PortKind::Audio) => Some(PortDirection::Input),
            Self::AudioOutput(_) if port.is(PortDirection::Input, PortKind::Audio) => Some(PortDirection::Output),
            Self::Controller(_) if port.is(PortDirection::Input, PortKind::Audio) => Some(PortDirection::Input),
            _ => None,
        }
    }

    pub fn as_controller(&self) -> Option<&ControllerModule> {
        match self {
            Self::Controller(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_controller_mut(&mut self) -> Option<&mut ControllerModule> {
        match self {
            Self::Controller(c) => Some(c),
            _ => None,
        }
    }
}

// ─── Port list helpers ──────────────────────────────────────────────────────

/// `in-1..in-N` followed by `out-1..out-M`
pub(crate) fn audio_ports(inputs: usize, outputs: usize) -> Vec<Port> {
    let mut ports = Vec::with_capacity(inputs + outputs);
    for i in 0..inputs {
        ports.push(Port::audio_input(format!("in-{}", i + 1)));
    }
    for i in 0..outputs {
        ports.push(Port::audio_output(format!("out-{}", i + 1)));
    }
    ports
}

/// Copy control values from `old` into same-named control ports of `fresh`
pub(crate) fn carry_controls(old: &[Port], fresh: &mut [Port]) {
    for port in fresh.iter_mut().filter(|p| p.kind() == PortKind::Control) {
        if let Some(prev) = old
            .iter()
            .find(|o| o.kind() == PortKind::Control && o.direction() == port.direction() && o.name() == port.name())
        {
            port.set_control_value(prev.control_value());
        }
    }
}

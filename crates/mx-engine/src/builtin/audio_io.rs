//! Chain endpoints backed by audio server ports
//!
//! The chain copies server capture buffers into an `AudioInputModule`'s
//! outputs before it runs, and an `AudioOutputModule`'s inputs out to the
//! server after it runs. The modules themselves only own the port lists.

use mx_core::{channel_count_supported, Cycle, Port, PortLayout, MAX_CHANNELS};
use mx_plugin::ModuleBackend;

use super::audio_ports;

pub struct AudioInputModule {
    channels: usize,
}

impl AudioInputModule {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.clamp(1, MAX_CHANNELS),
        }
    }
}

impl ModuleBackend for AudioInputModule {
    fn name(&self) -> &str {
        "Audio Input"
    }

    fn create_ports(&mut self) -> Vec<Port> {
        audio_ports(0, self.channels)
    }

    fn can_support_inputs(&self, n: usize) -> Option<usize> {
        (n == 0).then_some(self.channels)
    }

    fn configure_inputs(&mut self, _ports: &mut Vec<Port>, n: usize) -> bool {
        n == 0
    }

    fn configure_outputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool {
        if !channel_count_supported(n) {
            return false;
        }
        *ports = audio_ports(0, n);
        self.channels = n;
        true
    }

    fn process(&mut self, _ports: &mut [Port], _cycle: &Cycle) {}

    fn set_bypass(&mut self, _bypass: bool) {}
}

pub struct AudioOutputModule {
    channels: usize,
}

impl AudioOutputModule {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.clamp(1, MAX_CHANNELS),
        }
    }
}

impl ModuleBackend for AudioOutputModule {
    fn name(&self) -> &str {
        "Audio Output"
    }

    fn create_ports(&mut self) -> Vec<Port> {
        audio_ports(self.channels, 0)
    }

    fn can_support_inputs(&self, n: usize) -> Option<usize> {
        channel_count_supported(n).then_some(0)
    }

    fn configure_inputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool {
        if !channel_count_supported(n) {
            return false;
        }
        *ports = audio_ports(n, 0);
        self.channels = n;
        true
    }

    fn configure_outputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool {
        n == 0 && PortLayout::of(ports).audio_out.is_empty()
    }

    fn process(&mut self, _ports: &mut [Port], _cycle: &Cycle) {}

    fn set_bypass(&mut self, _bypass: bool) {}
}

//! VST3 adapter
//!
//! ParamIDs are sparse 32-bit indices; read-only parameters become
//! read-back control outputs. A parameter flagged `kIsBypass` is hidden from
//! the port list and driven by `set_bypass`. Components without one are
//! silenced while bypassed.

use mx_core::{silence_outputs, Cycle, Port};
use std::sync::Arc;

use crate::hosted::{HostedPlugin, IdStyle};
use crate::params::ParamMap;
use crate::registry::PluginResolver;
use crate::scanner::PluginInfo;
use crate::{ModuleBackend, PluginResult};

pub struct Vst3Plugin {
    host: HostedPlugin,
    bypass: bool,
    has_bypass_param: bool,
}

impl Vst3Plugin {
    pub fn load(
        info: &PluginInfo,
        resolver: Arc<dyn PluginResolver>,
        sample_rate: f32,
        max_frames: usize,
    ) -> PluginResult<Self> {
        let host = HostedPlugin::load(info, resolver.as_ref(), IdStyle::Index, sample_rate, max_frames)?;
        let has_bypass_param = host.descriptor().bypass_param().is_some();
        Ok(Self {
            host,
            bypass: false,
            has_bypass_param,
        })
    }
}

impl ModuleBackend for Vst3Plugin {
    fn name(&self) -> &str {
        &self.host.descriptor().name
    }

    fn create_ports(&mut self) -> Vec<Port> {
        let d = self.host.descriptor();
        let (ins, outs) = (d.audio_inputs, d.audio_outputs);
        self.host.build_ports(ins, outs)
    }

    fn can_support_inputs(&self, n: usize) -> Option<usize> {
        self.host.fixed_arity(n)
    }

    fn configure_inputs(&mut self, _ports: &mut Vec<Port>, n: usize) -> bool {
        n == self.host.descriptor().audio_inputs
    }

    fn process(&mut self, ports: &mut [Port], cycle: &Cycle) {
        if self.bypass && !self.has_bypass_param {
            silence_outputs(ports);
            return;
        }
        self.host.run(ports, cycle);
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
        self.host.set_bypass_param(bypass);
    }

    fn latency(&self) -> u32 {
        self.host.latency()
    }

    fn buffer_size_changed(&mut self, frames: usize) {
        let sample_rate = self.host.sample_rate();
        self.host.reactivate(sample_rate, frames);
    }

    fn sample_rate_changed(&mut self, sample_rate: f32) {
        let frames = self.host.max_frames();
        self.host.reactivate(sample_rate, frames);
    }

    fn save_state(&self, ports: &[Port]) -> PluginResult<Vec<u8>> {
        self.host.save_state(ports, true)
    }

    fn restore_state(&mut self, ports: &mut [Port], data: &[u8]) -> PluginResult<()> {
        self.host.restore_state(ports, data)
    }

    fn param_map(&self) -> Option<&ParamMap> {
        Some(self.host.params())
    }
}

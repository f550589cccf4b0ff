//! LADSPA adapter
//!
//! Parameters are addressed by port index. A plugin with exactly one audio
//! input and one audio output is replicated once per channel, so a mono
//! filter can sit on a stereo chain. LADSPA has no state API: state is the
//! host-side parameter snapshot.

use mx_core::{channel_count_supported, passthrough_audio, Cycle, Port};
use std::sync::Arc;

use crate::hosted::{HostedPlugin, IdStyle};
use crate::params::ParamMap;
use crate::registry::PluginResolver;
use crate::scanner::PluginInfo;
use crate::{ModuleBackend, PluginResult};

pub struct LadspaPlugin {
    host: HostedPlugin,
    resolver: Arc<dyn PluginResolver>,
    bypass: bool,
}

impl LadspaPlugin {
    pub fn load(
        info: &PluginInfo,
        resolver: Arc<dyn PluginResolver>,
        sample_rate: f32,
        max_frames: usize,
    ) -> PluginResult<Self> {
        let host = HostedPlugin::load(info, resolver.as_ref(), IdStyle::Index, sample_rate, max_frames)?;
        Ok(Self {
            host,
            resolver,
            bypass: false,
        })
    }

    /// One-in/one-out plugins can be stacked per channel
    fn replicable(&self) -> bool {
        let d = self.host.descriptor();
        d.audio_inputs == 1 && d.audio_outputs == 1
    }

    pub fn instance_count(&self) -> usize {
        self.host.instance_count()
    }
}

impl ModuleBackend for LadspaPlugin {
    fn name(&self) -> &str {
        &self.host.descriptor().name
    }

    fn create_ports(&mut self) -> Vec<Port> {
        let d = self.host.descriptor();
        let (ins, outs) = (d.audio_inputs, d.audio_outputs);
        self.host.build_ports(ins, outs)
    }

    fn can_support_inputs(&self, n: usize) -> Option<usize> {
        if self.replicable() {
            channel_count_supported(n).then_some(n)
        } else {
            self.host.fixed_arity(n)
        }
    }

    fn configure_inputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool {
        if self.host.layout().audio_in.len() == n {
            return true;
        }
        if !self.replicable() || !channel_count_supported(n) {
            return false;
        }
        if let Err(e) = self.host.set_instance_count(n, self.resolver.as_ref()) {
            log::warn!("{}: cannot replicate to {} channels: {}", self.name(), n, e);
            return false;
        }
        self.host.rebuild_ports(ports, n, n);
        log::debug!("{}: running {} instances", self.name(), n);
        true
    }

    fn process(&mut self, ports: &mut [Port], cycle: &Cycle) {
        if self.bypass {
            passthrough_audio(ports, cycle.frames);
            return;
        }
        self.host.run(ports, cycle);
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    fn latency(&self) -> u32 {
        self.host.latency()
    }

    fn buffer_size_changed(&mut self, frames: usize) {
        let sample_rate = self.host.sample_rate();
        self.host.reactivate(sample_rate, frames);
    }

    // LADSPA binds the rate at instantiation
    fn sample_rate_changed(&mut self, sample_rate: f32) {
        if let Err(e) = self.host.reinstantiate(self.resolver.as_ref(), sample_rate) {
            log::error!("{}: re-instantiation at {} Hz failed: {}", self.name(), sample_rate, e);
        }
    }

    fn save_state(&self, ports: &[Port]) -> PluginResult<Vec<u8>> {
        self.host.save_state(ports, false)
    }

    fn restore_state(&mut self, ports: &mut [Port], data: &[u8]) -> PluginResult<()> {
        self.host.restore_state(ports, data)
    }

    fn param_map(&self) -> Option<&ParamMap> {
        Some(self.host.params())
    }
}

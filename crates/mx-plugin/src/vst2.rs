//! VST2 adapter
//!
//! Parameters are addressed by index, arity is fixed and state is the
//! plugin's chunk when it offers one. Bypass goes to the plugin itself when
//! it answers `canDo("bypass")`; otherwise the module outputs silence while
//! bypassed.

use mx_core::{silence_outputs, Cycle, Port};
use std::sync::Arc;

use crate::hosted::{HostedPlugin, IdStyle};
use crate::params::ParamMap;
use crate::registry::PluginResolver;
use crate::scanner::PluginInfo;
use crate::{ModuleBackend, PluginResult};

pub struct Vst2Plugin {
    host: HostedPlugin,
    bypass: bool,
    /// Plugin accepted the last bypass request natively
    native_bypass: bool,
}

impl Vst2Plugin {
    pub fn load(
        info: &PluginInfo,
        resolver: Arc<dyn PluginResolver>,
        sample_rate: f32,
        max_frames: usize,
    ) -> PluginResult<Self> {
        Ok(Self {
            host: HostedPlugin::load(info, resolver.as_ref(), IdStyle::Index, sample_rate, max_frames)?,
            bypass: false,
            native_bypass: false,
        })
    }
}

impl ModuleBackend for Vst2Plugin {
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
        if self.bypass && !self.native_bypass {
            silence_outputs(ports);
            return;
        }
        self.host.run(ports, cycle);
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
        self.native_bypass = self.host.primary_mut().set_native_bypass(bypass);
        if bypass && !self.native_bypass {
            log::debug!("{}: no native bypass, silencing instead", self.name());
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeParamId;
    use crate::scanner::PluginFormat;
    use crate::test_support::{fake_registry, fill, first_sample, sized, FakeSpec};
    use approx::assert_relative_eq;

    fn spec() -> FakeSpec {
        FakeSpec::gain(1, 2, NativeParamId::Index(0), NativeParamId::Index(1))
    }

    #[test]
    fn test_native_bypass_keeps_processing() {
        let (registry, tally, info) = fake_registry(
            PluginFormat::Vst2,
            FakeSpec {
                native_bypass: true,
                ..spec()
            },
        );
        let mut plugin = Vst2Plugin::load(&info, registry, 48000.0, 64).unwrap();
        let mut ports = sized(plugin.create_ports(), 8);
        fill(&mut ports, 0, 0.5);

        plugin.set_bypass(true);
        assert_eq!(tally.lock().native_bypass, Some(true));
        plugin.process(&mut ports, &Cycle::new(8, 48000.0));
        // The plugin decides what bypassed audio sounds like
        assert_relative_eq!(first_sample(&ports, 1), 0.5);
    }

    #[test]
    fn test_bypass_without_native_support_silences() {
        let (registry, tally, info) = fake_registry(PluginFormat::Vst2, spec());
        let mut plugin = Vst2Plugin::load(&info, registry, 48000.0, 64).unwrap();
        let mut ports = sized(plugin.create_ports(), 8);
        fill(&mut ports, 0, 0.5);
        fill(&mut ports, 1, 0.9);

        plugin.set_bypass(true);
        assert_eq!(tally.lock().native_bypass, None);
        plugin.process(&mut ports, &Cycle::new(8, 48000.0));
        assert_eq!(first_sample(&ports, 1), 0.0);
        assert_eq!(first_sample(&ports, 2), 0.0);

        plugin.set_bypass(false);
        plugin.process(&mut ports, &Cycle::new(8, 48000.0));
        assert_relative_eq!(first_sample(&ports, 2), 0.5);
    }

    #[test]
    fn test_chunk_state_round_trip() {
        let (registry, _tally, info) = fake_registry(
            PluginFormat::Vst2,
            FakeSpec {
                native_state: true,
                ..spec()
            },
        );
        let mut plugin = Vst2Plugin::load(&info, registry.clone(), 48000.0, 64).unwrap();
        let mut ports = sized(plugin.create_ports(), 8);
        let gain = plugin.param_map().unwrap().port_for(&NativeParamId::Index(0)).unwrap();
        ports[gain].set_control_value(0.8);
        plugin.process(&mut ports, &Cycle::new(8, 48000.0));
        let state = plugin.save_state(&ports).unwrap();

        let mut other = Vst2Plugin::load(&info, registry, 48000.0, 64).unwrap();
        let mut other_ports = other.create_ports();
        other.restore_state(&mut other_ports, &state).unwrap();
        assert_relative_eq!(other_ports[gain].control_value(), 0.8);
    }

    #[test]
    fn test_latency_reported() {
        let (registry, _tally, info) = fake_registry(
            PluginFormat::Vst2,
            FakeSpec {
                latency: 128,
                ..spec()
            },
        );
        let plugin = Vst2Plugin::load(&info, registry, 48000.0, 64).unwrap();
        assert_eq!(plugin.latency(), 128);
    }
}

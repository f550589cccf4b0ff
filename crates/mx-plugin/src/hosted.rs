//! Shared machinery for plugin-hosted modules
//!
//! `HostedPlugin` owns the native instance(s), lays out the module's ports,
//! keeps the [`ParamMap`] and moves data between ports and plugin each
//! cycle. The format adapters decide policy on top of it: parameter id
//! style, arity, bypass and state encoding.
//!
//! Port layout, in order:
//! 1. audio inputs, audio outputs
//! 2. event inputs, event outputs
//! 3. control inputs (host-written parameters)
//! 4. control outputs (read-back parameters)

use mx_core::{split_audio, Cycle, Port, PortHints, PortLayout, Sample, MAX_CHANNELS};
use serde::{Deserialize, Serialize};

use crate::native::{NativeDescriptor, NativeInstance, NativeParamId};
use crate::params::ParamMap;
use crate::registry::PluginResolver;
use crate::scanner::PluginInfo;
use crate::{PluginError, PluginResult};

/// Persisted plugin state
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StateBlob {
    /// Plugin's own state stream
    Native {
        #[serde(with = "hex::serde")]
        data: Vec<u8>,
    },
    /// Host-side snapshot of every input parameter
    Params { values: Vec<(NativeParamId, f32)> },
}

/// How parameter ids must look for a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStyle {
    Index,
    Symbol,
}

pub struct HostedPlugin {
    info: PluginInfo,
    descriptor: NativeDescriptor,
    instances: Vec<Box<dyn NativeInstance>>,
    params: ParamMap,
    layout: PortLayout,
    sample_rate: f32,
    max_frames: usize,
}

impl HostedPlugin {
    /// Instantiate and activate one instance through `resolver`
    pub fn load(
        info: &PluginInfo,
        resolver: &dyn PluginResolver,
        id_style: IdStyle,
        sample_rate: f32,
        max_frames: usize,
    ) -> PluginResult<Self> {
        let mut instance = resolver.instantiate(info, sample_rate)?;
        let descriptor = instance.descriptor().clone();
        check_ids(&descriptor, id_style)?;
        if descriptor.audio_inputs > MAX_CHANNELS || descriptor.audio_outputs > MAX_CHANNELS {
            return Err(PluginError::Arity(format!(
                "{}: {} in / {} out exceeds {} channels",
                descriptor.name, descriptor.audio_inputs, descriptor.audio_outputs, MAX_CHANNELS
            )));
        }
        instance.activate(sample_rate, max_frames)?;

        log::info!(
            "Loaded {} plugin {} ({} in / {} out, {} params)",
            info.format.as_str(),
            descriptor.name,
            descriptor.audio_inputs,
            descriptor.audio_outputs,
            descriptor.params.len()
        );

        Ok(Self {
            info: info.clone(),
            descriptor,
            instances: vec![instance],
            params: ParamMap::new(),
            layout: PortLayout::default(),
            sample_rate,
            max_frames,
        })
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn descriptor(&self) -> &NativeDescriptor {
        &self.descriptor
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn layout(&self) -> &PortLayout {
        &self.layout
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Grow or shrink to `count` instances (per-channel replication)
    pub fn set_instance_count(&mut self, count: usize, resolver: &dyn PluginResolver) -> PluginResult<()> {
        while self.instances.len() > count.max(1) {
            if let Some(mut inst) = self.instances.pop() {
                inst.deactivate();
            }
        }
        while self.instances.len() < count {
            let mut inst = resolver.instantiate(&self.info, self.sample_rate)?;
            inst.activate(self.sample_rate, self.max_frames)?;
            // New instances start from the current parameter values
            for binding in self.params.inputs() {
                let v = self.instances[0].get_param(&binding.id);
                inst.set_param(&binding.id, v);
            }
            self.instances.push(inst);
        }
        self.params.invalidate();
        Ok(())
    }

    /// Replace every instance with a fresh one at `sample_rate`, carrying
    /// parameter values and native state across.
    pub fn reinstantiate(&mut self, resolver: &dyn PluginResolver, sample_rate: f32) -> PluginResult<()> {
        let state = self.instances[0].save_state();
        let values: Vec<(NativeParamId, f32)> = self
            .params
            .inputs()
            .iter()
            .map(|b| (b.id.clone(), self.instances[0].get_param(&b.id)))
            .collect();

        let mut fresh = Vec::with_capacity(self.instances.len());
        for _ in 0..self.instances.len() {
            let mut inst = resolver.instantiate(&self.info, sample_rate)?;
            inst.activate(sample_rate, self.max_frames)?;
            if let Some(data) = &state {
                inst.restore_state(data)?;
            }
            for (id, v) in &values {
                inst.set_param(id, *v);
            }
            fresh.push(inst);
        }

        self.deactivate();
        self.instances = fresh;
        self.sample_rate = sample_rate;
        self.params.invalidate();
        Ok(())
    }

    /// Set the descriptor's bypass parameter on every instance; false when
    /// the plugin has none.
    pub fn set_bypass_param(&mut self, bypass: bool) -> bool {
        let Some(id) = self.descriptor.bypass_param().cloned() else {
            return false;
        };
        self.set_param_all(&id, if bypass { 1.0 } else { 0.0 });
        true
    }

    /// Output count for `n` inputs when the plugin's arity is fixed
    pub fn fixed_arity(&self, n: usize) -> Option<usize> {
        (n == self.descriptor.audio_inputs).then_some(self.descriptor.audio_outputs)
    }

    /// Build the port list for `audio_in`/`audio_out` channels and rebuild
    /// the parameter map to match.
    pub fn build_ports(&mut self, audio_in: usize, audio_out: usize) -> Vec<Port> {
        let mut ports = Vec::new();
        for i in 0..audio_in {
            ports.push(Port::audio_input(format!("in-{}", i + 1)));
        }
        for i in 0..audio_out {
            ports.push(Port::audio_output(format!("out-{}", i + 1)));
        }
        for i in 0..self.descriptor.event_inputs {
            ports.push(Port::event_input(format!("events-in-{}", i + 1)));
        }
        for i in 0..self.descriptor.event_outputs {
            ports.push(Port::event_output(format!("events-out-{}", i + 1)));
        }

        let mut params = ParamMap::new();
        for p in self.descriptor.params.iter().filter(|p| !p.output && !p.bypass) {
            params.insert_input(p.id.clone(), ports.len());
            ports.push(Port::control_input(p.name.clone(), p.hints));
        }
        for p in self.descriptor.params.iter().filter(|p| p.output && !p.bypass) {
            params.insert_read_back(p.id.clone(), ports.len());
            ports.push(Port::control_output(p.name.clone(), p.hints));
        }

        // Ports start from what the plugin currently holds
        for binding in params.inputs() {
            let v = self.instances[0].get_param(&binding.id);
            ports[binding.port].set_control_value(v);
        }

        self.params = params;
        self.layout = PortLayout::of(&ports);
        ports
    }

    /// Swap in a rebuilt port list, carrying control values over by name
    pub fn rebuild_ports(&mut self, ports: &mut Vec<Port>, audio_in: usize, audio_out: usize) {
        let mut fresh = self.build_ports(audio_in, audio_out);
        for port in fresh.iter_mut().filter(|p| p.kind() == mx_core::PortKind::Control) {
            if let Some(old) = ports
                .iter()
                .find(|o| o.kind() == port.kind() && o.direction() == port.direction() && o.name() == port.name())
            {
                port.set_control_value(old.control_value());
            }
        }
        *ports = fresh;
        self.params.invalidate();
    }

    // ─── Real-time path ─────────────────────────────────────────────────────

    /// Push changed control inputs to every instance
    #[inline]
    pub fn sync_params(&mut self, ports: &[Port]) {
        let instances = &mut self.instances;
        for binding in self.params.inputs_mut() {
            let Some(port) = ports.get(binding.port) else { continue };
            let v = port.control_value();
            if v != binding.last {
                for inst in instances.iter_mut() {
                    inst.set_param(&binding.id, v);
                }
                binding.last = v;
            }
        }
    }

    /// Run every instance for one cycle and copy read-back parameters out.
    ///
    /// With more than one instance, instance `k` gets audio channel `k`.
    pub fn run(&mut self, ports: &mut [Port], cycle: &Cycle) {
        self.sync_params(ports);

        if let Some(&ev) = self.layout.event_in.first() {
            if let Some(events) = ports[ev].events() {
                self.instances[0].handle_events(events);
            }
        }

        {
            let (inputs, mut outputs) = split_audio(ports, cycle.frames);
            if self.instances.len() == 1 {
                self.instances[0].process(&inputs, &mut outputs, cycle.frames);
            } else {
                for (k, inst) in self.instances.iter_mut().enumerate() {
                    let ins: &[&[Sample]] = inputs.get(k..k + 1).unwrap_or(&[]);
                    let outs: &mut [&mut [Sample]] = match outputs.get_mut(k..k + 1) {
                        Some(o) => o,
                        None => &mut [],
                    };
                    inst.process(ins, outs, cycle.frames);
                }
            }
        }

        if let Some(&ev) = self.layout.event_out.first() {
            if let Some(events) = ports[ev].events_mut() {
                events.clear();
                self.instances[0].drain_events(events);
            }
        }

        self.read_back(ports);
    }

    /// Copy plugin-written parameters into their control outputs
    #[inline]
    pub fn read_back(&self, ports: &mut [Port]) {
        for (id, port) in self.params.read_back() {
            if let Some(p) = ports.get_mut(*port) {
                p.set_control_value(self.instances[0].get_param(id));
            }
        }
    }

    /// First instance, for format-specific calls (bypass, worker)
    pub fn primary_mut(&mut self) -> &mut dyn NativeInstance {
        self.instances[0].as_mut()
    }

    pub fn set_param_all(&mut self, id: &NativeParamId, value: f32) {
        for inst in &mut self.instances {
            inst.set_param(id, value);
        }
    }

    // ─── Non-real-time ──────────────────────────────────────────────────────

    pub fn latency(&self) -> u32 {
        self.instances.iter().map(|i| i.latency()).max().unwrap_or(0)
    }

    /// Re-activate every instance (buffer size or sample rate change)
    pub fn reactivate(&mut self, sample_rate: f32, max_frames: usize) {
        self.sample_rate = sample_rate;
        self.max_frames = max_frames;
        for inst in &mut self.instances {
            inst.deactivate();
            if let Err(e) = inst.activate(sample_rate, max_frames) {
                log::warn!("Failed to re-activate {}: {}", self.descriptor.name, e);
            }
        }
        self.params.invalidate();
    }

    pub fn deactivate(&mut self) {
        for inst in &mut self.instances {
            inst.deactivate();
        }
    }

    /// Serialize state: the plugin's own stream when `prefer_native` and
    /// offered, otherwise a snapshot of every input parameter.
    pub fn save_state(&self, ports: &[Port], prefer_native: bool) -> PluginResult<Vec<u8>> {
        let blob = match self.instances[0].save_state().filter(|_| prefer_native) {
            Some(data) => StateBlob::Native { data },
            None => StateBlob::Params {
                values: self
                    .params
                    .inputs()
                    .iter()
                    .map(|b| {
                        let v = ports.get(b.port).map_or(0.0, |p| p.control_value());
                        (b.id.clone(), v)
                    })
                    .collect(),
            },
        };
        serde_json::to_vec(&blob).map_err(|e| PluginError::State(e.to_string()))
    }

    pub fn restore_state(&mut self, ports: &mut [Port], data: &[u8]) -> PluginResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let blob: StateBlob = serde_json::from_slice(data).map_err(|e| PluginError::State(e.to_string()))?;
        match blob {
            StateBlob::Native { data } => {
                for inst in &mut self.instances {
                    inst.restore_state(&data)?;
                }
                for binding in self.params.inputs() {
                    if let Some(p) = ports.get_mut(binding.port) {
                        p.set_control_value(self.instances[0].get_param(&binding.id));
                    }
                }
            }
            StateBlob::Params { values } => {
                for (id, v) in values {
                    match self.params.port_for(&id) {
                        Some(port) if !self.params.is_read_back(&id) => {
                            if let Some(p) = ports.get_mut(port) {
                                p.set_control_value(v);
                            }
                        }
                        _ => log::debug!("{}: ignoring unknown parameter {} in state", self.descriptor.name, id),
                    }
                }
            }
        }
        self.params.invalidate();
        Ok(())
    }

    pub fn hints_for(&self, id: &NativeParamId) -> Option<PortHints> {
        self.descriptor.params.iter().find(|p| &p.id == id).map(|p| p.hints)
    }
}

impl Drop for HostedPlugin {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn check_ids(descriptor: &NativeDescriptor, style: IdStyle) -> PluginResult<()> {
    let bad = descriptor.params.iter().find(|p| {
        !matches!(
            (&p.id, style),
            (NativeParamId::Index(_), IdStyle::Index) | (NativeParamId::Symbol(_), IdStyle::Symbol)
        )
    });
    match bad {
        Some(p) => Err(PluginError::InitFailed(format!(
            "{}: parameter {} uses the wrong id style (expected {:?})",
            descriptor.name, p.id, style
        ))),
        None => Ok(()),
    }
}

//! Module: one processing unit in a chain
//!
//! A `Module` owns its ports and one closed [`Backend`] variant. Plugin
//! hosted modules move through
//! `Unloaded → Loading → Active ⇄ Bypassed → Unloading → Unloaded`; a load
//! that fails at any step leaves an inert, zero-port placeholder that still
//! remembers which plugin it was meant to be.
//!
//! Built-ins that front audio server ports (audio I/O, controller CV inputs)
//! also carry [`ServerBinding`]s, which the chain feeds and drains around
//! `process`.

use mx_core::{
    buffer_copy, silence_outputs, Cycle, EngineConfig, ModuleId, Port, PortDirection, PortKind, PortLayout,
};
use mx_plugin::{
    ClapPlugin, LadspaPlugin, Lv2Plugin, ModuleBackend, ModuleState, ParamMap, PluginFormat, PluginInfo,
    PluginResolver, PluginResult, Vst2Plugin, Vst3Plugin,
};
use std::sync::Arc;

use crate::builtin::{
    AudioInputModule, AudioOutputModule, BuiltIn, ControlMode, ControllerModule, GainModule, MeterModule,
    MonoPanModule,
};
use crate::server::{ServerClient, ServerIo, ServerPortId};
use crate::EngineResult;

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// Every kind of processing a module can host
pub enum Backend {
    BuiltIn(BuiltIn),
    Ladspa(LadspaPlugin),
    Lv2(Lv2Plugin),
    Vst2(Vst2Plugin),
    Vst3(Vst3Plugin),
    Clap(ClapPlugin),
}

impl Backend {
    /// Resolve and activate a plugin through its format adapter
    pub fn load(
        info: &PluginInfo,
        resolver: Arc<dyn PluginResolver>,
        sample_rate: f32,
        max_frames: usize,
    ) -> PluginResult<Self> {
        Ok(match info.format {
            PluginFormat::Ladspa => Self::Ladspa(LadspaPlugin::load(info, resolver, sample_rate, max_frames)?),
            PluginFormat::Lv2 => Self::Lv2(Lv2Plugin::load(info, resolver, sample_rate, max_frames)?),
            PluginFormat::Vst2 => Self::Vst2(Vst2Plugin::load(info, resolver, sample_rate, max_frames)?),
            PluginFormat::Vst3 => Self::Vst3(Vst3Plugin::load(info, resolver, sample_rate, max_frames)?),
            PluginFormat::Clap => Self::Clap(ClapPlugin::load(info, resolver, sample_rate, max_frames)?),
        })
    }

    #[inline]
    pub fn get(&self) -> &dyn ModuleBackend {
        match self {
            Self::BuiltIn(b) => b.get(),
            Self::Ladspa(p) => p,
            Self::Lv2(p) => p,
            Self::Vst2(p) => p,
            Self::Vst3(p) => p,
            Self::Clap(p) => p,
        }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut dyn ModuleBackend {
        match self {
            Self::BuiltIn(b) => b.get_mut(),
            Self::Ladspa(p) => p,
            Self::Lv2(p) => p,
            Self::Vst2(p) => p,
            Self::Vst3(p) => p,
            Self::Clap(p) => p,
        }
    }

    /// Plugin format, `None` for built-ins
    pub fn format(&self) -> Option<PluginFormat> {
        match self {
            Self::BuiltIn(_) => None,
            Self::Ladspa(_) => Some(PluginFormat::Ladspa),
            Self::Lv2(_) => Some(PluginFormat::Lv2),
            Self::Vst2(_) => Some(PluginFormat::Vst2),
            Self::Vst3(_) => Some(PluginFormat::Vst3),
            Self::Clap(_) => Some(PluginFormat::Clap),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTEXT & SERVER BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Cycle parameters a module is built against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleContext {
    pub sample_rate: f32,
    pub buffer_size: usize,
    pub event_capacity: usize,
    pub smoothing_ms: f32,
}

impl ModuleContext {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            buffer_size: config.buffer_size,
            event_capacity: config.event_capacity,
            smoothing_ms: config.smoothing_ms,
        }
    }
}

impl Default for ModuleContext {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// A module port mirrored by an audio server port
#[derive(Debug, Clone, PartialEq)]
pub struct ServerBinding {
    /// Index into the module's port list
    pub port: usize,
    /// Full server-side name (`<chain>/<port>`)
    pub name: String,
    /// Server-side direction; `Input` carries audio into the engine
    pub direction: PortDirection,
    id: Option<ServerPortId>,
    connections: usize,
}

impl ServerBinding {
    /// Registered with a server (not frozen)
    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    /// External connections reported by the server
    pub fn connections(&self) -> usize {
        self.connections
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Module {
    id: ModuleId,
    label: String,
    ports: Vec<Port>,
    layout: PortLayout,
    state: ModuleState,
    bypass: bool,
    /// Plugin this module hosts (kept on a failed load)
    plugin: Option<PluginInfo>,
    /// Saved plugin state held until the plugin loads
    pending_state: Option<Vec<u8>>,
    backend: Option<Backend>,
    bindings: Vec<ServerBinding>,
    sample_rate: f32,
    frames: usize,
    event_capacity: usize,
}

impl Module {
    fn empty(label: &str, ctx: &ModuleContext) -> Self {
        Self {
            id: ModuleId::next(),
            label: label.to_string(),
            ports: Vec::new(),
            layout: PortLayout::default(),
            state: ModuleState::Unloaded,
            bypass: false,
            plugin: None,
            pending_state: None,
            backend: None,
            bindings: Vec::new(),
            sample_rate: ctx.sample_rate,
            frames: ctx.buffer_size,
            event_capacity: ctx.event_capacity,
        }
    }

    /// Wrap a built-in backend
    pub fn builtin(mut builtin: BuiltIn, ctx: &ModuleContext) -> Self {
        let mut module = Self::empty(builtin.get().name(), ctx);
        module.ports = builtin.get_mut().create_ports();
        module.backend = Some(Backend::BuiltIn(builtin));
        module.state = ModuleState::Active;
        module.ports_changed();
        module
    }

    pub fn gain(channels: usize, ctx: &ModuleContext) -> Self {
        Self::builtin(
            BuiltIn::Gain(GainModule::new(channels, ctx.sample_rate, ctx.smoothing_ms)),
            ctx,
        )
    }

    pub fn mono_pan(ctx: &ModuleContext) -> Self {
        Self::builtin(BuiltIn::MonoPan(MonoPanModule::new(ctx.sample_rate, ctx.smoothing_ms)), ctx)
    }

    pub fn meter(channels: usize, ctx: &ModuleContext) -> Self {
        Self::builtin(BuiltIn::Meter(MeterModule::new(channels)), ctx)
    }

    pub fn controller(ctx: &ModuleContext) -> Self {
        Self::builtin(BuiltIn::Controller(ControllerModule::new()), ctx)
    }

    pub fn audio_input(channels: usize, ctx: &ModuleContext) -> Self {
        Self::builtin(BuiltIn::AudioInput(AudioInputModule::new(channels)), ctx)
    }

    pub fn audio_output(channels: usize, ctx: &ModuleContext) -> Self {
        Self::builtin(BuiltIn::AudioOutput(AudioOutputModule::new(channels)), ctx)
    }

    /// Inert zero-port module
    pub fn placeholder(label: &str, ctx: &ModuleContext) -> Self {
        Self::empty(label, ctx)
    }

    /// Placeholder that immediately tries to load `info`
    pub fn plugin(info: &PluginInfo, resolver: Arc<dyn PluginResolver>, ctx: &ModuleContext) -> Self {
        let mut module = Self::empty(&info.name, ctx);
        module.load_plugin(info, resolver);
        module
    }

    /// Take over a persisted identity
    pub fn with_id(mut self, id: ModuleId) -> Self {
        ModuleId::reserve_above(id);
        self.id = id;
        self
    }

    // ─── Plugin lifecycle ───────────────────────────────────────────────────

    /// Resolve, instantiate and activate `info`. On failure the module is
    /// left Unloaded with no ports and `false` is returned.
    pub fn load_plugin(&mut self, info: &PluginInfo, resolver: Arc<dyn PluginResolver>) -> bool {
        if self.backend.is_some() {
            self.unload();
        }
        self.plugin = Some(info.clone());
        self.state = ModuleState::Loading;

        match Backend::load(info, resolver, self.sample_rate, self.frames) {
            Ok(mut backend) => {
                self.ports = backend.get_mut().create_ports();
                backend.get_mut().set_bypass(self.bypass);
                self.backend = Some(backend);
                self.state = if self.bypass {
                    ModuleState::Bypassed
                } else {
                    ModuleState::Active
                };
                self.ports_changed();
                if let Some(state) = self.pending_state.take() {
                    if let Err(e) = self.restore_state(&state) {
                        log::warn!("{}: saved state not applied: {}", self.label, e);
                    }
                }
                true
            }
            Err(e) => {
                log::warn!("Failed to load {} plugin {}: {}", info.format.as_str(), info.id, e);
                self.ports.clear();
                self.ports_changed();
                self.state = ModuleState::Unloaded;
                false
            }
        }
    }

    /// Tear down the backend. Connections must already be cleared (see
    /// `Chain::unload_module`).
    pub fn unload(&mut self) {
        if self.state == ModuleState::Unloaded && self.backend.is_none() {
            return;
        }
        self.state = ModuleState::Unloading;
        self.backend = None;
        self.ports.clear();
        self.ports_changed();
        self.state = ModuleState::Unloaded;
        log::debug!("Unloaded {}", self.label);
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    pub fn name(&self) -> &str {
        match &self.backend {
            Some(b) => b.get().name(),
            None => &self.label,
        }
    }

    #[inline]
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    #[inline]
    pub fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.ports
    }

    pub fn port(&self, index: usize) -> Option<&Port> {
        self.ports.get(index)
    }

    pub fn port_mut(&mut self, index: usize) -> Option<&mut Port> {
        self.ports.get_mut(index)
    }

    pub fn find_port(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name() == name)
    }

    pub fn layout(&self) -> &PortLayout {
        &self.layout
    }

    /// Port index of the `n`th control input
    pub fn control_input(&self, n: usize) -> Option<usize> {
        self.layout.control_in.get(n).copied()
    }

    /// Position of port `index` among the control inputs
    pub fn control_input_position(&self, index: usize) -> Option<usize> {
        self.layout.control_in.iter().position(|&i| i == index)
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn backend(&self) -> Option<&Backend> {
        self.backend.as_ref()
    }

    pub fn plugin_info(&self) -> Option<&PluginInfo> {
        self.plugin.as_ref()
    }

    pub fn param_map(&self) -> Option<&ParamMap> {
        self.backend.as_ref().and_then(|b| b.get().param_map())
    }

    /// Project-file kind: the built-in's name, or `plugin`
    pub fn kind_name(&self) -> &'static str {
        match &self.backend {
            Some(Backend::BuiltIn(b)) => b.kind_name(),
            _ if self.plugin.is_some() => "plugin",
            _ => "placeholder",
        }
    }

    pub fn is_controller(&self) -> bool {
        self.as_builtin().and_then(BuiltIn::as_controller).is_some()
    }

    pub fn controller_mode(&self) -> Option<ControlMode> {
        self.as_builtin().and_then(BuiltIn::as_controller).map(|c| c.mode())
    }

    fn as_builtin(&self) -> Option<&BuiltIn> {
        match &self.backend {
            Some(Backend::BuiltIn(b)) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn controller_parts(&mut self) -> Option<(&mut ControllerModule, &mut Vec<Port>)> {
        match &mut self.backend {
            Some(Backend::BuiltIn(BuiltIn::Controller(c))) => Some((c, &mut self.ports)),
            _ => None,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.frames
    }

    // ─── Bypass & latency ───────────────────────────────────────────────────

    pub fn bypass(&self) -> bool {
        self.bypass
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
        if let Some(backend) = &mut self.backend {
            backend.get_mut().set_bypass(bypass);
        }
        self.state = match self.state {
            ModuleState::Active | ModuleState::Bypassed if bypass => ModuleState::Bypassed,
            ModuleState::Active | ModuleState::Bypassed => ModuleState::Active,
            other => other,
        };
    }

    pub fn latency(&self) -> u32 {
        match &self.backend {
            Some(b) if !self.bypass => b.get().latency(),
            _ => 0,
        }
    }

    // ─── Arity ──────────────────────────────────────────────────────────────

    pub fn can_support_inputs(&self, n: usize) -> Option<usize> {
        self.backend.as_ref().and_then(|b| b.get().can_support_inputs(n))
    }

    /// Change the audio input count. Ports are replaced, so the caller
    /// clears and restores connections (see `Chain::configure_inputs`).
    pub fn configure_inputs(&mut self, n: usize) -> bool {
        let Some(backend) = &mut self.backend else {
            return false;
        };
        let ok = backend.get_mut().configure_inputs(&mut self.ports, n);
        if ok {
            self.ports_changed();
        }
        ok
    }

    pub fn configure_outputs(&mut self, n: usize) -> bool {
        let Some(backend) = &mut self.backend else {
            return false;
        };
        let ok = backend.get_mut().configure_outputs(&mut self.ports, n);
        if ok {
            self.ports_changed();
        }
        ok
    }

    /// Size new ports and rebuild the layout
    pub(crate) fn ports_changed(&mut self) {
        for port in &mut self.ports {
            port.set_buffer_size(self.frames, self.event_capacity);
        }
        self.layout = PortLayout::of(&self.ports);
    }

    // ─── Real-time ──────────────────────────────────────────────────────────

    /// Run one cycle. Outputs are silenced unless Active or Bypassed.
    #[inline]
    pub fn process(&mut self, cycle: &Cycle) {
        match &mut self.backend {
            Some(backend) if self.state.is_running() => backend.get_mut().process(&mut self.ports, cycle),
            _ => silence_outputs(&mut self.ports),
        }
    }

    /// Copy server capture buffers into their bound ports
    #[inline]
    pub fn server_pull(&mut self, io: &dyn ServerIo, frames: usize) {
        for binding in self.bindings.iter().filter(|b| b.direction == PortDirection::Input) {
            let Some(port) = self.ports.get_mut(binding.port) else { continue };
            match binding.id.and_then(|id| io.input(id)) {
                Some(src) => {
                    if let Some(dst) = port.buffer_mut() {
                        let n = frames.min(dst.len());
                        buffer_copy(&mut dst[..n], src);
                    }
                }
                None => port.silence(),
            }
        }
    }

    /// Copy bound ports out to server playback buffers
    #[inline]
    pub fn server_push(&self, io: &mut dyn ServerIo, frames: usize) {
        for binding in self.bindings.iter().filter(|b| b.direction == PortDirection::Output) {
            let (Some(id), Some(port)) = (binding.id, self.ports.get(binding.port)) else { continue };
            if let (Some(dst), Some(src)) = (io.output(id), port.buffer()) {
                let n = frames.min(dst.len());
                buffer_copy(&mut dst[..n], src);
            }
        }
    }

    // ─── Non-real-time notifications ────────────────────────────────────────

    pub fn buffer_size_changed(&mut self, frames: usize, event_capacity: usize) {
        self.frames = frames;
        self.event_capacity = event_capacity;
        for port in &mut self.ports {
            port.set_buffer_size(frames, event_capacity);
        }
        if let Some(backend) = &mut self.backend {
            backend.get_mut().buffer_size_changed(frames);
        }
    }

    pub fn sample_rate_changed(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        if let Some(backend) = &mut self.backend {
            backend.get_mut().sample_rate_changed(sample_rate);
        }
    }

    // ─── State ──────────────────────────────────────────────────────────────

    /// Backend state blob. A plugin that failed to load hands back the
    /// state it was restored with; other placeholders have none.
    pub fn save_state(&self) -> EngineResult<Vec<u8>> {
        match &self.backend {
            Some(b) => Ok(b.get().save_state(&self.ports)?),
            None => Ok(self.pending_state.clone().unwrap_or_default()),
        }
    }

    /// Apply a state blob. Without a backend it is held for the next
    /// successful plugin load.
    pub fn restore_state(&mut self, data: &[u8]) -> EngineResult<()> {
        match &mut self.backend {
            Some(b) => b.get_mut().restore_state(&mut self.ports, data)?,
            None if self.plugin.is_some() && !data.is_empty() => self.pending_state = Some(data.to_vec()),
            None => {}
        }
        Ok(())
    }

    /// A plugin module whose backend is missing
    pub fn is_unloaded_plugin(&self) -> bool {
        self.plugin.is_some() && self.backend.is_none()
    }

    /// Current value of every control input, in port order
    pub fn parameter_values(&self) -> Vec<f32> {
        self.layout
            .control_in
            .iter()
            .map(|&i| self.ports[i].control_value())
            .collect()
    }

    /// Apply values saved by [`parameter_values`](Self::parameter_values).
    /// Extra values are ignored.
    pub fn set_parameter_values(&mut self, values: &[f32]) {
        for (&i, &v) in self.layout.control_in.iter().zip(values) {
            let port = &mut self.ports[i];
            let v = port.hints().constrain(v);
            port.set_control_value(v);
        }
    }

    // ─── Server ports ───────────────────────────────────────────────────────

    pub fn server_bindings(&self) -> &[ServerBinding] {
        &self.bindings
    }

    /// Bring server bindings in line with the port list: stale bindings are
    /// unregistered, new ones created, and with a `client` every binding is
    /// registered under `<prefix>/<port name>`.
    pub fn sync_server_ports(&mut self, client: Option<&dyn ServerClient>, prefix: &str) -> EngineResult<()> {
        let desired: Vec<(usize, String, PortDirection)> = match self.as_builtin() {
            Some(b) => self
                .ports
                .iter()
                .enumerate()
                .filter_map(|(i, p)| b.server_direction(p).map(|d| (i, format!("{}/{}", prefix, p.name()), d)))
                .collect(),
            None => Vec::new(),
        };

        let mut kept = Vec::with_capacity(desired.len());
        for binding in self.bindings.drain(..) {
            if desired.iter().any(|(_, n, d)| *n == binding.name && *d == binding.direction) {
                kept.push(binding);
            } else if let (Some(c), Some(id)) = (client, binding.id) {
                if let Err(e) = c.unregister_port(id) {
                    log::warn!("Failed to unregister {}: {}", binding.name, e);
                }
            }
        }

        let mut result = Ok(());
        for (port, name, direction) in desired {
            let index = match kept.iter().position(|b| b.name == name) {
                Some(i) => i,
                None => {
                    kept.push(ServerBinding {
                        port,
                        name,
                        direction,
                        id: None,
                        connections: 0,
                    });
                    kept.len() - 1
                }
            };
            let binding = &mut kept[index];
            binding.port = port;
            if let (Some(c), None) = (client, binding.id) {
                match c.register_port(&binding.name, direction) {
                    Ok(id) => binding.id = Some(id),
                    Err(e) => {
                        log::warn!("Failed to register {}: {}", binding.name, e);
                        result = Err(e);
                    }
                }
            }
        }
        self.bindings = kept;
        result
    }

    /// Release every server port, keeping the logical ports and bindings
    pub fn freeze_ports(&mut self, client: &dyn ServerClient) {
        for binding in &mut self.bindings {
            binding.connections = 0;
            if let Some(id) = binding.id.take() {
                if let Err(e) = client.unregister_port(id) {
                    log::warn!("Failed to release {}: {}", binding.name, e);
                }
            }
        }
    }

    /// Re-register server ports under `prefix`
    pub fn thaw_ports(&mut self, client: &dyn ServerClient, prefix: &str) -> EngineResult<()> {
        self.sync_server_ports(Some(client), prefix)
    }

    /// Move registered ports under a new prefix
    pub fn rename_server_ports(&mut self, client: Option<&dyn ServerClient>, prefix: &str) -> EngineResult<()> {
        for binding in &mut self.bindings {
            let Some(port) = self.ports.get(binding.port) else { continue };
            let name = format!("{}/{}", prefix, port.name());
            if let (Some(c), Some(id)) = (client, binding.id) {
                c.rename_port(id, &name)?;
            }
            binding.name = name;
        }
        Ok(())
    }

    /// Record an external (re)wiring of server port `server_name`.
    /// Returns true when this module owns that port.
    pub fn port_connection_changed(&mut self, server_name: &str, connected: bool) -> bool {
        let Some(binding) = self.bindings.iter_mut().find(|b| b.name == server_name) else {
            return false;
        };
        binding.connections = if connected {
            binding.connections + 1
        } else {
            binding.connections.saturating_sub(1)
        };
        log::debug!(
            "{}: {} {}",
            self.label,
            server_name,
            if connected { "connected" } else { "disconnected" }
        );
        true
    }

    /// Kinds present among this module's ports
    pub fn has_port_kind(&self, kind: PortKind) -> bool {
        self.ports.iter().any(|p| p.kind() == kind)
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind_name())
            .field("state", &self.state)
            .field("ports", &self.ports.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::MemoryServer;
    use mx_core::{PortHints, Sample};
    use mx_plugin::{NativeDescriptor, NativeInstance, NativeParam, NativeParamId, PluginRegistry};

    struct Doubler {
        descriptor: NativeDescriptor,
        amount: f32,
    }

    impl NativeInstance for Doubler {
        fn descriptor(&self) -> &NativeDescriptor {
            &self.descriptor
        }
        fn activate(&mut self, _sample_rate: f32, _max_frames: usize) -> PluginResult<()> {
            Ok(())
        }
        fn deactivate(&mut self) {}
        fn set_param(&mut self, _id: &NativeParamId, value: f32) {
            self.amount = value;
        }
        fn get_param(&self, _id: &NativeParamId) -> f32 {
            self.amount
        }
        fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]], _frames: usize) {
            for (out, input) in outputs.iter_mut().zip(inputs.iter()) {
                for (o, i) in out.iter_mut().zip(input.iter()) {
                    *o = *i * self.amount;
                }
            }
        }
        fn latency(&self) -> u32 {
            16
        }
    }

    fn registry() -> Arc<PluginRegistry> {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(PluginFormat::Vst3, "doubler", |_, _| {
            Ok(Box::new(Doubler {
                descriptor: NativeDescriptor {
                    name: "Doubler".into(),
                    audio_inputs: 1,
                    audio_outputs: 1,
                    params: vec![NativeParam::input(
                        NativeParamId::Index(7),
                        "Amount",
                        PortHints::ranged(0.0, 4.0, 2.0),
                    )],
                    ..Default::default()
                },
                amount: 2.0,
            }) as Box<dyn NativeInstance>)
        });
        registry
    }

    fn ctx() -> ModuleContext {
        ModuleContext {
            buffer_size: 16,
            ..ModuleContext::default()
        }
    }

    #[test]
    fn test_builtin_is_active_and_sized() {
        let module = Module::gain(2, &ctx());
        assert_eq!(module.state(), ModuleState::Active);
        assert_eq!(module.kind_name(), "gain");
        assert_eq!(module.ports()[0].buffer().unwrap().len(), 16);
        assert_eq!(module.layout().control_in.len(), 2);
    }

    #[test]
    fn test_load_plugin_success() {
        let info = PluginInfo::new(PluginFormat::Vst3, "doubler", "Doubler", Default::default());
        let mut module = Module::plugin(&info, registry(), &ctx());
        assert_eq!(module.state(), ModuleState::Active);
        assert_eq!(module.kind_name(), "plugin");
        assert_eq!(module.latency(), 16);
        assert_eq!(module.param_map().unwrap().port_for(&NativeParamId::Index(7)), Some(2));

        module.ports_mut()[0].buffer_mut().unwrap().fill(0.25);
        module.process(&Cycle::new(16, 48000.0));
        assert_eq!(module.ports()[1].buffer().unwrap()[15], 0.5);

        module.set_bypass(true);
        assert_eq!(module.state(), ModuleState::Bypassed);
        assert_eq!(module.latency(), 0);
    }

    #[test]
    fn test_load_failure_leaves_placeholder() {
        let info = PluginInfo::new(PluginFormat::Clap, "missing", "Missing", Default::default());
        let mut module = Module::plugin(&info, registry(), &ctx());
        assert_eq!(module.state(), ModuleState::Unloaded);
        assert!(module.ports().is_empty());
        assert_eq!(module.plugin_info(), Some(&info));
        assert_eq!(module.kind_name(), "plugin");
        // Placeholder processing is a no-op
        module.process(&Cycle::new(16, 48000.0));
        assert!(module.save_state().unwrap().is_empty());
    }

    #[test]
    fn test_unload() {
        let info = PluginInfo::new(PluginFormat::Vst3, "doubler", "Doubler", Default::default());
        let mut module = Module::plugin(&info, registry(), &ctx());
        module.unload();
        assert_eq!(module.state(), ModuleState::Unloaded);
        assert!(module.ports().is_empty());
        assert!(module.backend().is_none());
    }

    #[test]
    fn test_parameter_values_roundtrip() {
        let mut module = Module::gain(1, &ctx());
        module.set_parameter_values(&[-12.0, 1.0, 99.0]);
        assert_eq!(module.parameter_values(), vec![-12.0, 1.0]);
        module.set_parameter_values(&[100.0]);
        assert_eq!(module.parameter_values()[0], 6.0);
    }

    #[test]
    fn test_server_bindings_freeze_and_thaw() {
        let server = MemoryServer::new("test", 48000.0, 16);
        let mut module = Module::audio_output(2, &ctx());
        module.thaw_ports(&server, "Main").unwrap();
        assert_eq!(server.port_count(), 2);
        assert!(server.port_by_name("Main/in-2").is_some());

        module.freeze_ports(&server);
        assert_eq!(server.port_count(), 0);
        assert_eq!(module.server_bindings().len(), 2);
        assert!(!module.server_bindings()[0].is_registered());

        module.thaw_ports(&server, "Main").unwrap();
        assert_eq!(server.port_count(), 2);
        assert!(module.server_bindings().iter().all(ServerBinding::is_registered));
    }

    #[test]
    fn test_port_connection_changed() {
        let server = MemoryServer::new("test", 48000.0, 16);
        let mut module = Module::audio_input(1, &ctx());
        module.thaw_ports(&server, "Vox").unwrap();
        assert!(module.port_connection_changed("Vox/out-1", true));
        assert_eq!(module.server_bindings()[0].connections(), 1);
        assert!(module.port_connection_changed("Vox/out-1", false));
        assert_eq!(module.server_bindings()[0].connections(), 0);
        assert!(!module.port_connection_changed("Other/out-1", true));
    }

    #[test]
    fn test_server_pull_and_push() {
        let server = MemoryServer::new("test", 48000.0, 16);
        let mut input = Module::audio_input(1, &ctx());
        let mut output = Module::audio_output(1, &ctx());
        input.thaw_ports(&server, "A").unwrap();
        output.thaw_ports(&server, "A").unwrap();

        let mut io = server.io();
        let capture = server.port_by_name("A/out-1").unwrap();
        let playback = server.port_by_name("A/in-1").unwrap();
        io.buffer_mut(capture).unwrap().fill(0.75);

        input.server_pull(&io, 16);
        assert_eq!(input.ports()[0].buffer().unwrap()[0], 0.75);

        output.ports_mut()[0].buffer_mut().unwrap().fill(-0.5);
        output.server_push(&mut io, 16);
        assert_eq!(io.buffer(playback).unwrap()[15], -0.5);
    }
}

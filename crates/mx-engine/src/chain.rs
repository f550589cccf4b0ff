//! Chain: an ordered strip of modules
//!
//! `controls ++ modules` is the processing order. Every connection runs from
//! an earlier position to a strictly later one, so a single forward pass per
//! cycle sees every upstream output from the same cycle.
//!
//! All structural calls run on the UI thread with the owning Group's lock
//! held; only [`Chain::process`] runs on the real-time thread.

use mx_control::STRIP_PREFIX;
use mx_core::{Cycle, ModuleId, Port, PortDirection, PortKind, PortRef};
use mx_plugin::{PluginInfo, PluginResolver};
use std::sync::Arc;

use crate::builtin::ControlMode;
use crate::module::{Module, ModuleContext};
use crate::server::{ServerClient, ServerIo};
use crate::{EngineError, EngineResult};

/// A connection lifted off a module while its ports are rebuilt
struct SavedConnection {
    name: String,
    direction: PortDirection,
    kind: PortKind,
    peer: PortRef,
}

pub struct Chain {
    name: String,
    controls: Vec<Module>,
    modules: Vec<Module>,
    ctx: ModuleContext,
    /// Server client while thawed; `None` while frozen
    client: Option<Arc<dyn ServerClient>>,
    /// Wiring to plugins that are not loaded, re-applied when they load
    deferred: Vec<(PortRef, PortRef)>,
}

impl Chain {
    pub fn new(name: &str, ctx: &ModuleContext) -> Self {
        Self {
            name: name.to_string(),
            controls: Vec::new(),
            modules: Vec::new(),
            ctx: *ctx,
            client: None,
            deferred: Vec::new(),
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    pub fn sample_rate(&self) -> f32 {
        self.ctx.sample_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.ctx.buffer_size
    }

    /// No server ports registered
    pub fn is_frozen(&self) -> bool {
        self.client.is_none()
    }

    pub fn controls(&self) -> &[Module] {
        &self.controls
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Every module in processing order
    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.controls.iter().chain(self.modules.iter())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Module> {
        self.controls.iter_mut().chain(self.modules.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.controls.len() + self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.iter().find(|m| m.id() == id)
    }

    pub fn module_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.iter_mut().find(|m| m.id() == id)
    }

    /// Processing position of `id` within `controls ++ modules`
    pub fn position(&self, id: ModuleId) -> Option<usize> {
        self.iter().position(|m| m.id() == id)
    }

    /// Module at `n` in `modules` (controls are not numbered)
    pub fn module_at(&self, n: usize) -> Option<&Module> {
        self.modules.get(n)
    }

    /// Number of `id` among the numbered modules
    pub fn number_of(&self, id: ModuleId) -> Option<usize> {
        self.modules.iter().position(|m| m.id() == id)
    }

    pub fn port(&self, port: PortRef) -> Option<&Port> {
        self.module(port.module).and_then(|m| m.port(port.port))
    }

    fn port_mut(&mut self, port: PortRef) -> Option<&mut Port> {
        self.module_mut(port.module).and_then(|m| m.port_mut(port.port))
    }

    fn require_port(&self, port: PortRef) -> EngineResult<&Port> {
        if self.module(port.module).is_none() {
            return Err(EngineError::NoSuchModule(port.module));
        }
        self.port(port).ok_or(EngineError::NoSuchPort(port))
    }

    /// Every internal connection as `(output, input)`, in processing order
    pub fn connections(&self) -> Vec<(PortRef, PortRef)> {
        let mut out = Vec::new();
        for module in self.iter() {
            for (i, port) in module.ports().iter().enumerate() {
                if let (true, Some(peer)) = (port.is_input(), port.connection()) {
                    out.push((peer, PortRef::new(module.id(), i)));
                }
            }
        }
        out
    }

    // ─── Membership ─────────────────────────────────────────────────────────

    /// Size a newcomer to this chain and register its server ports
    fn adopt(&mut self, module: &mut Module) {
        if module.buffer_size() != self.ctx.buffer_size {
            module.buffer_size_changed(self.ctx.buffer_size, self.ctx.event_capacity);
        }
        if module.sample_rate() != self.ctx.sample_rate {
            module.sample_rate_changed(self.ctx.sample_rate);
        }
        if let Err(e) = module.sync_server_ports(self.client.as_deref(), &self.name) {
            log::warn!("{}: server ports for {} incomplete: {}", self.name, module.label(), e);
        }
    }

    pub fn add_module(&mut self, mut module: Module) -> ModuleId {
        self.adopt(&mut module);
        let id = module.id();
        log::debug!("{}: added {}", self.name, module.label());
        self.modules.push(module);
        id
    }

    /// Insert at position `index` of `modules`, clamped to the end
    pub fn insert_module(&mut self, index: usize, mut module: Module) -> ModuleId {
        self.adopt(&mut module);
        let id = module.id();
        let index = index.min(self.modules.len());
        log::debug!("{}: inserted {} at {}", self.name, module.label(), index);
        self.modules.insert(index, module);
        id
    }

    /// Add a controller-style module ahead of every numbered module
    pub fn add_control(&mut self, mut module: Module) -> ModuleId {
        self.adopt(&mut module);
        let id = module.id();
        self.controls.push(module);
        id
    }

    /// Detach `id`, clearing both sides of every connection and releasing its
    /// server ports
    pub fn remove_module(&mut self, id: ModuleId) -> EngineResult<Module> {
        self.take_connections(id)?;
        let mut module = match self.controls.iter().position(|m| m.id() == id) {
            Some(i) => self.controls.remove(i),
            None => {
                let i = self
                    .modules
                    .iter()
                    .position(|m| m.id() == id)
                    .ok_or(EngineError::NoSuchModule(id))?;
                self.modules.remove(i)
            }
        };
        if let Some(client) = &self.client {
            module.freeze_ports(&**client);
        }
        self.deferred.retain(|(from, to)| from.module != id && to.module != id);
        log::debug!("{}: removed {}", self.name, module.label());
        Ok(module)
    }

    // ─── Connections ────────────────────────────────────────────────────────

    /// Wire `output` to `input`, replacing any connection either side had
    pub fn connect(&mut self, output: PortRef, input: PortRef) -> EngineResult<()> {
        let src = self.require_port(output)?;
        let dst = self.require_port(input)?;
        if !src.is_output() || !dst.is_input() {
            return Err(EngineError::DirectionMismatch);
        }
        if src.kind() != dst.kind() {
            return Err(EngineError::KindMismatch);
        }
        let kind = dst.kind();
        let (hints, value) = (*dst.hints(), dst.control_value());

        let ordered = match (self.position(output.module), self.position(input.module)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        };
        if !ordered {
            return Err(EngineError::CyclicTopology {
                from: output,
                to: input,
            });
        }

        self.disconnect(output)?;
        self.disconnect(input)?;
        if let Some(p) = self.port_mut(output) {
            p.connect_to(input);
        }
        if let Some(p) = self.port_mut(input) {
            p.connect_to(output);
        }

        // A controller takes on the range of whatever it now drives
        if kind == PortKind::Control {
            if let Some((ctl, ports)) = self.module_mut(output.module).and_then(Module::controller_parts) {
                ctl.set_target(ports, hints, value);
            }
        }
        log::debug!("{}: connected {:?} -> {:?}", self.name, output, input);
        Ok(())
    }

    /// Clear `port` and its peer. Idempotent.
    pub fn disconnect(&mut self, port: PortRef) -> EngineResult<()> {
        self.require_port(port)?;
        let peer = self.port_mut(port).and_then(Port::disconnect);
        if let Some(peer) = peer {
            if let Some(p) = self.port_mut(peer) {
                if p.connection() == Some(port) {
                    p.disconnect();
                }
            }
        }
        Ok(())
    }

    /// Copy a control output's value to its peer now rather than next cycle
    pub fn push_control(&mut self, port: PortRef) -> EngineResult<()> {
        let src = self.require_port(port)?;
        if !src.is(PortDirection::Output, PortKind::Control) {
            return Err(EngineError::KindMismatch);
        }
        let value = src.control_value();
        let peer = src.connection().ok_or(EngineError::NotConnected(port))?;
        if let Some(p) = self.port_mut(peer) {
            p.set_control_value(value);
        }
        Ok(())
    }

    /// Set a control port, constrained to its range. Returns the value
    /// actually applied. A controller feeding this input is moved with it. Other
    /// feeders keep their own value.
    pub fn set_control(&mut self, port: PortRef, value: f32) -> EngineResult<f32> {
        self.require_port(port)?;
        let Some(p) = self.port_mut(port) else {
            return Err(EngineError::NoSuchPort(port));
        };
        if p.kind() != PortKind::Control {
            return Err(EngineError::KindMismatch);
        }
        let value = p.hints().constrain(value);
        p.set_control_value(value);

        let feeder = if p.is_input() { p.connection() } else { None };
        let controlled = feeder.filter(|f| self.module(f.module).is_some_and(Module::is_controller));
        if let Some(src) = controlled.and_then(|f| self.port_mut(f)) {
            src.set_control_value(value);
        }
        Ok(value)
    }

    /// Lift every connection off `id`, clearing both sides
    fn take_connections(&mut self, id: ModuleId) -> EngineResult<Vec<SavedConnection>> {
        let module = self.module(id).ok_or(EngineError::NoSuchModule(id))?;
        let saved: Vec<(usize, SavedConnection)> = module
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                p.connection().map(|peer| {
                    (
                        i,
                        SavedConnection {
                            name: p.name().to_string(),
                            direction: p.direction(),
                            kind: p.kind(),
                            peer,
                        },
                    )
                })
            })
            .collect();
        for (i, _) in &saved {
            self.disconnect(PortRef::new(id, *i))?;
        }
        Ok(saved.into_iter().map(|(_, s)| s).collect())
    }

    /// Re-apply connections to ports matching by name, direction and kind
    fn restore_connections(&mut self, id: ModuleId, saved: Vec<SavedConnection>) {
        for conn in saved {
            let index = self.module(id).and_then(|m| {
                m.ports()
                    .iter()
                    .position(|p| p.name() == conn.name && p.is(conn.direction, conn.kind))
            });
            let Some(index) = index else {
                log::debug!("{}: dropped connection on vanished port {}", self.name, conn.name);
                continue;
            };
            let here = PortRef::new(id, index);
            let result = match conn.direction {
                PortDirection::Output => self.connect(here, conn.peer),
                PortDirection::Input => self.connect(conn.peer, here),
            };
            if let Err(e) = result {
                log::debug!("{}: could not restore {}: {}", self.name, conn.name, e);
            }
        }
    }

    // ─── Reconfiguration ────────────────────────────────────────────────────

    /// Change a module's audio input count, keeping connections on ports
    /// that survive
    pub fn configure_inputs(&mut self, id: ModuleId, n: usize) -> EngineResult<bool> {
        let saved = self.take_connections(id)?;
        let ok = self.module_mut(id).is_some_and(|m| m.configure_inputs(n));
        self.restore_connections(id, saved);
        self.sync_module(id)?;
        Ok(ok)
    }

    pub fn configure_outputs(&mut self, id: ModuleId, n: usize) -> EngineResult<bool> {
        let saved = self.take_connections(id)?;
        let ok = self.module_mut(id).is_some_and(|m| m.configure_outputs(n));
        self.restore_connections(id, saved);
        self.sync_module(id)?;
        Ok(ok)
    }

    /// Swap a module's backend for `info`. Connections are re-applied to
    /// ports of the same name. Returns whether the load succeeded.
    pub fn load_plugin(
        &mut self,
        id: ModuleId,
        info: &PluginInfo,
        resolver: Arc<dyn PluginResolver>,
    ) -> EngineResult<bool> {
        let saved = self.take_connections(id)?;
        let ok = self.module_mut(id).is_some_and(|m| m.load_plugin(info, resolver));
        self.restore_connections(id, saved);
        self.sync_module(id)?;
        if ok {
            self.apply_deferred(id);
        }
        Ok(ok)
    }

    /// Connections held for plugins that are not loaded
    pub fn deferred_connections(&self) -> &[(PortRef, PortRef)] {
        &self.deferred
    }

    /// Keep `output -> input` until the unloaded plugin at either end loads
    pub fn defer_connection(&mut self, output: PortRef, input: PortRef) {
        if !self.deferred.contains(&(output, input)) {
            self.deferred.push((output, input));
        }
    }

    fn apply_deferred(&mut self, id: ModuleId) {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(from, to)| from.module == id || to.module == id);
        self.deferred = waiting;
        for (from, to) in ready {
            if let Err(e) = self.connect(from, to) {
                log::warn!("{}: saved connection {:?} -> {:?} dropped: {}", self.name, from, to, e);
            }
        }
    }

    /// Unload a module's backend, dropping its connections
    pub fn unload_module(&mut self, id: ModuleId) -> EngineResult<()> {
        self.take_connections(id)?;
        if let Some(module) = self.module_mut(id) {
            module.unload();
        }
        self.sync_module(id)
    }

    pub fn set_bypass(&mut self, id: ModuleId, bypass: bool) -> EngineResult<()> {
        self.module_mut(id)
            .ok_or(EngineError::NoSuchModule(id))?
            .set_bypass(bypass);
        Ok(())
    }

    fn sync_module(&mut self, id: ModuleId) -> EngineResult<()> {
        let client = self.client.clone();
        let prefix = self.name.clone();
        match self.module_mut(id) {
            Some(module) => module.sync_server_ports(client.as_deref(), &prefix),
            None => Err(EngineError::NoSuchModule(id)),
        }
    }

    // ─── Controllers ────────────────────────────────────────────────────────

    /// Drive the `control_input`th control input of `target` from
    /// `controller`
    pub fn bind_controller(&mut self, controller: ModuleId, target: ModuleId, control_input: usize) -> EngineResult<()> {
        if !self
            .module(controller)
            .ok_or(EngineError::NoSuchModule(controller))?
            .is_controller()
        {
            return Err(EngineError::NotAController(controller));
        }
        let index = self
            .module(target)
            .ok_or(EngineError::NoSuchModule(target))?
            .control_input(control_input)
            .ok_or(EngineError::NoSuchPort(PortRef::new(target, control_input)))?;
        self.connect(PortRef::new(controller, 0), PortRef::new(target, index))
    }

    /// Create a controller for a control input and bind it
    pub fn attach_controller(&mut self, target: ModuleId, control_input: usize) -> EngineResult<ModuleId> {
        let id = self.add_control(Module::controller(&self.ctx));
        if let Err(e) = self.bind_controller(id, target, control_input) {
            self.remove_module(id)?;
            return Err(e);
        }
        Ok(id)
    }

    /// Switch a controller between GUI and CV. CV mode needs the controller
    /// bound first; its auxiliary input is registered with the server at once.
    pub fn set_controller_mode(&mut self, controller: ModuleId, mode: ControlMode) -> EngineResult<()> {
        let module = self.module(controller).ok_or(EngineError::NoSuchModule(controller))?;
        let current = module
            .controller_mode()
            .ok_or(EngineError::NotAController(controller))?;
        if current == mode {
            return Ok(());
        }

        match mode {
            ControlMode::Cv => {
                let out = PortRef::new(controller, 0);
                let target = module
                    .port(0)
                    .and_then(Port::connection)
                    .ok_or(EngineError::NotConnected(out))?;
                let name = self.cv_port_name(target)?;
                if let Some((ctl, ports)) = self.module_mut(controller).and_then(Module::controller_parts) {
                    ctl.attach_cv_input(ports, name);
                }
            }
            ControlMode::Gui => {
                if let Some((ctl, ports)) = self.module_mut(controller).and_then(Module::controller_parts) {
                    ctl.detach_cv_input(ports);
                }
            }
        }
        if let Some(module) = self.module_mut(controller) {
            module.ports_changed();
        }
        log::info!("{}: controller {} now {:?}", self.name, controller, mode);
        self.sync_module(controller)
    }

    fn cv_port_name(&self, target: PortRef) -> EngineResult<String> {
        let module = self.module(target.module).ok_or(EngineError::NoSuchModule(target.module))?;
        let port = module.port(target.port).ok_or(EngineError::NoSuchPort(target))?;
        Ok(match self.number_of(target.module) {
            Some(_) => format!("CV-{}/{}", module.label(), port.name()),
            None => format!("CV-{}", port.name()),
        })
    }

    // ─── OSC paths ──────────────────────────────────────────────────────────

    /// `/strip/<chain>/<module label>/<port name>`, spaces as underscores
    pub fn osc_path(&self, port: PortRef) -> Option<String> {
        let module = self.module(port.module)?;
        let p = module.port(port.port)?;
        Some(format!(
            "{}{}/{}/{}",
            STRIP_PREFIX,
            escape(&self.name),
            escape(module.label()),
            escape(p.name())
        ))
    }

    /// `/strip/<chain>/<module number>/<control input number>`
    pub fn osc_number_path(&self, port: PortRef) -> Option<String> {
        let n = self.number_of(port.module)?;
        let m = self.modules[n].control_input_position(port.port)?;
        Some(format!("{}{}/{}/{}", STRIP_PREFIX, escape(&self.name), n, m))
    }

    /// Control input addressed by either path form
    pub fn resolve_osc_path(&self, path: &str) -> Option<PortRef> {
        let rest = path.strip_prefix(STRIP_PREFIX)?;
        let (chain, rest) = rest.split_once('/')?;
        if chain != escape(&self.name) {
            return None;
        }
        let (module, port) = rest.split_once('/')?;

        if let (Ok(n), Ok(m)) = (module.parse::<usize>(), port.parse::<usize>()) {
            let target = self.modules.get(n)?;
            return target.control_input(m).map(|i| PortRef::new(target.id(), i));
        }
        self.iter().find_map(|target| {
            if escape(target.label()) != module {
                return None;
            }
            target
                .layout()
                .control_in
                .iter()
                .find(|&&i| escape(target.ports()[i].name()) == port)
                .map(|&i| PortRef::new(target.id(), i))
        })
    }

    // ─── Real-time ──────────────────────────────────────────────────────────

    /// One forward pass. Does not allocate.
    pub fn process(&mut self, io: &mut dyn ServerIo, cycle: &Cycle) {
        let cycle = Cycle::new(cycle.frames.min(self.ctx.buffer_size), cycle.sample_rate);

        for i in 0..self.controls.len() {
            let (upstream, rest) = self.controls.split_at_mut(i);
            run_module(&mut rest[0], &[&*upstream], io, &cycle);
        }
        let controls: &[Module] = &self.controls;
        for i in 0..self.modules.len() {
            let (upstream, rest) = self.modules.split_at_mut(i);
            run_module(&mut rest[0], &[controls, &*upstream], io, &cycle);
        }
    }

    // ─── Server-facing ──────────────────────────────────────────────────────

    /// Non-RT. Resize every port buffer.
    pub fn set_buffer_size(&mut self, frames: usize) {
        self.ctx.buffer_size = frames;
        let event_capacity = self.ctx.event_capacity;
        for module in self.iter_mut() {
            module.buffer_size_changed(frames, event_capacity);
        }
    }

    pub fn sample_rate_change(&mut self, sample_rate: f32) {
        self.ctx.sample_rate = sample_rate;
        for module in self.iter_mut() {
            module.sample_rate_changed(sample_rate);
        }
    }

    /// Release server ports; logical ports and connections stay
    pub fn freeze_ports(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        for module in self.iter_mut() {
            module.freeze_ports(&*client);
        }
        log::debug!("{}: frozen", self.name);
    }

    /// Register every server port with `client` under this chain's name
    pub fn thaw_ports(&mut self, client: Arc<dyn ServerClient>) -> EngineResult<()> {
        let prefix = self.name.clone();
        let mut result = Ok(());
        for module in self.iter_mut() {
            if let Err(e) = module.thaw_ports(&*client, &prefix) {
                result = Err(e);
            }
        }
        self.client = Some(client);
        log::debug!("{}: thawed", self.name);
        result
    }

    /// Server reports an external (dis)connection between `a` and `b`
    pub fn port_connect(&mut self, a: &str, b: &str, connected: bool) {
        for module in self.iter_mut() {
            module.port_connection_changed(a, connected);
            module.port_connection_changed(b, connected);
        }
    }

    /// Total latency in frames through non-bypassed modules
    pub fn latency(&self) -> u32 {
        self.iter().map(Module::latency).sum()
    }

    /// Rename the chain and move its server ports along
    pub fn rename(&mut self, name: &str) -> EngineResult<()> {
        let client = self.client.clone();
        for module in self.iter_mut() {
            module.rename_server_ports(client.as_deref(), name)?;
        }
        log::info!("Renamed chain {} to {}", self.name, name);
        self.name = name.to_string();
        Ok(())
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("controls", &self.controls)
            .field("modules", &self.modules)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

pub(crate) fn escape(s: &str) -> String {
    s.replace(' ', "_")
}

fn find_port<'a>(upstream: &[&'a [Module]], peer: PortRef) -> Option<&'a Port> {
    upstream
        .iter()
        .flat_map(|modules| modules.iter())
        .find(|m| m.id() == peer.module)
        .and_then(|m| m.port(peer.port))
}

#[inline]
fn run_module(module: &mut Module, upstream: &[&[Module]], io: &mut dyn ServerIo, cycle: &Cycle) {
    for port in module.ports_mut().iter_mut().filter(|p| p.is_input()) {
        match port.connection().and_then(|peer| find_port(upstream, peer)) {
            Some(src) => port.pull_from(src, cycle.frames),
            // Control inputs keep their last value
            None => port.silence(),
        }
    }
    module.server_pull(&*io, cycle.frames);
    module.process(cycle);
    module.server_push(io, cycle.frames);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{MemoryServer, NullIo};
    use approx::assert_relative_eq;

    fn ctx() -> ModuleContext {
        ModuleContext {
            buffer_size: 32,
            ..ModuleContext::default()
        }
    }

    fn frozen_chain() -> Chain {
        Chain::new("Vox", &ctx())
    }

    #[test]
    fn test_upstream_output_visible_same_cycle() {
        let server = Arc::new(MemoryServer::new("test", 48000.0, 32));
        let mut chain = frozen_chain();
        let input = chain.add_module(Module::audio_input(1, &ctx()));
        let gain = chain.add_module(Module::gain(1, &ctx()));
        let pan = chain.add_module(Module::mono_pan(&ctx()));
        let output = chain.add_module(Module::audio_output(2, &ctx()));
        chain.thaw_ports(server.clone()).unwrap();

        chain.connect(PortRef::new(input, 0), PortRef::new(gain, 0)).unwrap();
        chain.connect(PortRef::new(gain, 1), PortRef::new(pan, 0)).unwrap();
        chain.connect(PortRef::new(pan, 1), PortRef::new(output, 0)).unwrap();
        chain.connect(PortRef::new(pan, 2), PortRef::new(output, 1)).unwrap();

        let mut io = server.io();
        let capture = server.port_by_name("Vox/out-1").unwrap();
        io.buffer_mut(capture).unwrap().fill(0.8);

        chain.process(&mut io, &Cycle::new(32, 48000.0));

        for name in ["Vox/in-1", "Vox/in-2"] {
            let out = io.buffer(server.port_by_name(name).unwrap()).unwrap();
            assert!(out.iter().all(|s| s.is_finite()));
            assert_relative_eq!(out[31], 0.4, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_backward_connection_rejected() {
        let mut chain = frozen_chain();
        let a = chain.add_module(Module::gain(1, &ctx()));
        let b = chain.add_module(Module::gain(1, &ctx()));

        assert!(matches!(
            chain.connect(PortRef::new(b, 1), PortRef::new(a, 0)),
            Err(EngineError::CyclicTopology { .. })
        ));
        assert!(matches!(
            chain.connect(PortRef::new(a, 1), PortRef::new(a, 0)),
            Err(EngineError::CyclicTopology { .. })
        ));
        assert!(chain.connections().is_empty());
    }

    #[test]
    fn test_connect_validation_order() {
        let mut chain = frozen_chain();
        let a = chain.add_module(Module::gain(1, &ctx()));
        let b = chain.add_module(Module::gain(1, &ctx()));

        assert!(matches!(
            chain.connect(PortRef::new(a, 9), PortRef::new(b, 0)),
            Err(EngineError::NoSuchPort(_))
        ));
        assert!(matches!(
            chain.connect(PortRef::new(a, 0), PortRef::new(b, 0)),
            Err(EngineError::DirectionMismatch)
        ));
        // Audio output into the gain control input
        assert!(matches!(
            chain.connect(PortRef::new(a, 1), PortRef::new(b, 2)),
            Err(EngineError::KindMismatch)
        ));
    }

    #[test]
    fn test_connect_replaces_and_disconnect_is_idempotent() {
        let mut chain = frozen_chain();
        let a = chain.add_module(Module::gain(1, &ctx()));
        let b = chain.add_module(Module::gain(1, &ctx()));
        let c = chain.add_module(Module::gain(1, &ctx()));

        chain.connect(PortRef::new(a, 1), PortRef::new(b, 0)).unwrap();
        chain.connect(PortRef::new(a, 1), PortRef::new(c, 0)).unwrap();
        assert!(!chain.port(PortRef::new(b, 0)).unwrap().connected());
        assert_eq!(chain.connections(), vec![(PortRef::new(a, 1), PortRef::new(c, 0))]);

        chain.disconnect(PortRef::new(c, 0)).unwrap();
        chain.disconnect(PortRef::new(c, 0)).unwrap();
        assert!(!chain.port(PortRef::new(a, 1)).unwrap().connected());
    }

    #[test]
    fn test_remove_module_clears_peers() {
        let mut chain = frozen_chain();
        let a = chain.add_module(Module::gain(1, &ctx()));
        let b = chain.add_module(Module::gain(1, &ctx()));
        chain.connect(PortRef::new(a, 1), PortRef::new(b, 0)).unwrap();

        let removed = chain.remove_module(b).unwrap();
        assert_eq!(removed.id(), b);
        assert!(!removed.ports()[0].connected());
        assert!(!chain.port(PortRef::new(a, 1)).unwrap().connected());
        assert!(matches!(chain.remove_module(b), Err(EngineError::NoSuchModule(_))));
    }

    #[test]
    fn test_insert_module_positions() {
        let mut chain = frozen_chain();
        let a = chain.add_module(Module::gain(1, &ctx()));
        let c = chain.add_module(Module::gain(1, &ctx()));
        let b = chain.insert_module(1, Module::meter(1, &ctx()));
        let ctl = chain.add_control(Module::controller(&ctx()));

        assert_eq!(chain.position(ctl), Some(0));
        assert_eq!(chain.position(a), Some(1));
        assert_eq!(chain.position(b), Some(2));
        assert_eq!(chain.position(c), Some(3));
        assert_eq!(chain.number_of(ctl), None);
        assert_eq!(chain.number_of(b), Some(1));
    }

    #[test]
    fn test_controller_drives_target() {
        let mut chain = frozen_chain();
        let gain = chain.add_module(Module::gain(1, &ctx()));
        let ctl = chain.attach_controller(gain, 0).unwrap();

        // Controller adopted the gain range
        let value = chain.set_control(PortRef::new(ctl, 0), 50.0).unwrap();
        assert_eq!(value, 6.0);

        chain.process(&mut NullIo, &Cycle::new(32, 48000.0));
        assert_eq!(chain.port(PortRef::new(gain, 2)).unwrap().control_value(), 6.0);

        // Setting the target moves the controller with it
        chain.set_control(PortRef::new(gain, 2), -10.0).unwrap();
        assert_eq!(chain.port(PortRef::new(ctl, 0)).unwrap().control_value(), -10.0);
    }

    #[test]
    fn test_set_control_leaves_plain_feeder_alone() {
        let mut chain = frozen_chain();
        let meter = chain.add_module(Module::meter(1, &ctx()));
        let gain = chain.add_module(Module::gain(1, &ctx()));
        chain.connect(PortRef::new(meter, 2), PortRef::new(gain, 2)).unwrap();
        let level = chain.port(PortRef::new(meter, 2)).unwrap().control_value();

        let applied = chain.set_control(PortRef::new(gain, 2), -10.0).unwrap();
        assert_eq!(applied, -10.0);
        assert_eq!(chain.port(PortRef::new(gain, 2)).unwrap().control_value(), -10.0);
        // The meter's reading is its own
        assert_eq!(chain.port(PortRef::new(meter, 2)).unwrap().control_value(), level);
    }

    #[test]
    fn test_push_control() {
        let mut chain = frozen_chain();
        let gain = chain.add_module(Module::gain(1, &ctx()));
        let ctl = chain.add_control(Module::controller(&ctx()));
        assert!(matches!(
            chain.push_control(PortRef::new(ctl, 0)),
            Err(EngineError::NotConnected(_))
        ));
        chain.bind_controller(ctl, gain, 1).unwrap();
        chain.set_control(PortRef::new(ctl, 0), 1.0).unwrap();
        chain.push_control(PortRef::new(ctl, 0)).unwrap();
        assert_eq!(chain.port(PortRef::new(gain, 3)).unwrap().control_value(), 1.0);
    }

    #[test]
    fn test_cv_mode_registers_one_aux_port() {
        let server = Arc::new(MemoryServer::new("test", 48000.0, 32));
        let mut chain = frozen_chain();
        let pan = chain.add_module(Module::mono_pan(&ctx()));
        chain.thaw_ports(server.clone()).unwrap();
        let ctl = chain.attach_controller(pan, 0).unwrap();
        let before = server.port_count();
        let wiring = chain.connections();

        chain.set_controller_mode(ctl, ControlMode::Cv).unwrap();
        assert_eq!(server.port_count(), before + 1);
        assert!(server.port_by_name("Vox/CV-Mono Pan/Pan").is_some());
        assert_eq!(chain.connections(), wiring);

        let mut io = server.io();
        let aux = server.port_by_name("Vox/CV-Mono Pan/Pan").unwrap();
        io.buffer_mut(aux).unwrap().fill(1.0);
        chain.process(&mut io, &Cycle::new(32, 48000.0));
        assert_relative_eq!(chain.port(PortRef::new(pan, 3)).unwrap().control_value(), 1.0);

        chain.set_controller_mode(ctl, ControlMode::Gui).unwrap();
        assert_eq!(server.port_count(), before);
        assert_eq!(chain.connections(), wiring);
        assert_eq!(chain.module(ctl).unwrap().ports().len(), 1);
    }

    #[test]
    fn test_cv_mode_needs_binding() {
        let mut chain = frozen_chain();
        let ctl = chain.add_control(Module::controller(&ctx()));
        let gain = chain.add_module(Module::gain(1, &ctx()));
        assert!(matches!(
            chain.set_controller_mode(ctl, ControlMode::Cv),
            Err(EngineError::NotConnected(_))
        ));
        assert!(matches!(
            chain.set_controller_mode(gain, ControlMode::Cv),
            Err(EngineError::NotAController(_))
        ));
    }

    #[test]
    fn test_cv_name_for_unnumbered_target() {
        let mut chain = frozen_chain();
        let first = chain.add_control(Module::controller(&ctx()));
        let second = chain.add_control(Module::controller(&ctx()));
        let target = chain.add_module(Module::gain(1, &ctx()));
        chain.bind_controller(second, target, 0).unwrap();
        // Targets among the controls have no number
        assert_eq!(chain.cv_port_name(PortRef::new(first, 0)).unwrap(), "CV-Value");
        assert_eq!(chain.cv_port_name(PortRef::new(target, 2)).unwrap(), "CV-Gain/Gain (dB)");
    }

    #[test]
    fn test_freeze_thaw_preserves_wiring() {
        let server = Arc::new(MemoryServer::new("test", 48000.0, 32));
        let mut chain = frozen_chain();
        let input = chain.add_module(Module::audio_input(2, &ctx()));
        let output = chain.add_module(Module::audio_output(2, &ctx()));
        chain.connect(PortRef::new(input, 0), PortRef::new(output, 0)).unwrap();
        chain.connect(PortRef::new(input, 1), PortRef::new(output, 1)).unwrap();
        chain.thaw_ports(server.clone()).unwrap();
        let names = server.port_names();
        let wiring = chain.connections();

        chain.freeze_ports();
        assert!(chain.is_frozen());
        assert_eq!(server.port_count(), 0);
        assert_eq!(chain.connections(), wiring);

        chain.thaw_ports(server.clone()).unwrap();
        assert_eq!(server.port_names(), names);
        assert_eq!(chain.connections(), wiring);
    }

    #[test]
    fn test_configure_inputs_keeps_surviving_connections() {
        let mut chain = frozen_chain();
        let src = chain.add_module(Module::audio_input(2, &ctx()));
        let pan = chain.add_module(Module::mono_pan(&ctx()));
        let out = chain.add_module(Module::audio_output(2, &ctx()));
        chain.connect(PortRef::new(src, 0), PortRef::new(pan, 0)).unwrap();
        chain.connect(PortRef::new(pan, 1), PortRef::new(out, 0)).unwrap();

        assert!(chain.configure_inputs(pan, 2).unwrap());
        let pan_module = chain.module(pan).unwrap();
        assert_eq!(pan_module.layout().audio_in.len(), 2);
        // in-1 still fed, out-1 still feeding (now at a shifted index)
        assert!(pan_module.ports()[0].connected());
        let out_index = pan_module.find_port("out-1").unwrap();
        assert_eq!(
            chain.port(PortRef::new(out, 0)).unwrap().connection(),
            Some(PortRef::new(pan, out_index))
        );
    }

    #[test]
    fn test_osc_paths() {
        let mut chain = Chain::new("Lead Vox", &ctx());
        let _meter = chain.add_module(Module::meter(1, &ctx()));
        let gain = chain.add_module(Module::gain(1, &ctx()));
        let port = PortRef::new(gain, 2);

        assert_eq!(chain.osc_path(port).unwrap(), "/strip/Lead_Vox/Gain/Gain_(dB)");
        assert_eq!(chain.osc_number_path(port).unwrap(), "/strip/Lead_Vox/1/0");
        assert_eq!(chain.resolve_osc_path("/strip/Lead_Vox/Gain/Gain_(dB)"), Some(port));
        assert_eq!(chain.resolve_osc_path("/strip/Lead_Vox/1/1"), Some(PortRef::new(gain, 3)));
        assert_eq!(chain.resolve_osc_path("/strip/Other/1/1"), None);
    }

    #[test]
    fn test_set_bypass() {
        let mut chain = frozen_chain();
        let a = chain.add_module(Module::gain(1, &ctx()));
        assert_eq!(chain.latency(), 0);
        chain.set_bypass(a, true).unwrap();
        assert!(chain.module(a).unwrap().bypass());
    }

    #[test]
    fn test_rename_moves_server_ports() {
        let server = Arc::new(MemoryServer::new("test", 48000.0, 32));
        let mut chain = frozen_chain();
        chain.add_module(Module::audio_output(1, &ctx()));
        chain.thaw_ports(server.clone()).unwrap();
        chain.rename("Bass").unwrap();
        assert_eq!(chain.name(), "Bass");
        assert_eq!(server.port_names(), vec!["Bass/in-1".to_string()]);
    }

    #[test]
    fn test_buffer_size_propagates() {
        let mut chain = frozen_chain();
        let a = chain.add_module(Module::gain(1, &ctx()));
        chain.set_buffer_size(128);
        assert_eq!(chain.buffer_size(), 128);
        assert_eq!(chain.port(PortRef::new(a, 0)).unwrap().buffer().unwrap().len(), 128);
        chain.sample_rate_change(44100.0);
        assert_eq!(chain.module(a).unwrap().sample_rate(), 44100.0);
    }
}

//! Project persistence
//!
//! A project is a JSON description of every group, chain and module plus the
//! OSC translation table. Each module record carries an ordered key/value
//! [`LogEntry`]; keys start with `:`.
//!
//! Restoring runs in two passes:
//! 1. build every module under its saved id, recording ids per chain
//! 2. resolve references (controller targets, connections) against that
//!    table
//!
//! A reference that does not resolve is reported in the [`RestoreReport`]
//! and skipped; restore itself never aborts part way.

use mx_control::TranslationTable;
use mx_core::{ModuleId, PortRef, MAX_CHANNELS};
use mx_plugin::{PluginFormat, PluginInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::builtin::ControlMode;
use crate::chain::Chain;
use crate::mixer::Mixer;
use crate::module::{Module, ModuleContext};
use crate::server::ServerClient;

pub const PROJECT_VERSION: u32 = 1;

const KEY_CHANNELS: &str = ":channels";
const KEY_PARAMETERS: &str = ":parameter_values";
const KEY_MODULE: &str = ":module";
const KEY_PORT: &str = ":port";
const KEY_MODE: &str = ":mode";
const KEY_FORMAT: &str = ":format";
const KEY_PLUGIN_ID: &str = ":plugin_id";
const KEY_PLUGIN_NAME: &str = ":plugin_name";
const KEY_PATH: &str = ":path";
const KEY_STATE: &str = ":state";

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Module {module} refers to missing module {target}")]
    UnresolvedModule { module: ModuleId, target: String },

    #[error("Module {module} has no port {port}")]
    UnresolvedPort { module: ModuleId, port: usize },

    #[error("Module {module} has unknown kind {kind}")]
    UnknownKind { module: ModuleId, kind: String },

    #[error("Module {module}: plugin {plugin} failed to load")]
    PluginLoad { module: ModuleId, plugin: String },

    #[error("Module {module}: state not restored: {message}")]
    State { module: ModuleId, message: String },

    #[error("Chain {chain} not added: {message}")]
    Chain { chain: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Project file error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProjectResult<T> = Result<T, RestoreError>;

/// What a restore built and what it had to skip
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub chains: usize,
    pub modules: usize,
    pub errors: Vec<RestoreError>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered key/value pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry(Vec<(String, Value)>);

impl LogEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value in place
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_f32s(&self, key: &str) -> Option<Vec<f32>> {
        self.get(key)?
            .as_array()?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub kind: String,
    pub id: ModuleId,
    pub label: String,
    #[serde(default)]
    pub bypass: bool,
    /// Lives among the chain's controls rather than its numbered modules
    #[serde(default)]
    pub control: bool,
    #[serde(default)]
    pub entry: LogEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub from: PortRef,
    pub to: PortRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub name: String,
    pub modules: Vec<ModuleRecord>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub chains: Vec<ChainRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub version: u32,
    pub groups: Vec<GroupRecord>,
    #[serde(default)]
    pub translations: TranslationTable,
}

impl ProjectFile {
    pub fn load<P: AsRef<Path>>(path: P) -> ProjectResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let project: Self = serde_json::from_str(&content)?;
        if project.version > PROJECT_VERSION {
            log::warn!(
                "Project {} is version {}, newer than {}",
                path.as_ref().display(),
                project.version,
                PROJECT_VERSION
            );
        }
        Ok(project)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> ProjectResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        log::info!("Saved project to {}", path.as_ref().display());
        Ok(())
    }

    // ─── Capture ────────────────────────────────────────────────────────────

    /// Describe everything `mixer` is running
    pub fn capture(mixer: &Mixer) -> Self {
        let groups = mixer
            .groups()
            .iter()
            .map(|group| GroupRecord {
                name: group.name().to_string(),
                chains: group.lock().iter().map(capture_chain).collect(),
            })
            .collect();
        Self {
            version: PROJECT_VERSION,
            groups,
            translations: mixer.translations(),
        }
    }

    // ─── Restore ────────────────────────────────────────────────────────────

    /// Rebuild this project inside `mixer`. Groups that do not exist yet
    /// are created on the client returned by `client_for`.
    pub fn restore(
        &self,
        mixer: &mut Mixer,
        mut client_for: impl FnMut(&str) -> Arc<dyn ServerClient>,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        let ctx = *mixer.context();

        for group in &self.groups {
            if mixer.group(&group.name).is_none() {
                mixer.add_group(&group.name, client_for(&group.name));
            }
            for record in &group.chains {
                let chain = restore_chain(record, mixer, &ctx, &mut report);
                let name = chain.name().to_string();
                match mixer.add_chain(&group.name, chain) {
                    Ok(()) => report.chains += 1,
                    Err(e) => report.errors.push(RestoreError::Chain {
                        chain: name,
                        message: e.to_string(),
                    }),
                }
            }
        }

        mixer.set_translations(self.translations.clone());
        log::info!(
            "Restored {} chains, {} modules ({} problems)",
            report.chains,
            report.modules,
            report.errors.len()
        );
        report
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CAPTURE
// ═══════════════════════════════════════════════════════════════════════════════

fn capture_chain(chain: &Chain) -> ChainRecord {
    let controllers: HashSet<ModuleId> = chain.iter().filter(|m| m.is_controller()).map(Module::id).collect();
    let modules = chain
        .controls()
        .iter()
        .map(|m| capture_module(chain, m, true))
        .chain(chain.modules().iter().map(|m| capture_module(chain, m, false)))
        .collect();
    // Controller wiring is carried by the controller's own record
    let connections = chain
        .connections()
        .into_iter()
        .filter(|(from, _)| !controllers.contains(&from.module))
        .chain(chain.deferred_connections().iter().copied())
        .map(|(from, to)| ConnectionRecord { from, to })
        .collect();
    ChainRecord {
        name: chain.name().to_string(),
        modules,
        connections,
    }
}

fn capture_module(chain: &Chain, module: &Module, control: bool) -> ModuleRecord {
    let mut entry = LogEntry::new();

    if let Some(info) = module.plugin_info() {
        entry.set(KEY_FORMAT, info.format.as_str());
        entry.set(KEY_PLUGIN_ID, info.id.as_str());
        entry.set(KEY_PLUGIN_NAME, info.name.as_str());
        entry.set(KEY_PATH, info.path.to_string_lossy().into_owned());
        match module.save_state() {
            Ok(state) => entry.set(KEY_STATE, hex::encode(state)),
            Err(e) => log::warn!("State of {} not saved: {}", module.label(), e),
        }
    } else if let Some(mode) = module.controller_mode() {
        let target = module.port(0).and_then(|p| p.connection());
        if let Some(target) = target {
            let index = chain
                .module(target.module)
                .and_then(|m| m.control_input_position(target.port));
            entry.set(KEY_MODULE, target.module.to_hex());
            if let Some(index) = index {
                entry.set(KEY_PORT, index as u64);
            }
        }
        entry.set(KEY_MODE, u64::from(mode.index()));
        entry.set(KEY_PARAMETERS, vec![module.port(0).map_or(0.0, |p| p.control_value())]);
    } else {
        let layout = module.layout();
        // Input count, except for sources which only have outputs
        let channels = if layout.audio_in.is_empty() {
            layout.audio_out.len()
        } else {
            layout.audio_in.len()
        };
        entry.set(KEY_CHANNELS, channels as u64);
        entry.set(KEY_PARAMETERS, module.parameter_values());
    }

    ModuleRecord {
        kind: module.kind_name().to_string(),
        id: module.id(),
        label: module.label().to_string(),
        bypass: module.bypass(),
        control,
        entry,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESTORE
// ═══════════════════════════════════════════════════════════════════════════════

fn restore_chain(record: &ChainRecord, mixer: &Mixer, ctx: &ModuleContext, report: &mut RestoreReport) -> Chain {
    let mut chain = Chain::new(&record.name, ctx);

    // Pass 1: build modules under their saved ids
    let mut built: HashSet<ModuleId> = HashSet::new();
    for m in &record.modules {
        let Some(module) = build_module(m, mixer, ctx, report) else {
            continue;
        };
        built.insert(m.id);
        report.modules += 1;
        if m.control {
            chain.add_control(module);
        } else {
            chain.add_module(module);
        }
    }

    // Pass 2: controller targets, then plain connections
    for m in record.modules.iter().filter(|m| m.kind == "controller" && built.contains(&m.id)) {
        bind_controller(&mut chain, m, &built, report);
    }
    for conn in &record.connections {
        for end in [conn.from, conn.to] {
            if !built.contains(&end.module) {
                report.errors.push(RestoreError::UnresolvedModule {
                    module: end.module,
                    target: end.module.to_hex(),
                });
            }
        }
        if !(built.contains(&conn.from.module) && built.contains(&conn.to.module)) {
            continue;
        }
        if let Err(e) = chain.connect(conn.from, conn.to) {
            log::warn!("{}: connection {:?} -> {:?} skipped: {}", record.name, conn.from, conn.to, e);
            let missing = if chain.port(conn.from).is_none() { conn.from } else { conn.to };
            report.errors.push(RestoreError::UnresolvedPort {
                module: missing.module,
                port: missing.port,
            });
            // Kept for when the missing plugin is installed
            if chain.module(missing.module).is_some_and(Module::is_unloaded_plugin) {
                chain.defer_connection(conn.from, conn.to);
            }
        }
    }
    chain
}

fn build_module(record: &ModuleRecord, mixer: &Mixer, ctx: &ModuleContext, report: &mut RestoreReport) -> Option<Module> {
    let channels = record
        .entry
        .get_i64(KEY_CHANNELS)
        .map_or(1, |n| n.clamp(1, MAX_CHANNELS as i64) as usize);
    let mut module = match record.kind.as_str() {
        "gain" => Module::gain(channels, ctx),
        "meter" => Module::meter(channels, ctx),
        "audio_input" => Module::audio_input(channels, ctx),
        "audio_output" => Module::audio_output(channels, ctx),
        "controller" => Module::controller(ctx),
        "mono_pan" => {
            let mut pan = Module::mono_pan(ctx);
            if channels > 1 {
                pan.configure_inputs(channels);
            }
            pan
        }
        "plugin" => return Some(build_plugin(record, mixer, ctx, report)),
        "placeholder" => Module::placeholder(&record.label, ctx),
        other => {
            report.errors.push(RestoreError::UnknownKind {
                module: record.id,
                kind: other.to_string(),
            });
            return None;
        }
    }
    .with_id(record.id);

    module.set_label(&record.label);
    module.set_bypass(record.bypass);
    if let Some(values) = record.entry.get_f32s(KEY_PARAMETERS) {
        if record.kind == "controller" {
            if let Some(port) = module.port_mut(0) {
                port.set_control_value(values.first().copied().unwrap_or_default());
            }
        } else {
            module.set_parameter_values(&values);
        }
    }
    Some(module)
}

/// A plugin that fails to load still comes back as its placeholder
fn build_plugin(record: &ModuleRecord, mixer: &Mixer, ctx: &ModuleContext, report: &mut RestoreReport) -> Module {
    let format = record
        .entry
        .get_str(KEY_FORMAT)
        .and_then(|f| PluginFormat::ALL.into_iter().find(|p| p.as_str() == f));
    let id = record.entry.get_str(KEY_PLUGIN_ID).unwrap_or_default();

    let mut module = match format {
        Some(format) => {
            let info = PluginInfo::new(
                format,
                id,
                record.entry.get_str(KEY_PLUGIN_NAME).unwrap_or(&record.label),
                PathBuf::from(record.entry.get_str(KEY_PATH).unwrap_or_default()),
            );
            Module::plugin(&info, mixer.resolver().clone(), ctx)
        }
        None => Module::placeholder(&record.label, ctx),
    }
    .with_id(record.id);
    module.set_label(&record.label);

    if module.backend().is_none() {
        report.errors.push(RestoreError::PluginLoad {
            module: record.id,
            plugin: id.to_string(),
        });
    }

    // A placeholder holds the state until its plugin loads
    if let Some(state) = record.entry.get_str(KEY_STATE).filter(|s| !s.is_empty()) {
        let restored = hex::decode(state)
            .map_err(|e| e.to_string())
            .and_then(|bytes| module.restore_state(&bytes).map_err(|e| e.to_string()));
        if let Err(message) = restored {
            report.errors.push(RestoreError::State {
                module: record.id,
                message,
            });
        }
    }
    module.set_bypass(record.bypass);
    module
}

fn bind_controller(chain: &mut Chain, record: &ModuleRecord, built: &HashSet<ModuleId>, report: &mut RestoreReport) {
    let Some(target) = record.entry.get_str(KEY_MODULE) else {
        return;
    };
    let Some(target_id) = ModuleId::from_hex(target).filter(|id| built.contains(id)) else {
        report.errors.push(RestoreError::UnresolvedModule {
            module: record.id,
            target: target.to_string(),
        });
        return;
    };
    let port = record.entry.get_i64(KEY_PORT).unwrap_or(0).max(0) as usize;
    if chain.bind_controller(record.id, target_id, port).is_err() {
        report.errors.push(RestoreError::UnresolvedPort {
            module: target_id,
            port,
        });
        return;
    }

    let mode = record
        .entry
        .get_i64(KEY_MODE)
        .and_then(ControlMode::from_index)
        .unwrap_or_default();
    if mode == ControlMode::Cv {
        if let Err(e) = chain.set_controller_mode(record.id, mode) {
            log::warn!("{}: controller {} left in GUI mode: {}", chain.name(), record.id, e);
        }
    }
}

//! Mixer: the groups of one instance plus remote-control addressing
//!
//! Every control input is addressable by an internal OSC path, either by
//! name (`/strip/<chain>/<module>/<port>`) or by number
//! (`/strip/<chain>/<n>/<m>`). External controllers reach those paths
//! through the shared [`ControlMap`] (translation table and learn slot).
//! Chain names are unique across all groups so a path names one port.

use mx_control::{ControlMap, LearnCompletion, TranslationTable, STRIP_PREFIX};
use mx_core::{EngineConfig, ModuleId, PortRef};
use mx_plugin::PluginResolver;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use crate::chain::{escape, Chain};
use crate::group::Group;
use crate::module::{Module, ModuleContext};
use crate::server::ServerClient;
use crate::{EngineError, EngineResult};

pub struct Mixer {
    config: EngineConfig,
    ctx: ModuleContext,
    groups: Vec<Arc<Group>>,
    control: Arc<Mutex<ControlMap>>,
    resolver: Arc<dyn PluginResolver>,
}

impl Mixer {
    pub fn new(config: EngineConfig, resolver: Arc<dyn PluginResolver>) -> EngineResult<Self> {
        config.validate()?;
        log::info!("Mixer {} starting", config.instance_name);
        Ok(Self {
            ctx: ModuleContext::from_config(&config),
            config,
            groups: Vec::new(),
            control: Arc::new(Mutex::new(ControlMap::new())),
            resolver,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    pub fn resolver(&self) -> &Arc<dyn PluginResolver> {
        &self.resolver
    }

    /// Translation table, learn slot and peers shared with the OSC listener
    pub fn control(&self) -> &Arc<Mutex<ControlMap>> {
        &self.control
    }

    // ─── Groups & chains ────────────────────────────────────────────────────

    pub fn add_group(&mut self, name: &str, client: Arc<dyn ServerClient>) -> Arc<Group> {
        let group = Arc::new(Group::new(name, client));
        self.groups.push(group.clone());
        group
    }

    pub fn remove_group(&mut self, name: &str) -> Option<Arc<Group>> {
        let index = self.groups.iter().position(|g| g.name() == name)?;
        Some(self.groups.remove(index))
    }

    pub fn group(&self, name: &str) -> Option<&Arc<Group>> {
        self.groups.iter().find(|g| g.name() == name)
    }

    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    /// Empty chain sized to this mixer's defaults
    pub fn new_chain(&self, name: &str) -> Chain {
        Chain::new(name, &self.ctx)
    }

    /// Group running the chain whose escaped name is `escaped`
    fn group_of_escaped(&self, escaped: &str) -> Option<(&Arc<Group>, String)> {
        self.groups.iter().find_map(|g| {
            g.lock()
                .iter()
                .find(|c| escape(c.name()) == escaped)
                .map(|c| (g, c.name().to_string()))
        })
    }

    fn group_of(&self, chain: &str) -> EngineResult<&Arc<Group>> {
        self.groups
            .iter()
            .find(|g| g.lock().iter().any(|c| c.name() == chain))
            .ok_or_else(|| EngineError::NoSuchChain(chain.to_string()))
    }

    fn chain_exists(&self, name: &str) -> bool {
        self.group_of_escaped(&escape(name)).is_some()
    }

    pub fn add_chain(&self, group: &str, chain: Chain) -> EngineResult<()> {
        if self.chain_exists(chain.name()) {
            return Err(EngineError::DuplicateChain(chain.name().to_string()));
        }
        self.group(group)
            .ok_or_else(|| EngineError::NoSuchChain(group.to_string()))?
            .add_chain(chain)
    }

    /// Detach a chain, dropping every translation that points into it
    pub fn remove_chain(&self, name: &str) -> EngineResult<Chain> {
        let chain = self.group_of(name)?.remove_chain(name)?;
        let prefix = chain_prefix(name);
        let mut map = self.control.lock();
        let stale: Vec<String> = map
            .table
            .iter()
            .filter(|(_, internal)| internal.starts_with(&prefix))
            .map(|(_, internal)| internal.to_string())
            .collect();
        for internal in stale {
            map.table.remove_destination(&internal);
        }
        Ok(chain)
    }

    /// Run `f` on the named chain with its group locked
    pub fn with_chain<R>(&self, chain: &str, f: impl FnOnce(&mut Chain) -> R) -> EngineResult<R> {
        self.group_of(chain)?.with_chain(chain, f)
    }

    /// Rename a chain; server ports and translations follow
    pub fn rename_chain(&self, old: &str, new: &str) -> EngineResult<()> {
        if self.chain_exists(new) {
            return Err(EngineError::DuplicateChain(new.to_string()));
        }
        self.with_chain(old, |chain| chain.rename(new))??;

        let (from, to) = (chain_prefix(old), chain_prefix(new));
        let mut map = self.control.lock();
        let moved: Vec<String> = map
            .table
            .iter()
            .filter(|(_, internal)| internal.starts_with(&from))
            .map(|(_, internal)| internal.to_string())
            .collect();
        for internal in moved {
            let renamed = format!("{}{}", to, &internal[from.len()..]);
            map.table.rename_destination(&internal, &renamed);
        }
        Ok(())
    }

    /// Remove a module and every translation bound to its control inputs
    pub fn remove_module(&self, chain: &str, id: ModuleId) -> EngineResult<Module> {
        let (module, paths) = self.with_chain(chain, |c| {
            let paths = control_paths(c, id);
            c.remove_module(id).map(|m| (m, paths))
        })??;
        let mut map = self.control.lock();
        for path in paths {
            map.table.remove_destination(&path);
        }
        Ok(module)
    }

    // ─── Control paths ──────────────────────────────────────────────────────

    /// Apply `value` to the control input at internal `path`. Returns the
    /// value after clamping to the port's range.
    pub fn set_control(&self, path: &str, value: f32) -> EngineResult<f32> {
        let escaped = path
            .strip_prefix(STRIP_PREFIX)
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| EngineError::NoSuchPath(path.to_string()))?;
        let (group, chain) = self
            .group_of_escaped(escaped)
            .ok_or_else(|| EngineError::NoSuchPath(path.to_string()))?;
        group.with_chain(&chain, |c| {
            let port = c
                .resolve_osc_path(path)
                .ok_or_else(|| EngineError::NoSuchPath(path.to_string()))?;
            c.set_control(port, value)
        })?
    }

    /// Internal path of `port`, numbered when learn-by-number is configured
    pub fn control_path(&self, chain: &str, port: PortRef) -> EngineResult<String> {
        let by_number = self.config.osc.learn_by_number;
        self.with_chain(chain, |c| {
            let path = if by_number {
                c.osc_number_path(port)
            } else {
                c.osc_path(port)
            };
            path.ok_or(EngineError::NoSuchPort(port))
        })?
    }

    // ─── Learn & translations ───────────────────────────────────────────────

    /// Bind the next external path (from `peer`, or anyone) to `port`.
    /// Returns the internal path that was armed.
    pub fn learn(
        &self,
        chain: &str,
        port: PortRef,
        peer: Option<&str>,
        completion: LearnCompletion,
    ) -> EngineResult<String> {
        let path = self.control_path(chain, port)?;
        self.control.lock().learn.arm(&path, peer, completion);
        Ok(path)
    }

    pub fn cancel_learn(&self) {
        self.control.lock().learn.disarm();
    }

    pub fn add_translation(&self, external: &str, internal: &str) {
        self.control.lock().table.add_translation(external, internal);
    }

    pub fn del_translation(&self, external: &str) -> Option<String> {
        self.control.lock().table.del_translation(external)
    }

    pub fn translations(&self) -> TranslationTable {
        self.control.lock().table.clone()
    }

    pub fn set_translations(&self, table: TranslationTable) {
        self.control.lock().table = table;
    }

    pub fn save_translations(&self, path: &Path) -> EngineResult<()> {
        Ok(self.control.lock().table.save(path)?)
    }

    pub fn load_translations(&self, path: &Path) -> EngineResult<usize> {
        let table = TranslationTable::load(path)?;
        let count = table.len();
        self.set_translations(table);
        log::info!("Loaded {} translations from {}", count, path.display());
        Ok(count)
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("instance", &self.config.instance_name)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

fn chain_prefix(chain: &str) -> String {
    format!("{}{}/", STRIP_PREFIX, escape(chain))
}

/// Both path forms of every control input on `id`
fn control_paths(chain: &Chain, id: ModuleId) -> Vec<String> {
    let Some(module) = chain.module(id) else {
        return Vec::new();
    };
    module
        .layout()
        .control_in
        .iter()
        .flat_map(|&i| {
            let port = PortRef::new(id, i);
            [chain.osc_path(port), chain.osc_number_path(port)]
        })
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::MemoryServer;
    use mx_control::LearnOutcome;
    use mx_plugin::PluginRegistry;

    fn setup(learn_by_number: bool) -> (Mixer, ModuleId) {
        let mut config = EngineConfig::default();
        config.osc.learn_by_number = learn_by_number;
        let mut mixer = Mixer::new(config, Arc::new(PluginRegistry::new())).unwrap();
        let server = Arc::new(MemoryServer::new("test", 48000.0, 64));
        mixer.add_group("main", server);

        let mut chain = mixer.new_chain("Lead Vox");
        let gain = chain.add_module(Module::gain(1, mixer.context()));
        mixer.add_chain("main", chain).unwrap();
        (mixer, gain)
    }

    #[test]
    fn test_set_control_by_both_paths() {
        let (mixer, gain) = setup(false);
        assert_eq!(mixer.set_control("/strip/Lead_Vox/Gain/Gain_(dB)", -12.0).unwrap(), -12.0);
        assert_eq!(mixer.set_control("/strip/Lead_Vox/0/1", 1.0).unwrap(), 1.0);
        let values = mixer
            .with_chain("Lead Vox", |c| c.module(gain).unwrap().parameter_values())
            .unwrap();
        assert_eq!(values, vec![-12.0, 1.0]);

        assert!(matches!(
            mixer.set_control("/strip/Nope/Gain/Gain_(dB)", 0.0),
            Err(EngineError::NoSuchPath(_))
        ));
        assert!(matches!(mixer.set_control("/fader", 0.0), Err(EngineError::NoSuchPath(_))));
    }

    #[test]
    fn test_learn_arms_name_or_number_path() {
        let (mixer, gain) = setup(false);
        let path = mixer
            .learn("Lead Vox", PortRef::new(gain, 2), None, Box::new(|_: LearnOutcome| {}))
            .unwrap();
        assert_eq!(path, "/strip/Lead_Vox/Gain/Gain_(dB)");
        assert_eq!(mixer.control().lock().learn.target(), Some(path.as_str()));

        let (mixer, gain) = setup(true);
        let path = mixer
            .learn("Lead Vox", PortRef::new(gain, 3), None, Box::new(|_: LearnOutcome| {}))
            .unwrap();
        assert_eq!(path, "/strip/Lead_Vox/0/1");
        mixer.cancel_learn();
        assert!(!mixer.control().lock().learn.is_armed());
    }

    #[test]
    fn test_translation_add_delete() {
        let (mixer, _) = setup(false);
        mixer.add_translation("/p", "/strip/Lead_Vox/Gain/Gain_(dB)");
        mixer.add_translation("/r", "/strip/Lead_Vox/Gain/Mute");
        assert_eq!(mixer.del_translation("/p").as_deref(), Some("/strip/Lead_Vox/Gain/Gain_(dB)"));
        let table = mixer.translations();
        assert_eq!(table.lookup("/p"), None);
        assert_eq!(table.lookup("/r"), Some("/strip/Lead_Vox/Gain/Mute"));
    }

    #[test]
    fn test_remove_module_drops_translations() {
        let (mixer, gain) = setup(false);
        mixer.add_translation("/fader/1", "/strip/Lead_Vox/Gain/Gain_(dB)");
        mixer.add_translation("/button/1", "/strip/Lead_Vox/0/1");
        mixer.add_translation("/other", "/strip/Bass/Gain/Gain_(dB)");

        let module = mixer.remove_module("Lead Vox", gain).unwrap();
        assert_eq!(module.id(), gain);
        let table = mixer.translations();
        assert_eq!(table.len(), 1);
        assert!(table.lookup("/other").is_some());
    }

    #[test]
    fn test_rename_chain_moves_translations() {
        let (mixer, _) = setup(false);
        mixer.add_translation("/fader/1", "/strip/Lead_Vox/Gain/Gain_(dB)");
        mixer.rename_chain("Lead Vox", "Backing").unwrap();
        assert_eq!(
            mixer.translations().lookup("/fader/1"),
            Some("/strip/Backing/Gain/Gain_(dB)")
        );
        assert_eq!(mixer.set_control("/strip/Backing/Gain/Gain_(dB)", -3.0).unwrap(), -3.0);
        assert!(matches!(
            mixer.with_chain("Lead Vox", |_| ()),
            Err(EngineError::NoSuchChain(_))
        ));
    }

    #[test]
    fn test_chain_names_unique_across_groups() {
        let (mut mixer, _) = setup(false);
        mixer.add_group("aux", Arc::new(MemoryServer::new("aux", 48000.0, 64)));
        let dup = mixer.new_chain("Lead Vox");
        assert!(matches!(mixer.add_chain("aux", dup), Err(EngineError::DuplicateChain(_))));
    }

    #[test]
    fn test_remove_chain_drops_translations() {
        let (mixer, _) = setup(false);
        mixer.add_translation("/fader/1", "/strip/Lead_Vox/Gain/Gain_(dB)");
        let chain = mixer.remove_chain("Lead Vox").unwrap();
        assert_eq!(chain.name(), "Lead Vox");
        assert!(mixer.translations().is_empty());
    }

    #[test]
    fn test_translations_file_roundtrip() {
        let (mixer, _) = setup(false);
        mixer.add_translation("/fader/1", "/strip/Lead_Vox/Gain/Gain_(dB)");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("translations.json");
        mixer.save_translations(&path).unwrap();
        mixer.del_translation("/fader/1");
        assert_eq!(mixer.load_translations(&path).unwrap(), 1);
        assert!(mixer.translations().lookup("/fader/1").is_some());
    }
}

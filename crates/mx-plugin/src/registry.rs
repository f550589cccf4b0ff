//! Plugin resolution
//!
//! A [`PluginResolver`] turns a [`PluginInfo`] into a live instance. The
//! [`PluginRegistry`] resolves from in-process factories, keyed by format
//! and plugin id; [`DynamicLoader`](crate::DynamicLoader) resolves from
//! binaries on disk.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::native::NativeInstance;
use crate::scanner::{PluginFormat, PluginInfo};
use crate::{PluginError, PluginResult};

/// Builds a fresh instance at the given sample rate
pub type InstanceFactory =
    Arc<dyn Fn(&PluginInfo, f32) -> PluginResult<Box<dyn NativeInstance>> + Send + Sync>;

/// Resolves a plugin description into a live instance
pub trait PluginResolver: Send + Sync {
    fn instantiate(&self, info: &PluginInfo, sample_rate: f32) -> PluginResult<Box<dyn NativeInstance>>;
}

/// In-process plugin factories
#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<(PluginFormat, String), InstanceFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `(format, id)`
    pub fn register<F>(&self, format: PluginFormat, id: &str, factory: F)
    where
        F: Fn(&PluginInfo, f32) -> PluginResult<Box<dyn NativeInstance>> + Send + Sync + 'static,
    {
        log::debug!("Registered {} plugin {}", format.as_str(), id);
        self.factories
            .write()
            .insert((format, id.to_string()), Arc::new(factory));
    }

    pub fn unregister(&self, format: PluginFormat, id: &str) -> bool {
        self.factories
            .write()
            .remove(&(format, id.to_string()))
            .is_some()
    }

    pub fn contains(&self, format: PluginFormat, id: &str) -> bool {
        self.factories.read().contains_key(&(format, id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl PluginResolver for PluginRegistry {
    fn instantiate(&self, info: &PluginInfo, sample_rate: f32) -> PluginResult<Box<dyn NativeInstance>> {
        // Factory runs without the registry lock held
        let factory = self
            .factories
            .read()
            .get(&(info.format, info.id.clone()))
            .cloned()
            .ok_or_else(|| PluginError::NotFound(format!("{} {}", info.format.as_str(), info.id)))?;
        factory(info, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeDescriptor;
    use crate::NativeParamId;
    use mx_core::Sample;

    struct Silent(NativeDescriptor);

    impl NativeInstance for Silent {
        fn descriptor(&self) -> &NativeDescriptor {
            &self.0
        }
        fn activate(&mut self, _sample_rate: f32, _max_frames: usize) -> PluginResult<()> {
            Ok(())
        }
        fn deactivate(&mut self) {}
        fn set_param(&mut self, _id: &NativeParamId, _value: f32) {}
        fn get_param(&self, _id: &NativeParamId) -> f32 {
            0.0
        }
        fn process(&mut self, _inputs: &[&[Sample]], outputs: &mut [&mut [Sample]], _frames: usize) {
            for out in outputs.iter_mut() {
                out.fill(0.0);
            }
        }
    }

    #[test]
    fn test_register_and_instantiate() {
        let registry = PluginRegistry::new();
        registry.register(PluginFormat::Clap, "org.example.silent", |info, _sr| {
            Ok(Box::new(Silent(NativeDescriptor {
                name: info.name.clone(),
                ..Default::default()
            })) as Box<dyn NativeInstance>)
        });
        assert!(registry.contains(PluginFormat::Clap, "org.example.silent"));
        assert!(!registry.contains(PluginFormat::Vst3, "org.example.silent"));

        let info = PluginInfo::new(PluginFormat::Clap, "org.example.silent", "Silent", Default::default());
        let inst = registry.instantiate(&info, 48000.0).unwrap();
        assert_eq!(inst.descriptor().name, "Silent");
    }

    #[test]
    fn test_unknown_plugin_not_found() {
        let registry = PluginRegistry::new();
        let info = PluginInfo::new(PluginFormat::Lv2, "urn:missing", "Missing", Default::default());
        assert!(matches!(registry.instantiate(&info, 48000.0), Err(PluginError::NotFound(_))));
    }

    #[test]
    fn test_unregister() {
        let registry = PluginRegistry::new();
        registry.register(PluginFormat::Vst2, "abcd", |_, _| Err(PluginError::InitFailed("nope".into())));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(PluginFormat::Vst2, "abcd"));
        assert!(registry.is_empty());
    }
}

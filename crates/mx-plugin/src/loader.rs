//! Dynamic plugin loader
//!
//! Opens plugin binaries with `libloading` and checks them before anything
//! is instantiated:
//! - the binary (or the one inside a bundle) must exist and load
//! - the format's entry symbol must be exported
//! - CLAP entries must declare `clap_version` major >= 1
//! - LV2 libraries must actually describe the requested URI
//!
//! LADSPA instances are created here through the C ABI. The other formats
//! are handed to a bridge registered for that format; without one the load
//! fails with `UnsupportedFormat`.

use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ladspa_sys::LadspaInstance;
use crate::native::NativeInstance;
use crate::registry::PluginResolver;
use crate::scanner::{PluginFormat, PluginInfo};
use crate::{PluginError, PluginResult};

#[repr(C)]
struct ClapVersion {
    major: u32,
    minor: u32,
    revision: u32,
}

/// Leading fields of `clap_plugin_entry`
#[repr(C)]
struct ClapEntryHeader {
    clap_version: ClapVersion,
}

/// Leading field of `LV2_Descriptor`
#[repr(C)]
struct Lv2DescriptorHeader {
    uri: *const c_char,
}

type Lv2DescriptorFn = unsafe extern "C" fn(u32) -> *const Lv2DescriptorHeader;

/// Resolves plugins from binaries on disk
#[derive(Default)]
pub struct DynamicLoader {
    bridges: HashMap<PluginFormat, Arc<dyn PluginResolver>>,
    libraries: parking_lot::Mutex<HashMap<PathBuf, Arc<Library>>>,
}

impl DynamicLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route validated binaries of `format` to `bridge` for instantiation
    pub fn with_bridge(mut self, format: PluginFormat, bridge: Arc<dyn PluginResolver>) -> Self {
        self.bridges.insert(format, bridge);
        self
    }

    /// The shared library inside a plugin file or bundle
    pub fn resolve_binary(info: &PluginInfo) -> PluginResult<PathBuf> {
        let path = &info.path;
        if path.is_file() {
            return Ok(path.clone());
        }
        if !path.is_dir() {
            return Err(PluginError::NotFound(path.display().to_string()));
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PluginError::NotFound(path.display().to_string()))?;

        let candidates: Vec<PathBuf> = match info.format {
            PluginFormat::Vst3 | PluginFormat::Clap => vec![
                path.join("Contents").join(vst3_arch_dir()).join(format!("{stem}.so")),
                path.join("Contents").join("MacOS").join(stem),
                path.join("Contents").join("x86_64-win").join(format!("{stem}.vst3")),
            ],
            _ => Vec::new(),
        };
        if let Some(found) = candidates.into_iter().find(|c| c.is_file()) {
            return Ok(found);
        }

        // Any shared object directly inside the bundle (LV2 layout)
        std::fs::read_dir(path)?
            .flatten()
            .map(|e| e.path())
            .find(|p| p.extension().is_some_and(|e| e == "so" || e == "dylib" || e == "dll"))
            .ok_or_else(|| PluginError::NotFound(format!("no binary in {}", path.display())))
    }

    fn open(&self, binary: &Path) -> PluginResult<Arc<Library>> {
        let mut libraries = self.libraries.lock();
        if let Some(lib) = libraries.get(binary) {
            return Ok(lib.clone());
        }
        log::info!("Loading plugin library {:?}", binary);
        let library = unsafe { Library::new(binary) }
            .map_err(|e| PluginError::LoadFailed(format!("{}: {e}", binary.display())))?;
        let library = Arc::new(library);
        libraries.insert(binary.to_path_buf(), library.clone());
        Ok(library)
    }

    fn check_entry(library: &Library, info: &PluginInfo, binary: &Path) -> PluginResult<()> {
        let format = info.format;
        let missing = || PluginError::MissingSymbol {
            symbol: format.entry_symbol().to_string(),
            path: binary.display().to_string(),
        };

        match format {
            PluginFormat::Clap => {
                let entry: Symbol<*const ClapEntryHeader> =
                    unsafe { library.get(b"clap_entry\0") }.map_err(|_| missing())?;
                let entry = *entry;
                if entry.is_null() {
                    return Err(missing());
                }
                let version = unsafe { &(*entry).clap_version };
                if version.major < 1 {
                    return Err(PluginError::AbiMismatch(format!(
                        "CLAP {}.{}.{} predates 1.0",
                        version.major, version.minor, version.revision
                    )));
                }
            }
            PluginFormat::Lv2 => {
                let entry: Symbol<Lv2DescriptorFn> =
                    unsafe { library.get(b"lv2_descriptor\0") }.map_err(|_| missing())?;
                let mut index = 0u32;
                loop {
                    let desc = unsafe { entry(index) };
                    if desc.is_null() {
                        return Err(PluginError::NotFound(format!("LV2 URI {} in {}", info.id, binary.display())));
                    }
                    let uri = unsafe { (*desc).uri };
                    if !uri.is_null() && unsafe { CStr::from_ptr(uri) }.to_bytes() == info.id.as_bytes() {
                        break;
                    }
                    index += 1;
                }
            }
            PluginFormat::Vst2 => {
                let has_main = unsafe { library.get::<*const c_void>(b"VSTPluginMain\0") }.is_ok()
                    || unsafe { library.get::<*const c_void>(b"main\0") }.is_ok();
                if !has_main {
                    return Err(missing());
                }
            }
            PluginFormat::Vst3 => {
                unsafe { library.get::<*const c_void>(b"GetPluginFactory\0") }.map_err(|_| missing())?;
            }
            PluginFormat::Ladspa => {
                unsafe { library.get::<*const c_void>(b"ladspa_descriptor\0") }.map_err(|_| missing())?;
            }
        }
        Ok(())
    }
}

/// Architecture directory inside VST3/CLAP bundles (`x86_64-linux`)
fn vst3_arch_dir() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

impl PluginResolver for DynamicLoader {
    fn instantiate(&self, info: &PluginInfo, sample_rate: f32) -> PluginResult<Box<dyn NativeInstance>> {
        let binary = Self::resolve_binary(info)?;
        let library = self.open(&binary)?;
        Self::check_entry(&library, info, &binary)?;

        match info.format {
            PluginFormat::Ladspa => Ok(Box::new(LadspaInstance::instantiate(library, &info.id, sample_rate)?)),
            format => match self.bridges.get(&format) {
                Some(bridge) => bridge.instantiate(info, sample_rate),
                None => Err(PluginError::UnsupportedFormat(format!(
                    "no {} bridge registered for {}",
                    format.as_str(),
                    info.id
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_not_found() {
        let info = PluginInfo::new(PluginFormat::Ladspa, "1049", "Delay", PathBuf::from("/nonexistent/delay.so"));
        let err = DynamicLoader::new().instantiate(&info, 48000.0).err().unwrap();
        assert!(matches!(err, PluginError::NotFound(_)));
    }

    #[test]
    fn test_garbage_binary_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.so");
        std::fs::write(&path, b"\x7fELF but not really").unwrap();
        let info = PluginInfo::new(PluginFormat::Vst2, "Abcd", "Broken", path);
        let err = DynamicLoader::new().instantiate(&info, 48000.0).err().unwrap();
        assert!(matches!(err, PluginError::LoadFailed(_)));
    }

    #[test]
    fn test_vst3_bundle_binary_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("Comp.vst3");
        let arch = bundle.join("Contents").join(vst3_arch_dir());
        std::fs::create_dir_all(&arch).unwrap();
        std::fs::write(arch.join("Comp.so"), b"").unwrap();

        let info = PluginInfo::new(PluginFormat::Vst3, "comp", "Comp", bundle);
        let binary = DynamicLoader::resolve_binary(&info).unwrap();
        assert_eq!(binary, arch.join("Comp.so"));
    }

    #[test]
    fn test_lv2_bundle_binary_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("amp.lv2");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("manifest.ttl"), b"").unwrap();
        std::fs::write(bundle.join("amp.so"), b"").unwrap();

        let info = PluginInfo::new(PluginFormat::Lv2, "urn:amp", "Amp", bundle.clone());
        assert_eq!(DynamicLoader::resolve_binary(&info).unwrap(), bundle.join("amp.so"));
    }

    #[test]
    fn test_empty_bundle_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("empty.clap");
        std::fs::create_dir_all(&bundle).unwrap();
        let info = PluginInfo::new(PluginFormat::Clap, "x", "Empty", bundle);
        assert!(matches!(DynamicLoader::resolve_binary(&info), Err(PluginError::NotFound(_))));
    }
}

//! Plugin Scanner
//!
//! Lists candidate plugins in the standard per-format locations plus any
//! configured directories:
//! - LADSPA: `LADSPA_PATH`, /usr/lib/ladspa, ~/.ladspa
//! - LV2: `LV2_PATH`, /usr/lib/lv2, ~/.lv2
//! - VST2: `VST_PATH`, /usr/lib/vst, ~/.vst
//! - VST3: /usr/lib/vst3, ~/.vst3
//! - CLAP: `CLAP_PATH`, /usr/lib/clap, ~/.clap
//!
//! LADSPA libraries are opened and every descriptor in them is listed.
//! Other formats are listed per binary/bundle; their metadata is filled in
//! when a bridge instantiates them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mx_core::PluginPaths;

use crate::{ladspa_sys, PluginResult};

/// Plugin format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginFormat {
    Ladspa,
    Lv2,
    Vst2,
    Vst3,
    Clap,
}

impl PluginFormat {
    pub const ALL: [PluginFormat; 5] = [Self::Ladspa, Self::Lv2, Self::Vst2, Self::Vst3, Self::Clap];

    /// File or bundle extension
    pub fn extension(self) -> &'static str {
        match self {
            Self::Ladspa | Self::Vst2 => "so",
            Self::Lv2 => "lv2",
            Self::Vst3 => "vst3",
            Self::Clap => "clap",
        }
    }

    /// Exported symbol every binary of this format must provide
    pub fn entry_symbol(self) -> &'static str {
        match self {
            Self::Ladspa => "ladspa_descriptor",
            Self::Lv2 => "lv2_descriptor",
            Self::Vst2 => "VSTPluginMain",
            Self::Vst3 => "GetPluginFactory",
            Self::Clap => "clap_entry",
        }
    }

    /// Environment variable holding a colon-separated search path
    fn path_env(self) -> Option<&'static str> {
        match self {
            Self::Ladspa => Some("LADSPA_PATH"),
            Self::Lv2 => Some("LV2_PATH"),
            Self::Vst2 => Some("VST_PATH"),
            Self::Vst3 => None,
            Self::Clap => Some("CLAP_PATH"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ladspa => "LADSPA",
            Self::Lv2 => "LV2",
            Self::Vst2 => "VST2",
            Self::Vst3 => "VST3",
            Self::Clap => "CLAP",
        }
    }
}

/// Plugin category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PluginCategory {
    Effect,
    Instrument,
    Analyzer,
    Utility,
    #[default]
    Unknown,
}

/// What is known about a plugin before it is instantiated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub format: PluginFormat,
    /// Unique id: LADSPA unique id, LV2 URI, VST2 four-char code, VST3 class id, CLAP id
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub category: PluginCategory,
    /// Binary or bundle path (empty for in-process plugins)
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub audio_inputs: u32,
    #[serde(default)]
    pub audio_outputs: u32,
    #[serde(default)]
    pub midi_inputs: u32,
    #[serde(default)]
    pub midi_outputs: u32,
}

impl PluginInfo {
    pub fn new(format: PluginFormat, id: &str, name: &str, path: PathBuf) -> Self {
        Self {
            format,
            id: id.to_string(),
            name: name.to_string(),
            vendor: String::new(),
            category: PluginCategory::Unknown,
            path,
            audio_inputs: 0,
            audio_outputs: 0,
            midi_inputs: 0,
            midi_outputs: 0,
        }
    }
}

/// Plugin scanner
pub struct PluginScanner {
    plugins: Vec<PluginInfo>,
    plugin_map: HashMap<(PluginFormat, String), usize>,
    scan_paths: Vec<(PluginFormat, PathBuf)>,
}

impl PluginScanner {
    /// Scanner over the standard locations
    pub fn new() -> Self {
        let mut scanner = Self {
            plugins: Vec::new(),
            plugin_map: HashMap::new(),
            scan_paths: Vec::new(),
        };
        for format in PluginFormat::ALL {
            for path in Self::default_paths(format) {
                scanner.add_path(format, path);
            }
        }
        scanner
    }

    /// Scanner over configured directories only
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
            plugin_map: HashMap::new(),
            scan_paths: Vec::new(),
        }
    }

    /// Configured directories first, then standard ones
    pub fn with_paths(paths: &PluginPaths) -> Self {
        let mut scanner = Self::empty();
        let configured = [
            (PluginFormat::Ladspa, &paths.ladspa),
            (PluginFormat::Lv2, &paths.lv2),
            (PluginFormat::Vst2, &paths.vst2),
            (PluginFormat::Vst3, &paths.vst3),
            (PluginFormat::Clap, &paths.clap),
        ];
        for (format, dirs) in configured {
            for dir in dirs {
                scanner.add_path(format, dir.clone());
            }
        }
        for format in PluginFormat::ALL {
            for path in Self::default_paths(format) {
                scanner.add_path(format, path);
            }
        }
        scanner
    }

    /// Standard search directories for a format on this platform
    pub fn default_paths(format: PluginFormat) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(var) = format.path_env() {
            if let Ok(value) = std::env::var(var) {
                paths.extend(std::env::split_paths(&value));
            }
        }

        let dir = match format {
            PluginFormat::Ladspa => "ladspa",
            PluginFormat::Lv2 => "lv2",
            PluginFormat::Vst2 => "vst",
            PluginFormat::Vst3 => "vst3",
            PluginFormat::Clap => "clap",
        };

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib").join(dir));
            paths.push(PathBuf::from("/usr/local/lib").join(dir));
            if let Some(home) = dirs_next::home_dir() {
                paths.push(home.join(format!(".{dir}")));
            }
        }

        #[cfg(target_os = "macos")]
        {
            let bundle_dir = match format {
                PluginFormat::Ladspa => "LADSPA",
                PluginFormat::Lv2 => "LV2",
                PluginFormat::Vst2 => "VST",
                PluginFormat::Vst3 => "VST3",
                PluginFormat::Clap => "CLAP",
            };
            paths.push(PathBuf::from("/Library/Audio/Plug-Ins").join(bundle_dir));
            if let Some(home) = dirs_next::home_dir() {
                paths.push(home.join("Library/Audio/Plug-Ins").join(bundle_dir));
            }
            let _ = dir;
        }

        #[cfg(target_os = "windows")]
        {
            paths.push(PathBuf::from("C:\\Program Files\\Common Files").join(dir.to_uppercase()));
        }

        paths
    }

    /// Add a directory to scan (duplicates ignored)
    pub fn add_path(&mut self, format: PluginFormat, path: PathBuf) {
        if !self.scan_paths.iter().any(|(f, p)| *f == format && *p == path) {
            self.scan_paths.push((format, path));
        }
    }

    pub fn scan_paths(&self) -> &[(PluginFormat, PathBuf)] {
        &self.scan_paths
    }

    /// Scan all configured paths
    pub fn scan_all(&mut self) -> PluginResult<Vec<PluginInfo>> {
        self.plugins.clear();
        self.plugin_map.clear();

        for (format, path) in self.scan_paths.clone() {
            if path.is_dir() {
                self.scan_directory(&path, format)?;
            }
        }

        log::info!("Found {} plugins", self.plugins.len());
        Ok(self.plugins.clone())
    }

    fn scan_directory(&mut self, path: &Path, format: PluginFormat) -> PluginResult<()> {
        let extension = format.extension();

        for entry in std::fs::read_dir(path)?.flatten() {
            let entry_path = entry.path();
            if entry_path.extension().is_none_or(|e| e != extension) {
                continue;
            }
            match Self::scan_plugin(&entry_path, format) {
                Ok(found) => {
                    for info in found {
                        log::debug!("Found {} plugin: {} at {:?}", format.as_str(), info.name, entry_path);
                        self.insert(info);
                    }
                }
                Err(e) => log::warn!("Failed to scan plugin {:?}: {}", entry_path, e),
            }
        }

        Ok(())
    }

    fn scan_plugin(path: &Path, format: PluginFormat) -> PluginResult<Vec<PluginInfo>> {
        if format == PluginFormat::Ladspa {
            return ladspa_sys::enumerate(path);
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown");
        let id = format!(
            "{}.{}",
            format.extension(),
            name.to_lowercase().replace(' ', "_")
        );
        Ok(vec![PluginInfo::new(format, &id, name, path.to_path_buf())])
    }

    fn insert(&mut self, info: PluginInfo) {
        let key = (info.format, info.id.clone());
        if self.plugin_map.contains_key(&key) {
            return;
        }
        self.plugin_map.insert(key, self.plugins.len());
        self.plugins.push(info);
    }

    pub fn plugins(&self) -> &[PluginInfo] {
        &self.plugins
    }

    pub fn find_plugin(&self, format: PluginFormat, id: &str) -> Option<&PluginInfo> {
        self.plugin_map
            .get(&(format, id.to_string()))
            .map(|&idx| &self.plugins[idx])
    }

    pub fn find_by_format(&self, format: PluginFormat) -> Vec<&PluginInfo> {
        self.plugins.iter().filter(|p| p.format == format).collect()
    }

    /// Search plugins by name or vendor
    pub fn search(&self, query: &str) -> Vec<&PluginInfo> {
        let query_lower = query.to_lowercase();
        self.plugins
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&query_lower)
                    || p.vendor.to_lowercase().contains(&query_lower)
            })
            .collect()
    }
}

impl Default for PluginScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_per_format() {
        let scanner = PluginScanner::new();
        for format in PluginFormat::ALL {
            assert!(scanner.scan_paths().iter().any(|(f, _)| *f == format));
        }
    }

    #[test]
    fn test_configured_paths_come_first() {
        let mut paths = PluginPaths::default();
        paths.clap.push(PathBuf::from("/opt/my-clap"));
        let scanner = PluginScanner::with_paths(&paths);
        assert_eq!(
            scanner.scan_paths()[0],
            (PluginFormat::Clap, PathBuf::from("/opt/my-clap"))
        );
    }

    #[test]
    fn test_scan_lists_bundles_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Big Verb.clap")).unwrap();
        std::fs::write(dir.path().join("readme.txt"), "x").unwrap();

        let mut scanner = PluginScanner::empty();
        scanner.add_path(PluginFormat::Clap, dir.path().to_path_buf());
        let found = scanner.scan_all().unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "clap.big_verb");
        assert!(scanner.find_plugin(PluginFormat::Clap, "clap.big_verb").is_some());
        assert_eq!(scanner.search("verb").len(), 1);
    }

    #[test]
    fn test_broken_ladspa_library_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.so"), b"not an elf").unwrap();

        let mut scanner = PluginScanner::empty();
        scanner.add_path(PluginFormat::Ladspa, dir.path().to_path_buf());
        assert!(scanner.scan_all().unwrap().is_empty());
    }

    #[test]
    fn test_format_serde_names() {
        assert_eq!(serde_json::to_string(&PluginFormat::Vst3).unwrap(), "\"vst3\"");
    }
}

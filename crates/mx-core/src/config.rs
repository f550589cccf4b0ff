//! Engine configuration
//!
//! Persistent settings for a mixer instance, stored as JSON:
//! - Audio defaults (sample rate, buffer size)
//! - OSC control surface (UDP port, learn addressing)
//! - Plugin search paths per format
//! - Real-time buffer capacities

use crate::{CoreError, CoreResult, DEFAULT_EVENT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instance name (audio server client prefix)
    pub instance_name: String,
    /// Sample rate used until the server reports one (Hz)
    pub sample_rate: f32,
    /// Buffer size used until the server reports one (frames)
    pub buffer_size: usize,
    /// OSC settings
    pub osc: OscConfig,
    /// Extra plugin directories, searched before the standard ones
    pub plugin_paths: PluginPaths,
    /// Capacity of every event port buffer
    pub event_capacity: usize,
    /// Ramp time for smoothed built-in parameters (ms)
    pub smoothing_ms: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_name: "mx-mixer".to_string(),
            sample_rate: 48000.0,
            buffer_size: 256,
            osc: OscConfig::default(),
            plugin_paths: PluginPaths::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            smoothing_ms: 20.0,
        }
    }
}

/// OSC control surface settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    /// UDP port to bind (0 = any free port)
    pub port: u16,
    /// Learn binds to numbered paths (`/strip/<chain>/<n>/<m>`) instead of names
    pub learn_by_number: bool,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            port: 0,
            learn_by_number: false,
        }
    }
}

/// Additional plugin directories per format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginPaths {
    pub ladspa: Vec<PathBuf>,
    pub lv2: Vec<PathBuf>,
    pub vst2: Vec<PathBuf>,
    pub vst3: Vec<PathBuf>,
    pub clap: Vec<PathBuf>,
}

impl EngineConfig {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file, falling back to defaults if missing or invalid
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "Using default engine config ({}): {}",
                    path.as_ref().display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CoreResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.sample_rate.is_nan() || self.sample_rate <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(CoreError::InvalidConfig("buffer_size must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(CoreError::InvalidConfig("event_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

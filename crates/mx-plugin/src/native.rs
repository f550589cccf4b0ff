//! Format-neutral plugin instance
//!
//! A resolver turns a [`PluginInfo`](crate::PluginInfo) into a
//! `Box<dyn NativeInstance>`. The format adapters only ever talk to this
//! trait, so a native binding, an in-process bridge and a test double all
//! look the same to the graph.

use mx_core::{EventBuffer, PortHints, Sample};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{PluginError, PluginResult};

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETER IDENTITY
// ═══════════════════════════════════════════════════════════════════════════════

/// How the plugin itself addresses a parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeParamId {
    /// LADSPA port index, VST2 index, VST3 ParamID, CLAP clap_id
    Index(u32),
    /// LV2 port symbol
    Symbol(String),
}

impl fmt::Display for NativeParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{i}"),
            Self::Symbol(s) => f.write_str(s),
        }
    }
}

/// One parameter as the plugin reports it
#[derive(Debug, Clone, PartialEq)]
pub struct NativeParam {
    pub id: NativeParamId,
    pub name: String,
    pub hints: PortHints,
    /// Read-back parameter (plugin writes, host reads)
    pub output: bool,
    /// Native bypass switch; never exposed as a port
    pub bypass: bool,
}

impl NativeParam {
    pub fn input(id: NativeParamId, name: impl Into<String>, hints: PortHints) -> Self {
        Self {
            id,
            name: name.into(),
            hints,
            output: false,
            bypass: false,
        }
    }

    pub fn output(id: NativeParamId, name: impl Into<String>, hints: PortHints) -> Self {
        Self {
            output: true,
            ..Self::input(id, name, hints)
        }
    }

    pub fn bypass(id: NativeParamId) -> Self {
        Self {
            bypass: true,
            ..Self::input(id, "Bypass", PortHints::boolean(false))
        }
    }
}

/// Static shape of an instance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NativeDescriptor {
    pub name: String,
    pub audio_inputs: usize,
    pub audio_outputs: usize,
    pub event_inputs: usize,
    pub event_outputs: usize,
    pub params: Vec<NativeParam>,
}

impl NativeDescriptor {
    /// Parameter flagged as the native bypass switch
    pub fn bypass_param(&self) -> Option<&NativeParamId> {
        self.params.iter().find(|p| p.bypass).map(|p| &p.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER MESSAGES
// ═══════════════════════════════════════════════════════════════════════════════

/// Largest payload a single worker message carries
pub const WORK_MESSAGE_BYTES: usize = 64;

/// Fixed-size message exchanged with a non-real-time worker.
///
/// `Copy` so it moves through a lock-free ring without allocation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WorkMessage {
    len: u8,
    data: [u8; WORK_MESSAGE_BYTES],
}

impl WorkMessage {
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > WORK_MESSAGE_BYTES {
            return None;
        }
        let mut data = [0u8; WORK_MESSAGE_BYTES];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            len: bytes.len() as u8,
            data,
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Debug for WorkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkMessage").field(&self.as_bytes()).finish()
    }
}

/// Non-real-time half of a plugin that schedules work
pub trait Worker: Send {
    /// Handle one request; the optional response is delivered to the
    /// instance at the start of a later cycle.
    fn work(&mut self, request: &WorkMessage) -> Option<WorkMessage>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// A live plugin instance.
///
/// `process`, `set_param`, `get_param`, `handle_events`, `drain_events`,
/// `take_work_request` and `work_response` are called on the real-time
/// thread.
pub trait NativeInstance: Send {
    fn descriptor(&self) -> &NativeDescriptor;

    fn activate(&mut self, sample_rate: f32, max_frames: usize) -> PluginResult<()>;

    fn deactivate(&mut self);

    fn set_param(&mut self, id: &NativeParamId, value: f32);

    fn get_param(&self, id: &NativeParamId) -> f32;

    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]], frames: usize);

    fn latency(&self) -> u32 {
        0
    }

    /// Native state blob, if the plugin offers one
    fn save_state(&self) -> Option<Vec<u8>> {
        None
    }

    fn restore_state(&mut self, _data: &[u8]) -> PluginResult<()> {
        Err(PluginError::State(format!(
            "{} has no native state",
            self.descriptor().name
        )))
    }

    /// Engage a native bypass that is not a parameter (VST2 `canDo("bypass")`).
    /// Returns false when unsupported.
    fn set_native_bypass(&mut self, _bypass: bool) -> bool {
        false
    }

    /// Incoming events for this cycle
    fn handle_events(&mut self, _events: &EventBuffer) {}

    /// Outgoing events produced this cycle
    fn drain_events(&mut self, _out: &mut EventBuffer) {}

    /// Detach the non-real-time worker, if the plugin uses one
    fn take_worker(&mut self) -> Option<Box<dyn Worker>> {
        None
    }

    /// Next work request scheduled during the last `process`
    fn take_work_request(&mut self) -> Option<WorkMessage> {
        None
    }

    fn work_response(&mut self, _response: &WorkMessage) {}
}

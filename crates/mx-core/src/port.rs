//! Module ports
//!
//! A `Port` is one typed, directional endpoint on a module. It carries:
//! - an audio buffer sized to the chain's buffer size (Audio)
//! - a fixed-capacity event list (Event)
//! - a scalar value (Control, and the last value seen on Audio/Event)
//!
//! Connections are weak back-references by identity (`PortRef`). A port has
//! at most one peer. Graph-level wiring (both sides, ordering checks) is the
//! chain's job; the methods here only touch this side.

use crate::{EventBuffer, ModuleId, Sample, DEFAULT_EVENT_CAPACITY, MAX_CHANNELS};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ═══════════════════════════════════════════════════════════════════════════════
// PORT CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Audio,
    Control,
    Event,
}

/// How a control value should be interpreted and presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HintKind {
    #[default]
    Float,
    Integer,
    Boolean,
    Logarithmic,
}

/// Value range and presentation hints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortHints {
    pub kind: HintKind,
    /// `minimum`/`maximum` are meaningful
    pub ranged: bool,
    pub minimum: f32,
    pub maximum: f32,
    pub default: f32,
    /// Shown on control surfaces
    pub visible: bool,
}

impl Default for PortHints {
    fn default() -> Self {
        Self {
            kind: HintKind::Float,
            ranged: false,
            minimum: 0.0,
            maximum: 1.0,
            default: 0.0,
            visible: true,
        }
    }
}

impl PortHints {
    /// Ranged float hint
    pub fn ranged(minimum: f32, maximum: f32, default: f32) -> Self {
        Self {
            ranged: true,
            minimum,
            maximum,
            default,
            ..Self::default()
        }
    }

    /// Toggle hint (0 or 1)
    pub fn boolean(default: bool) -> Self {
        Self {
            kind: HintKind::Boolean,
            ranged: true,
            minimum: 0.0,
            maximum: 1.0,
            default: if default { 1.0 } else { 0.0 },
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: HintKind) -> Self {
        self.kind = kind;
        self
    }

    /// Clamp into range when ranged, round for integer/boolean kinds
    pub fn constrain(&self, value: f32) -> f32 {
        let v = if self.ranged {
            value.clamp(self.minimum.min(self.maximum), self.maximum.max(self.minimum))
        } else {
            value
        };
        match self.kind {
            HintKind::Integer => v.round(),
            HintKind::Boolean => {
                if v > 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            _ => v,
        }
    }
}

/// Identity of a port: owning module plus index into its port list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub module: ModuleId,
    pub port: usize,
}

impl PortRef {
    pub fn new(module: ModuleId, port: usize) -> Self {
        Self { module, port }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PORT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum PortBuffer {
    Audio(Vec<Sample>),
    Event(EventBuffer),
    None,
}

/// One endpoint on a module
#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    direction: PortDirection,
    kind: PortKind,
    hints: PortHints,
    buffer: PortBuffer,
    value: f32,
    connection: Option<PortRef>,
}

impl Port {
    pub fn new(name: impl Into<String>, direction: PortDirection, kind: PortKind) -> Self {
        let buffer = match kind {
            PortKind::Audio => PortBuffer::Audio(Vec::new()),
            PortKind::Event => PortBuffer::Event(EventBuffer::with_capacity(DEFAULT_EVENT_CAPACITY)),
            PortKind::Control => PortBuffer::None,
        };
        Self {
            name: name.into(),
            direction,
            kind,
            hints: PortHints::default(),
            buffer,
            value: 0.0,
            connection: None,
        }
    }

    pub fn audio_input(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Input, PortKind::Audio)
    }

    pub fn audio_output(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortKind::Audio)
    }

    pub fn event_input(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Input, PortKind::Event)
    }

    pub fn event_output(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortKind::Event)
    }

    /// Control input initialised to the hint default
    pub fn control_input(name: impl Into<String>, hints: PortHints) -> Self {
        Self::new(name, PortDirection::Input, PortKind::Control).with_hints(hints)
    }

    /// Control output initialised to the hint default
    pub fn control_output(name: impl Into<String>, hints: PortHints) -> Self {
        Self::new(name, PortDirection::Output, PortKind::Control).with_hints(hints)
    }

    pub fn with_hints(mut self, hints: PortHints) -> Self {
        self.hints = hints;
        self.value = hints.default;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[inline]
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    #[inline]
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    #[inline]
    pub fn hints(&self) -> &PortHints {
        &self.hints
    }

    pub fn set_hints(&mut self, hints: PortHints) {
        self.hints = hints;
    }

    #[inline]
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    #[inline]
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }

    #[inline]
    pub fn is(&self, direction: PortDirection, kind: PortKind) -> bool {
        self.direction == direction && self.kind == kind
    }

    // ─── Control value ──────────────────────────────────────────────────────

    /// Last value set on this port
    #[inline]
    pub fn control_value(&self) -> f32 {
        self.value
    }

    /// Store a value. Does not propagate to the peer.
    #[inline]
    pub fn set_control_value(&mut self, value: f32) {
        self.value = value;
    }

    // ─── Connection ─────────────────────────────────────────────────────────

    #[inline]
    pub fn connected(&self) -> bool {
        self.connection.is_some()
    }

    #[inline]
    pub fn connection(&self) -> Option<PortRef> {
        self.connection
    }

    /// Point this side at `peer`, replacing any previous connection
    pub fn connect_to(&mut self, peer: PortRef) -> Option<PortRef> {
        self.connection.replace(peer)
    }

    /// Clear this side. Idempotent.
    pub fn disconnect(&mut self) -> Option<PortRef> {
        self.connection.take()
    }

    // ─── Buffers ────────────────────────────────────────────────────────────

    /// Audio samples for the cycle in flight (`None` for non-audio ports)
    #[inline]
    pub fn buffer(&self) -> Option<&[Sample]> {
        match &self.buffer {
            PortBuffer::Audio(buf) => Some(buf),
            _ => None,
        }
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> Option<&mut [Sample]> {
        match &mut self.buffer {
            PortBuffer::Audio(buf) => Some(buf),
            _ => None,
        }
    }

    #[inline]
    pub fn events(&self) -> Option<&EventBuffer> {
        match &self.buffer {
            PortBuffer::Event(ev) => Some(ev),
            _ => None,
        }
    }

    #[inline]
    pub fn events_mut(&mut self) -> Option<&mut EventBuffer> {
        match &mut self.buffer {
            PortBuffer::Event(ev) => Some(ev),
            _ => None,
        }
    }

    /// Reallocate buffers for a new cycle size. Not real-time safe.
    pub fn set_buffer_size(&mut self, frames: usize, event_capacity: usize) {
        match &mut self.buffer {
            PortBuffer::Audio(buf) => buf.resize(frames, 0.0),
            PortBuffer::Event(ev) => {
                if ev.capacity() != event_capacity {
                    *ev = EventBuffer::with_capacity(event_capacity);
                }
            }
            PortBuffer::None => {}
        }
    }

    /// Zero audio / clear events
    #[inline]
    pub fn silence(&mut self) {
        match &mut self.buffer {
            PortBuffer::Audio(buf) => buf.fill(0.0),
            PortBuffer::Event(ev) => ev.clear(),
            PortBuffer::None => {}
        }
    }

    /// Take over the payload of `peer` for this cycle (audio, events or value)
    #[inline]
    pub fn pull_from(&mut self, peer: &Port, frames: usize) {
        match (&mut self.buffer, &peer.buffer) {
            (PortBuffer::Audio(dst), PortBuffer::Audio(src)) => {
                let n = frames.min(dst.len()).min(src.len());
                dst[..n].copy_from_slice(&src[..n]);
            }
            (PortBuffer::Event(dst), PortBuffer::Event(src)) => dst.copy_from(src),
            _ => self.value = peer.value,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PORT LAYOUT
// ═══════════════════════════════════════════════════════════════════════════════

/// Indices of each (direction, kind) group inside a module's port list.
///
/// Built off the real-time thread whenever ports change so `process` can
/// address groups without searching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortLayout {
    pub audio_in: Vec<usize>,
    pub audio_out: Vec<usize>,
    pub control_in: Vec<usize>,
    pub control_out: Vec<usize>,
    pub event_in: Vec<usize>,
    pub event_out: Vec<usize>,
}

impl PortLayout {
    pub fn of(ports: &[Port]) -> Self {
        let mut layout = Self::default();
        for (i, port) in ports.iter().enumerate() {
            let group = match (port.direction, port.kind) {
                (PortDirection::Input, PortKind::Audio) => &mut layout.audio_in,
                (PortDirection::Output, PortKind::Audio) => &mut layout.audio_out,
                (PortDirection::Input, PortKind::Control) => &mut layout.control_in,
                (PortDirection::Output, PortKind::Control) => &mut layout.control_out,
                (PortDirection::Input, PortKind::Event) => &mut layout.event_in,
                (PortDirection::Output, PortKind::Event) => &mut layout.event_out,
            };
            group.push(i);
        }
        layout
    }
}

/// Audio input/output slices gathered without heap allocation
pub type AudioInputs<'a> = SmallVec<[&'a [Sample]; MAX_CHANNELS]>;
pub type AudioOutputs<'a> = SmallVec<[&'a mut [Sample]; MAX_CHANNELS]>;

/// Split a port list into its audio inputs and outputs (in port order),
/// each truncated to `frames`.
pub fn split_audio(ports: &mut [Port], frames: usize) -> (AudioInputs<'_>, AudioOutputs<'_>) {
    let mut inputs = AudioInputs::new();
    let mut outputs = AudioOutputs::new();
    for port in ports.iter_mut() {
        let direction = port.direction;
        if let PortBuffer::Audio(buf) = &mut port.buffer {
            let n = frames.min(buf.len());
            match direction {
                PortDirection::Input => inputs.push(&buf[..n]),
                PortDirection::Output => outputs.push(&mut buf[..n]),
            }
        }
    }
    (inputs, outputs)
}

/// Copy each audio input to the output at the same position and silence
/// outputs with no matching input. Host-side bypass.
pub fn passthrough_audio(ports: &mut [Port], frames: usize) {
    let (inputs, mut outputs) = split_audio(ports, frames);
    for (i, out) in outputs.iter_mut().enumerate() {
        match inputs.get(i) {
            Some(input) => crate::buffer_copy(out, input),
            None => out.fill(0.0),
        }
    }
}

/// Silence every output port
pub fn silence_outputs(ports: &mut [Port]) {
    for port in ports.iter_mut().filter(|p| p.is_output()) {
        port.silence();
    }
}

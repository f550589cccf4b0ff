//! LADSPA C ABI
//!
//! Just enough of `ladspa.h` to enumerate descriptors and run instances.

use libloading::{Library, Symbol};
use std::ffi::{c_char, c_int, c_ulong, c_void, CStr};
use std::path::Path;
use std::sync::Arc;

use mx_core::{HintKind, PortHints, Sample};

use crate::native::{NativeDescriptor, NativeInstance, NativeParam, NativeParamId};
use crate::scanner::{PluginFormat, PluginInfo};
use crate::{PluginError, PluginResult};

// =============================================================================
// ladspa.h
// =============================================================================

const PORT_INPUT: c_int = 0x1;
const PORT_OUTPUT: c_int = 0x2;
const PORT_CONTROL: c_int = 0x4;
const PORT_AUDIO: c_int = 0x8;

const HINT_BOUNDED_BELOW: c_int = 0x1;
const HINT_BOUNDED_ABOVE: c_int = 0x2;
const HINT_TOGGLED: c_int = 0x4;
const HINT_SAMPLE_RATE: c_int = 0x8;
const HINT_LOGARITHMIC: c_int = 0x10;
const HINT_INTEGER: c_int = 0x20;
const HINT_DEFAULT_MASK: c_int = 0x3C0;
const HINT_DEFAULT_MINIMUM: c_int = 0x40;
const HINT_DEFAULT_LOW: c_int = 0x80;
const HINT_DEFAULT_MIDDLE: c_int = 0xC0;
const HINT_DEFAULT_HIGH: c_int = 0x100;
const HINT_DEFAULT_MAXIMUM: c_int = 0x140;
const HINT_DEFAULT_0: c_int = 0x200;
const HINT_DEFAULT_1: c_int = 0x240;
const HINT_DEFAULT_100: c_int = 0x280;
const HINT_DEFAULT_440: c_int = 0x2C0;

type LadspaHandle = *mut c_void;

#[repr(C)]
struct PortRangeHint {
    hint_descriptor: c_int,
    lower_bound: f32,
    upper_bound: f32,
}

#[repr(C)]
#[allow(dead_code)]
struct LadspaDescriptor {
    unique_id: c_ulong,
    label: *const c_char,
    properties: c_int,
    name: *const c_char,
    maker: *const c_char,
    copyright: *const c_char,
    port_count: c_ulong,
    port_descriptors: *const c_int,
    port_names: *const *const c_char,
    port_range_hints: *const PortRangeHint,
    implementation_data: *mut c_void,
    instantiate: Option<unsafe extern "C" fn(*const LadspaDescriptor, c_ulong) -> LadspaHandle>,
    connect_port: Option<unsafe extern "C" fn(LadspaHandle, c_ulong, *mut f32)>,
    activate: Option<unsafe extern "C" fn(LadspaHandle)>,
    run: Option<unsafe extern "C" fn(LadspaHandle, c_ulong)>,
    run_adding: Option<unsafe extern "C" fn(LadspaHandle, c_ulong)>,
    set_run_adding_gain: Option<unsafe extern "C" fn(LadspaHandle, f32)>,
    deactivate: Option<unsafe extern "C" fn(LadspaHandle)>,
    cleanup: Option<unsafe extern "C" fn(LadspaHandle)>,
}

type DescriptorFn = unsafe extern "C" fn(c_ulong) -> *const LadspaDescriptor;

unsafe fn c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

// =============================================================================
// DESCRIPTOR WALKING
// =============================================================================

/// One port as read from a descriptor
struct PortDesc {
    index: c_ulong,
    flags: c_int,
    name: String,
    hint: c_int,
    lower: f32,
    upper: f32,
}

/// Walk every descriptor exported by `library`
fn descriptors(library: &Library) -> PluginResult<Vec<*const LadspaDescriptor>> {
    let entry: Symbol<DescriptorFn> = unsafe { library.get(b"ladspa_descriptor\0") }
        .map_err(|_| PluginError::MissingSymbol {
            symbol: "ladspa_descriptor".into(),
            path: String::new(),
        })?;

    let mut found = Vec::new();
    let mut index: c_ulong = 0;
    loop {
        let desc = unsafe { entry(index) };
        if desc.is_null() {
            break;
        }
        found.push(desc);
        index += 1;
    }
    Ok(found)
}

unsafe fn ports_of(desc: &LadspaDescriptor) -> Vec<PortDesc> {
    (0..desc.port_count)
        .map(|i| unsafe {
            let hint = &*desc.port_range_hints.add(i as usize);
            PortDesc {
                index: i,
                flags: *desc.port_descriptors.add(i as usize),
                name: c_string(*desc.port_names.add(i as usize)),
                hint: hint.hint_descriptor,
                lower: hint.lower_bound,
                upper: hint.upper_bound,
            }
        })
        .collect()
}

/// Port hints and default value from a LADSPA range hint
fn port_hints(port: &PortDesc, sample_rate: f32) -> PortHints {
    let scale = if port.hint & HINT_SAMPLE_RATE != 0 {
        sample_rate
    } else {
        1.0
    };
    let lower = port.lower * scale;
    let upper = port.upper * scale;
    let bounded = port.hint & HINT_BOUNDED_BELOW != 0 && port.hint & HINT_BOUNDED_ABOVE != 0;
    let log = port.hint & HINT_LOGARITHMIC != 0 && lower > 0.0 && upper > 0.0;

    let between = |w: f32| {
        if log {
            (lower.ln() * (1.0 - w) + upper.ln() * w).exp()
        } else {
            lower * (1.0 - w) + upper * w
        }
    };

    let default = match port.hint & HINT_DEFAULT_MASK {
        HINT_DEFAULT_MINIMUM => lower,
        HINT_DEFAULT_LOW => between(0.25),
        HINT_DEFAULT_MIDDLE => between(0.5),
        HINT_DEFAULT_HIGH => between(0.75),
        HINT_DEFAULT_MAXIMUM => upper,
        HINT_DEFAULT_0 => 0.0,
        HINT_DEFAULT_1 => 1.0,
        HINT_DEFAULT_100 => 100.0,
        HINT_DEFAULT_440 => 440.0,
        _ if port.hint & HINT_BOUNDED_BELOW != 0 => lower,
        _ => 0.0,
    };

    let kind = if port.hint & HINT_TOGGLED != 0 {
        HintKind::Boolean
    } else if port.hint & HINT_INTEGER != 0 {
        HintKind::Integer
    } else if log {
        HintKind::Logarithmic
    } else {
        HintKind::Float
    };

    PortHints {
        kind,
        ranged: bounded || kind == HintKind::Boolean,
        minimum: if kind == HintKind::Boolean { 0.0 } else { lower },
        maximum: if kind == HintKind::Boolean { 1.0 } else { upper },
        default,
        visible: true,
    }
}

/// List every plugin in a LADSPA library
pub(crate) fn enumerate(path: &Path) -> PluginResult<Vec<PluginInfo>> {
    let library = unsafe { Library::new(path) }
        .map_err(|e| PluginError::LoadFailed(format!("{}: {e}", path.display())))?;

    let mut infos = Vec::new();
    for desc in descriptors(&library)? {
        let desc = unsafe { &*desc };
        let ports = unsafe { ports_of(desc) };
        let count = |want: c_int| ports.iter().filter(|p| p.flags & want == want).count() as u32;

        let mut info = PluginInfo::new(
            PluginFormat::Ladspa,
            &desc.unique_id.to_string(),
            &unsafe { c_string(desc.name) },
            path.to_path_buf(),
        );
        info.vendor = unsafe { c_string(desc.maker) };
        info.audio_inputs = count(PORT_AUDIO | PORT_INPUT);
        info.audio_outputs = count(PORT_AUDIO | PORT_OUTPUT);
        infos.push(info);
    }
    Ok(infos)
}

// =============================================================================
// INSTANCE
// =============================================================================

/// A running LADSPA instance
pub(crate) struct LadspaInstance {
    _library: Arc<Library>,
    descriptor: *const LadspaDescriptor,
    handle: LadspaHandle,
    native: NativeDescriptor,
    audio_in: Vec<c_ulong>,
    audio_out: Vec<c_ulong>,
    /// One slot per LADSPA port; control ports stay connected to their slot
    controls: Box<[f32]>,
    silence: Vec<Sample>,
    scratch: Vec<Sample>,
    active: bool,
}

// The handle is only touched by the thread that owns the instance.
unsafe impl Send for LadspaInstance {}

impl LadspaInstance {
    /// Instantiate the plugin whose unique id or label is `id`
    pub(crate) fn instantiate(library: Arc<Library>, id: &str, sample_rate: f32) -> PluginResult<Self> {
        let descriptor = descriptors(&library)?
            .into_iter()
            .find(|&d| unsafe {
                (*d).unique_id.to_string() == id || c_string((*d).label) == id
            })
            .ok_or_else(|| PluginError::NotFound(format!("LADSPA plugin {id}")))?;
        let desc = unsafe { &*descriptor };

        let (Some(instantiate), Some(connect_port), Some(_run)) =
            (desc.instantiate, desc.connect_port, desc.run)
        else {
            return Err(PluginError::AbiMismatch(format!(
                "LADSPA descriptor {id} lacks instantiate/connect_port/run"
            )));
        };

        let handle = unsafe { instantiate(descriptor, sample_rate as c_ulong) };
        if handle.is_null() {
            return Err(PluginError::InitFailed(format!("LADSPA instantiate({id}) returned null")));
        }

        let ports = unsafe { ports_of(desc) };
        let mut controls = vec![0.0f32; ports.len()].into_boxed_slice();
        let mut native = NativeDescriptor {
            name: unsafe { c_string(desc.name) },
            ..Default::default()
        };
        let mut audio_in = Vec::new();
        let mut audio_out = Vec::new();

        for port in &ports {
            if port.flags & PORT_AUDIO != 0 {
                if port.flags & PORT_INPUT != 0 {
                    audio_in.push(port.index);
                } else {
                    audio_out.push(port.index);
                }
            } else if port.flags & PORT_CONTROL != 0 {
                let hints = port_hints(port, sample_rate);
                controls[port.index as usize] = hints.default;
                let id = NativeParamId::Index(port.index as u32);
                native.params.push(if port.flags & PORT_OUTPUT != 0 {
                    NativeParam::output(id, port.name.clone(), hints)
                } else {
                    NativeParam::input(id, port.name.clone(), hints)
                });
                let slot = &mut controls[port.index as usize] as *mut f32;
                unsafe { connect_port(handle, port.index, slot) };
            }
        }
        native.audio_inputs = audio_in.len();
        native.audio_outputs = audio_out.len();

        Ok(Self {
            _library: library,
            descriptor,
            handle,
            native,
            audio_in,
            audio_out,
            controls,
            silence: Vec::new(),
            scratch: Vec::new(),
            active: false,
        })
    }

    fn desc(&self) -> &LadspaDescriptor {
        unsafe { &*self.descriptor }
    }

    fn slot(&self, id: &NativeParamId) -> Option<usize> {
        match id {
            NativeParamId::Index(i) if (*i as usize) < self.controls.len() => Some(*i as usize),
            _ => None,
        }
    }
}

impl NativeInstance for LadspaInstance {
    fn descriptor(&self) -> &NativeDescriptor {
        &self.native
    }

    fn activate(&mut self, _sample_rate: f32, max_frames: usize) -> PluginResult<()> {
        self.silence = vec![0.0; max_frames];
        self.scratch = vec![0.0; max_frames];
        if !self.active {
            if let Some(activate) = self.desc().activate {
                unsafe { activate(self.handle) };
            }
            self.active = true;
        }
        Ok(())
    }

    fn deactivate(&mut self) {
        if self.active {
            if let Some(deactivate) = self.desc().deactivate {
                unsafe { deactivate(self.handle) };
            }
            self.active = false;
        }
    }

    fn set_param(&mut self, id: &NativeParamId, value: f32) {
        if let Some(slot) = self.slot(id) {
            self.controls[slot] = value;
        }
    }

    fn get_param(&self, id: &NativeParamId) -> f32 {
        self.slot(id).map_or(0.0, |slot| self.controls[slot])
    }

    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]], frames: usize) {
        let frames = frames.min(self.silence.len());
        if frames == 0 {
            return;
        }
        let desc = unsafe { &*self.descriptor };
        let (Some(connect_port), Some(run)) = (desc.connect_port, desc.run) else {
            return;
        };

        for (k, &port) in self.audio_in.iter().enumerate() {
            let ptr = match inputs.get(k) {
                Some(buf) if buf.len() >= frames => buf.as_ptr() as *mut f32,
                _ => self.silence.as_mut_ptr(),
            };
            unsafe { connect_port(self.handle, port, ptr) };
        }
        for (k, &port) in self.audio_out.iter().enumerate() {
            let ptr = match outputs.get_mut(k) {
                Some(buf) if buf.len() >= frames => buf.as_mut_ptr(),
                _ => self.scratch.as_mut_ptr(),
            };
            unsafe { connect_port(self.handle, port, ptr) };
        }

        unsafe { run(self.handle, frames as c_ulong) };
    }
}

impl Drop for LadspaInstance {
    fn drop(&mut self) {
        self.deactivate();
        if let Some(cleanup) = self.desc().cleanup {
            unsafe { cleanup(self.handle) };
        }
    }
}

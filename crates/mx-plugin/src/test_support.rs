//! Scriptable in-process plugin for adapter tests

use mx_core::{PortHints, Sample};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::native::{NativeDescriptor, NativeInstance, NativeParam, NativeParamId, WorkMessage, Worker};
use crate::registry::PluginRegistry;
use crate::scanner::{PluginFormat, PluginInfo};
use crate::{PluginError, PluginResult};

/// What the tests observe from outside the instance
#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub instances: usize,
    pub activations: usize,
    pub native_bypass: Option<bool>,
    pub work_done: Vec<Vec<u8>>,
    pub responses: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeSpec {
    pub descriptor: NativeDescriptor,
    pub native_state: bool,
    pub native_bypass: bool,
    pub worker: bool,
    pub latency: u32,
}

impl FakeSpec {
    /// `ins` → `outs` gain plugin with one "Gain" input and one "Level" read-back
    pub fn gain(ins: usize, outs: usize, gain_id: NativeParamId, level_id: NativeParamId) -> Self {
        Self {
            descriptor: NativeDescriptor {
                name: "Fake Gain".into(),
                audio_inputs: ins,
                audio_outputs: outs,
                params: vec![
                    NativeParam::input(gain_id, "Gain", PortHints::ranged(0.0, 2.0, 1.0)),
                    NativeParam::output(level_id, "Level", PortHints::ranged(0.0, 2.0, 0.0)),
                ],
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

pub(crate) struct FakeInstance {
    spec: FakeSpec,
    values: HashMap<NativeParamId, f32>,
    tally: Arc<Mutex<Tally>>,
    pending: Option<WorkMessage>,
    requested: bool,
}

impl FakeInstance {
    fn new(spec: FakeSpec, tally: Arc<Mutex<Tally>>) -> Self {
        let values = spec
            .descriptor
            .params
            .iter()
            .map(|p| (p.id.clone(), p.hints.default))
            .collect();
        tally.lock().instances += 1;
        Self {
            spec,
            values,
            tally,
            pending: None,
            requested: false,
        }
    }

    fn gain(&self) -> f32 {
        self.spec
            .descriptor
            .params
            .iter()
            .find(|p| !p.output && !p.bypass)
            .and_then(|p| self.values.get(&p.id).copied())
            .unwrap_or(1.0)
    }
}

impl NativeInstance for FakeInstance {
    fn descriptor(&self) -> &NativeDescriptor {
        &self.spec.descriptor
    }

    fn activate(&mut self, _sample_rate: f32, _max_frames: usize) -> PluginResult<()> {
        self.tally.lock().activations += 1;
        Ok(())
    }

    fn deactivate(&mut self) {}

    fn set_param(&mut self, id: &NativeParamId, value: f32) {
        self.values.insert(id.clone(), value);
    }

    fn get_param(&self, id: &NativeParamId) -> f32 {
        self.values.get(id).copied().unwrap_or(0.0)
    }

    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]], frames: usize) {
        let gain = self.gain();
        for (c, out) in outputs.iter_mut().enumerate() {
            match inputs.get(c % inputs.len().max(1)) {
                Some(input) => {
                    for (o, i) in out.iter_mut().zip(input.iter()).take(frames) {
                        *o = i * gain;
                    }
                }
                None => out.fill(0.0),
            }
        }
        let read_back: Vec<NativeParamId> = self
            .spec
            .descriptor
            .params
            .iter()
            .filter(|p| p.output)
            .map(|p| p.id.clone())
            .collect();
        for id in read_back {
            self.values.insert(id, gain);
        }
        if self.spec.worker && !self.requested {
            self.pending = WorkMessage::new(b"ping");
            self.requested = true;
        }
    }

    fn latency(&self) -> u32 {
        self.spec.latency
    }

    fn save_state(&self) -> Option<Vec<u8>> {
        if !self.spec.native_state {
            return None;
        }
        let mut values: Vec<(NativeParamId, f32)> = self.values.iter().map(|(k, v)| (k.clone(), *v)).collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        serde_json::to_vec(&values).ok()
    }

    fn restore_state(&mut self, data: &[u8]) -> PluginResult<()> {
        if !self.spec.native_state {
            return Err(PluginError::State("no native state".into()));
        }
        let values: Vec<(NativeParamId, f32)> =
            serde_json::from_slice(data).map_err(|e| PluginError::State(e.to_string()))?;
        self.values.extend(values);
        Ok(())
    }

    fn set_native_bypass(&mut self, bypass: bool) -> bool {
        if !self.spec.native_bypass {
            return false;
        }
        self.tally.lock().native_bypass = Some(bypass);
        true
    }

    fn take_worker(&mut self) -> Option<Box<dyn Worker>> {
        self.spec
            .worker
            .then(|| Box::new(EchoWorker(self.tally.clone())) as Box<dyn Worker>)
    }

    fn take_work_request(&mut self) -> Option<WorkMessage> {
        self.pending.take()
    }

    fn work_response(&mut self, _response: &WorkMessage) {
        self.tally.lock().responses += 1;
    }
}

struct EchoWorker(Arc<Mutex<Tally>>);

impl Worker for EchoWorker {
    fn work(&mut self, request: &WorkMessage) -> Option<WorkMessage> {
        self.0.lock().work_done.push(request.as_bytes().to_vec());
        WorkMessage::new(b"pong")
    }
}

/// Registry serving `spec` as `(format, "fake")`
pub(crate) fn fake_registry(format: PluginFormat, spec: FakeSpec) -> (Arc<PluginRegistry>, Arc<Mutex<Tally>>, PluginInfo) {
    let tally = Arc::new(Mutex::new(Tally::default()));
    let registry = Arc::new(PluginRegistry::new());
    let factory_tally = tally.clone();
    registry.register(format, "fake", move |_, _| {
        Ok(Box::new(FakeInstance::new(spec.clone(), factory_tally.clone())) as Box<dyn NativeInstance>)
    });
    let info = PluginInfo::new(format, "fake", "Fake Gain", Default::default());
    (registry, tally, info)
}

/// Give every port a `frames`-long buffer
pub(crate) fn sized(mut ports: Vec<mx_core::Port>, frames: usize) -> Vec<mx_core::Port> {
    for port in &mut ports {
        port.set_buffer_size(frames, mx_core::DEFAULT_EVENT_CAPACITY);
    }
    ports
}

pub(crate) fn fill(ports: &mut [mx_core::Port], index: usize, value: Sample) {
    if let Some(buf) = ports[index].buffer_mut() {
        buf.fill(value);
    }
}

pub(crate) fn first_sample(ports: &[mx_core::Port], index: usize) -> Sample {
    ports[index].buffer().map_or(f32::NAN, |b| b[0])
}

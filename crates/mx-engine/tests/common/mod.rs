//! Shared fixtures for mx-engine integration tests

#![allow(dead_code)]

use mx_core::{EngineConfig, PortHints, Sample};
use mx_engine::{MemoryServer, Mixer};
use mx_plugin::{
    NativeDescriptor, NativeInstance, NativeParam, NativeParamId, PluginFormat, PluginInfo, PluginRegistry,
    PluginResult,
};
use std::sync::Arc;

pub const SAMPLE_RATE: f32 = 48000.0;
pub const BLOCK_SIZE: usize = 128;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Multiplies its input by "Amount"
pub struct Scale {
    descriptor: NativeDescriptor,
    amount: f32,
}

impl NativeInstance for Scale {
    fn descriptor(&self) -> &NativeDescriptor {
        &self.descriptor
    }
    fn activate(&mut self, _sample_rate: f32, _max_frames: usize) -> PluginResult<()> {
        Ok(())
    }
    fn deactivate(&mut self) {}
    fn set_param(&mut self, _id: &NativeParamId, value: f32) {
        self.amount = value;
    }
    fn get_param(&self, _id: &NativeParamId) -> f32 {
        self.amount
    }
    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]], frames: usize) {
        for (out, input) in outputs.iter_mut().zip(inputs.iter()) {
            for i in 0..frames.min(out.len()).min(input.len()) {
                out[i] = input[i] * self.amount;
            }
        }
    }
    fn latency(&self) -> u32 {
        32
    }
}

pub fn scale_info() -> PluginInfo {
    PluginInfo::new(PluginFormat::Vst3, "scale", "Scale", Default::default())
}

pub fn registry() -> Arc<PluginRegistry> {
    let registry = Arc::new(PluginRegistry::new());
    install_scale(&registry);
    registry
}

/// Make "scale" resolvable through `registry`
pub fn install_scale(registry: &PluginRegistry) {
    registry.register(PluginFormat::Vst3, "scale", |_, _| {
        Ok(Box::new(Scale {
            descriptor: NativeDescriptor {
                name: "Scale".into(),
                audio_inputs: 1,
                audio_outputs: 1,
                params: vec![NativeParam::input(
                    NativeParamId::Index(1),
                    "Amount",
                    PortHints::ranged(0.0, 2.0, 1.0),
                )],
                ..Default::default()
            },
            amount: 1.0,
        }) as Box<dyn NativeInstance>)
    });
}

pub fn config() -> EngineConfig {
    EngineConfig {
        buffer_size: BLOCK_SIZE,
        sample_rate: SAMPLE_RATE,
        ..EngineConfig::default()
    }
}

pub fn server(name: &str) -> Arc<MemoryServer> {
    Arc::new(MemoryServer::new(name, SAMPLE_RATE, BLOCK_SIZE))
}

/// Mixer with one group "main" on a fresh in-memory server
pub fn mixer() -> (Mixer, Arc<MemoryServer>) {
    let mut mixer = Mixer::new(config(), registry()).unwrap();
    let server = server("main");
    mixer.add_group("main", server.clone());
    (mixer, server)
}

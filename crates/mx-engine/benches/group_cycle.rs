//! Group cycle benchmarks

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mx_core::{EngineConfig, PortRef};
use mx_engine::{MemoryServer, Mixer, Module};
use mx_plugin::PluginRegistry;
use std::sync::Arc;

/// `strips` chains of capture -> Gain -> Mono Pan -> playback
fn build(frames: usize, strips: usize) -> (Mixer, Arc<MemoryServer>) {
    let config = EngineConfig {
        buffer_size: frames,
        ..EngineConfig::default()
    };
    let mut mixer = Mixer::new(config, Arc::new(PluginRegistry::new())).unwrap();
    let server = Arc::new(MemoryServer::new("bench", 48000.0, frames));
    mixer.add_group("main", server.clone());
    let ctx = *mixer.context();

    for n in 0..strips {
        let mut chain = mixer.new_chain(&format!("Strip {n}"));
        let input = chain.add_module(Module::audio_input(1, &ctx));
        let gain = chain.add_module(Module::gain(1, &ctx));
        let pan = chain.add_module(Module::mono_pan(&ctx));
        let output = chain.add_module(Module::audio_output(2, &ctx));
        chain.connect(PortRef::new(input, 0), PortRef::new(gain, 0)).unwrap();
        chain.connect(PortRef::new(gain, 1), PortRef::new(pan, 0)).unwrap();
        chain.connect(PortRef::new(pan, 1), PortRef::new(output, 0)).unwrap();
        chain.connect(PortRef::new(pan, 2), PortRef::new(output, 1)).unwrap();
        mixer.add_chain("main", chain).unwrap();
    }
    (mixer, server)
}

fn bench_group_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_cycle");
    for frames in [64, 256, 1024] {
        let (mixer, server) = build(frames, 16);
        let engine = mixer.group("main").unwrap().clone();
        let mut io = server.io();
        group.bench_with_input(BenchmarkId::from_parameter(frames), &frames, |b, &frames| {
            b.iter(|| engine.process(black_box(&mut io), frames));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_group_cycle);
criterion_main!(benches);

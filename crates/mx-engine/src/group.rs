//! Group: one audio-server client and the chains it runs
//!
//! The real-time callback never blocks. [`Group::process`] tries the lock;
//! when the UI thread holds it for a structural change the cycle is dropped
//! and counted, and server outputs are left untouched.

use mx_core::Cycle;
use parking_lot::{Mutex, MutexGuard};
use portable_atomic::AtomicF32;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::chain::Chain;
use crate::server::{ServerClient, ServerIo};
use crate::{EngineError, EngineResult};

/// Load per microsecond of processing for one cycle of `frames` at
/// `sample_rate` (1.0 means the whole cycle budget was used)
fn load_coefficient(frames: usize, sample_rate: f32) -> f32 {
    if frames == 0 || sample_rate <= 0.0 {
        return 0.0;
    }
    1.0 / (frames as f32 / sample_rate * 1_000_000.0)
}

pub struct Group {
    name: String,
    client: Arc<dyn ServerClient>,
    chains: Mutex<Vec<Chain>>,
    buffers_dropped: AtomicU64,
    xruns: AtomicU64,
    dsp_load: AtomicF32,
    load_coefficient: AtomicF32,
    sample_rate: AtomicF32,
    buffer_size: AtomicUsize,
    stopping: AtomicBool,
    freewheeling: AtomicBool,
}

impl Group {
    pub fn new(name: &str, client: Arc<dyn ServerClient>) -> Self {
        let sample_rate = client.sample_rate();
        let buffer_size = client.buffer_size();
        Self {
            name: name.to_string(),
            client,
            chains: Mutex::new(Vec::new()),
            buffers_dropped: AtomicU64::new(0),
            xruns: AtomicU64::new(0),
            dsp_load: AtomicF32::new(0.0),
            load_coefficient: AtomicF32::new(load_coefficient(buffer_size, sample_rate)),
            sample_rate: AtomicF32::new(sample_rate),
            buffer_size: AtomicUsize::new(buffer_size),
            stopping: AtomicBool::new(false),
            freewheeling: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Arc<dyn ServerClient> {
        &self.client
    }

    // ─── Real-time ──────────────────────────────────────────────────────────

    /// Server process callback. Drops the cycle when the lock is busy.
    pub fn process(&self, io: &mut dyn ServerIo, frames: usize) {
        let Some(mut chains) = self.chains.try_lock() else {
            self.buffers_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let start = Instant::now();
        let cycle = Cycle::new(frames, self.sample_rate.load(Ordering::Relaxed));
        for chain in chains.iter_mut() {
            chain.process(io, &cycle);
        }
        drop(chains);

        let elapsed_us = start.elapsed().as_secs_f32() * 1_000_000.0;
        self.dsp_load.store(self.load_for(elapsed_us), Ordering::Relaxed);
    }

    // ─── Server callbacks ───────────────────────────────────────────────────

    pub fn buffer_size(&self, frames: usize) {
        self.buffer_size.store(frames, Ordering::Relaxed);
        self.update_coefficient();
        let mut chains = self.chains.lock();
        for chain in chains.iter_mut() {
            chain.set_buffer_size(frames);
        }
        log::info!("{}: buffer size now {}", self.name, frames);
    }

    pub fn sample_rate_changed(&self, sample_rate: f32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.update_coefficient();
        let mut chains = self.chains.lock();
        for chain in chains.iter_mut() {
            chain.sample_rate_change(sample_rate);
        }
        log::info!("{}: sample rate now {}", self.name, sample_rate);
    }

    fn update_coefficient(&self) {
        let coefficient = load_coefficient(
            self.buffer_size.load(Ordering::Relaxed),
            self.sample_rate.load(Ordering::Relaxed),
        );
        self.load_coefficient.store(coefficient, Ordering::Relaxed);
    }

    /// External wiring change between server ports `a` and `b`
    pub fn port_connect(&self, a: &str, b: &str, connected: bool) {
        if self.is_stopping() {
            return;
        }
        let mut chains = self.chains.lock();
        for chain in chains.iter_mut() {
            chain.port_connect(a, b, connected);
        }
    }

    pub fn xrun(&self) {
        let count = self.xruns.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!("{}: xrun ({} total)", self.name, count);
    }

    pub fn freewheel(&self, starting: bool) {
        self.freewheeling.store(starting, Ordering::Relaxed);
        log::info!(
            "{}: {} freewheeling",
            self.name,
            if starting { "entering" } else { "leaving" }
        );
    }

    pub fn thread_init(&self) {
        log::debug!("{}: process thread started", self.name);
    }

    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        log::info!("{}: server shut down", self.name);
    }

    // ─── Chains ─────────────────────────────────────────────────────────────

    /// Blocking guard for structural changes on the UI thread
    pub fn lock(&self) -> MutexGuard<'_, Vec<Chain>> {
        self.chains.lock()
    }

    /// Take ownership of `chain`, sizing it to this client and registering
    /// its server ports
    pub fn add_chain(&self, mut chain: Chain) -> EngineResult<()> {
        let mut chains = self.chains.lock();
        if chains.iter().any(|c| c.name() == chain.name()) {
            return Err(EngineError::DuplicateChain(chain.name().to_string()));
        }
        if !self.client.is_active() {
            self.client.activate()?;
        }

        let frames = self.buffer_size.load(Ordering::Relaxed);
        let sample_rate = self.sample_rate.load(Ordering::Relaxed);
        if chain.buffer_size() != frames {
            chain.set_buffer_size(frames);
        }
        if chain.sample_rate() != sample_rate {
            chain.sample_rate_change(sample_rate);
        }
        if let Err(e) = chain.thaw_ports(self.client.clone()) {
            log::warn!("{}: chain {} is missing server ports: {}", self.name, chain.name(), e);
        }
        log::info!("{}: added chain {}", self.name, chain.name());
        chains.push(chain);
        Ok(())
    }

    /// Release a chain's server ports and hand it back. The client is
    /// deactivated once no chains remain.
    pub fn remove_chain(&self, name: &str) -> EngineResult<Chain> {
        let mut chains = self.chains.lock();
        let index = chains
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| EngineError::NoSuchChain(name.to_string()))?;
        let mut chain = chains.remove(index);
        chain.freeze_ports();
        if chains.is_empty() {
            self.client.deactivate();
        }
        log::info!("{}: removed chain {}", self.name, name);
        Ok(chain)
    }

    /// Run `f` on the named chain under the blocking lock
    pub fn with_chain<R>(&self, name: &str, f: impl FnOnce(&mut Chain) -> R) -> EngineResult<R> {
        let mut chains = self.chains.lock();
        let chain = chains
            .iter_mut()
            .find(|c| c.name() == name)
            .ok_or_else(|| EngineError::NoSuchChain(name.to_string()))?;
        Ok(f(chain))
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.chains.lock().iter().map(|c| c.name().to_string()).collect()
    }

    /// Largest chain latency in frames, `None` when the lock is busy
    pub fn latency(&self) -> Option<u32> {
        let chains = self.chains.try_lock()?;
        Some(chains.iter().map(Chain::latency).max().unwrap_or(0))
    }

    // ─── Statistics ─────────────────────────────────────────────────────────

    pub fn buffers_dropped(&self) -> u64 {
        self.buffers_dropped.load(Ordering::Relaxed)
    }

    pub fn xruns(&self) -> u64 {
        self.xruns.load(Ordering::Relaxed)
    }

    /// Share of the last cycle's budget spent processing
    pub fn dsp_load(&self) -> f32 {
        self.dsp_load.load(Ordering::Relaxed)
    }

    pub fn load_coefficient(&self) -> f32 {
        self.load_coefficient.load(Ordering::Relaxed)
    }

    /// Load reported for a cycle that took `elapsed_us` microseconds
    pub fn load_for(&self, elapsed_us: f32) -> f32 {
        elapsed_us * self.load_coefficient()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn is_freewheeling(&self) -> bool {
        self.freewheeling.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("buffers_dropped", &self.buffers_dropped())
            .field("xruns", &self.xruns())
            .field("dsp_load", &self.dsp_load())
            .finish_non_exhaustive()
    }
}

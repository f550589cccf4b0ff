//! LV2 adapter
//!
//! Parameters are addressed by port symbol and the channel arity is fixed.
//! Plugins using the worker extension get a dedicated thread: requests
//! scheduled during `process` go out through one lock-free ring, responses
//! come back through another and are delivered at the start of the next
//! cycle. Neither side ever blocks the real-time thread.

use mx_core::{passthrough_audio, Cycle, Port};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::hosted::{HostedPlugin, IdStyle};
use crate::native::{WorkMessage, Worker};
use crate::params::ParamMap;
use crate::registry::PluginResolver;
use crate::scanner::PluginInfo;
use crate::{ModuleBackend, PluginResult};

/// Pending messages per direction
const WORKER_QUEUE: usize = 256;

/// Worker wake-up interval when no request arrives
const WORKER_IDLE: Duration = Duration::from_millis(20);

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

struct WorkerBridge {
    requests: Producer<WorkMessage>,
    responses: Consumer<WorkMessage>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerBridge {
    fn spawn(name: &str, mut worker: Box<dyn Worker>) -> PluginResult<Self> {
        let (requests, mut request_rx) = RingBuffer::<WorkMessage>::new(WORKER_QUEUE);
        let (mut response_tx, responses) = RingBuffer::<WorkMessage>::new(WORKER_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let thread_stop = stop.clone();
        let thread_dropped = dropped.clone();
        let label = name.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("lv2-worker:{name}"))
            .spawn(move || {
                log::debug!("{}: worker started", label);
                while !thread_stop.load(Ordering::Acquire) {
                    while let Ok(request) = request_rx.pop() {
                        if let Some(response) = worker.work(&request) {
                            if response_tx.push(response).is_err() {
                                thread_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    std::thread::park_timeout(WORKER_IDLE);
                }
                log::debug!("{}: worker stopped", label);
            })?;

        Ok(Self {
            requests,
            responses,
            stop,
            dropped,
            thread: Some(thread),
        })
    }

    /// Queue a request. Real-time safe; a full ring drops the message.
    #[inline]
    fn schedule(&mut self, request: WorkMessage) {
        match self.requests.push(request) {
            Ok(()) => {
                if let Some(thread) = &self.thread {
                    thread.thread().unpark();
                }
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("LV2 worker thread panicked");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADAPTER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Lv2Plugin {
    host: HostedPlugin,
    resolver: Arc<dyn PluginResolver>,
    worker: Option<WorkerBridge>,
    bypass: bool,
}

impl Lv2Plugin {
    pub fn load(
        info: &PluginInfo,
        resolver: Arc<dyn PluginResolver>,
        sample_rate: f32,
        max_frames: usize,
    ) -> PluginResult<Self> {
        let mut host = HostedPlugin::load(info, resolver.as_ref(), IdStyle::Symbol, sample_rate, max_frames)?;
        let worker = Self::start_worker(&mut host)?;
        Ok(Self {
            host,
            resolver,
            worker,
            bypass: false,
        })
    }

    fn start_worker(host: &mut HostedPlugin) -> PluginResult<Option<WorkerBridge>> {
        match host.primary_mut().take_worker() {
            Some(worker) => {
                let name = host.descriptor().name.clone();
                WorkerBridge::spawn(&name, worker).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Requests and responses lost to a full ring
    pub fn dropped_work(&self) -> u64 {
        self.worker
            .as_ref()
            .map_or(0, |w| w.dropped.load(Ordering::Relaxed))
    }
}

impl ModuleBackend for Lv2Plugin {
    fn name(&self) -> &str {
        &self.host.descriptor().name
    }

    fn create_ports(&mut self) -> Vec<Port> {
        let d = self.host.descriptor();
        let (ins, outs) = (d.audio_inputs, d.audio_outputs);
        self.host.build_ports(ins, outs)
    }

    fn can_support_inputs(&self, n: usize) -> Option<usize> {
        self.host.fixed_arity(n)
    }

    fn configure_inputs(&mut self, _ports: &mut Vec<Port>, n: usize) -> bool {
        n == self.host.descriptor().audio_inputs
    }

    fn process(&mut self, ports: &mut [Port], cycle: &Cycle) {
        if let Some(worker) = &mut self.worker {
            while let Ok(response) = worker.responses.pop() {
                self.host.primary_mut().work_response(&response);
            }
        }

        if self.bypass {
            passthrough_audio(ports, cycle.frames);
        } else {
            self.host.run(ports, cycle);
        }

        if let Some(worker) = &mut self.worker {
            while let Some(request) = self.host.primary_mut().take_work_request() {
                worker.schedule(request);
            }
        }
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    fn latency(&self) -> u32 {
        self.host.latency()
    }

    fn buffer_size_changed(&mut self, frames: usize) {
        let sample_rate = self.host.sample_rate();
        self.host.reactivate(sample_rate, frames);
    }

    // Instantiation binds the rate; the worker belongs to the old instance
    fn sample_rate_changed(&mut self, sample_rate: f32) {
        self.worker = None;
        let result = self
            .host
            .reinstantiate(self.resolver.as_ref(), sample_rate)
            .and_then(|_| Self::start_worker(&mut self.host));
        match result {
            Ok(worker) => self.worker = worker,
            Err(e) => log::error!("{}: re-instantiation at {} Hz failed: {}", self.name(), sample_rate, e),
        }
    }

    fn save_state(&self, ports: &[Port]) -> PluginResult<Vec<u8>> {
        self.host.save_state(ports, true)
    }

    fn restore_state(&mut self, ports: &mut [Port], data: &[u8]) -> PluginResult<()> {
        self.host.restore_state(ports, data)
    }

    fn param_map(&self) -> Option<&ParamMap> {
        Some(self.host.params())
    }
}

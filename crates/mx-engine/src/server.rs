//! Audio server surface
//!
//! A Group is one client of an external audio server. The engine only sees
//! two seams:
//! - [`ServerClient`]: port registration and client lifecycle (UI thread)
//! - [`ServerIo`]: the server's port buffers for the cycle in flight (RT thread)
//!
//! [`MemoryServer`] implements both in process for offline rendering and tests.

use mx_core::{PortDirection, Sample};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use crate::{EngineError, EngineResult};

/// Server-side port handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerPortId(pub u32);

/// One client connection to the audio server
pub trait ServerClient: Send + Sync {
    fn name(&self) -> String;

    /// Register a port. `Input` ports carry audio into the engine.
    fn register_port(&self, name: &str, direction: PortDirection) -> EngineResult<ServerPortId>;

    fn unregister_port(&self, port: ServerPortId) -> EngineResult<()>;

    fn rename_port(&self, port: ServerPortId, name: &str) -> EngineResult<()>;

    fn sample_rate(&self) -> f32;

    fn buffer_size(&self) -> usize;

    fn activate(&self) -> EngineResult<()>;

    fn deactivate(&self);

    fn is_active(&self) -> bool;
}

/// Server port buffers for one cycle
pub trait ServerIo {
    fn input(&self, port: ServerPortId) -> Option<&[Sample]>;

    fn output(&mut self, port: ServerPortId) -> Option<&mut [Sample]>;
}

/// No server ports at all; capture reads as silence
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIo;

impl ServerIo for NullIo {
    fn input(&self, _port: ServerPortId) -> Option<&[Sample]> {
        None
    }

    fn output(&mut self, _port: ServerPortId) -> Option<&mut [Sample]> {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY SERVER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct ServerPortInfo {
    pub name: String,
    pub direction: PortDirection,
}

#[derive(Debug)]
struct ServerState {
    ports: BTreeMap<ServerPortId, ServerPortInfo>,
    next_id: u32,
    active: bool,
    sample_rate: f32,
    buffer_size: usize,
}

/// Audio server living entirely in memory
#[derive(Debug)]
pub struct MemoryServer {
    name: String,
    state: Mutex<ServerState>,
}

impl MemoryServer {
    pub fn new(name: &str, sample_rate: f32, buffer_size: usize) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ServerState {
                ports: BTreeMap::new(),
                next_id: 1,
                active: false,
                sample_rate,
                buffer_size,
            }),
        }
    }

    /// Change the reported buffer size. The owning Group still needs its
    /// `buffer_size` callback.
    pub fn set_buffer_size(&self, frames: usize) {
        self.state.lock().buffer_size = frames;
    }

    pub fn set_sample_rate(&self, sample_rate: f32) {
        self.state.lock().sample_rate = sample_rate;
    }

    pub fn port_count(&self) -> usize {
        self.state.lock().ports.len()
    }

    pub fn port_names(&self) -> Vec<String> {
        self.state.lock().ports.values().map(|p| p.name.clone()).collect()
    }

    pub fn port_by_name(&self, name: &str) -> Option<ServerPortId> {
        self.state
            .lock()
            .ports
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(id, _)| *id)
    }

    pub fn port_info(&self, port: ServerPortId) -> Option<ServerPortInfo> {
        self.state.lock().ports.get(&port).cloned()
    }

    /// Zeroed buffers for every registered port, sized to the buffer size
    pub fn io(&self) -> MemoryIo {
        let state = self.state.lock();
        let buffers = state
            .ports
            .keys()
            .map(|id| (*id, vec![0.0; state.buffer_size]))
            .collect();
        MemoryIo { buffers }
    }
}

impl ServerClient for MemoryServer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn register_port(&self, name: &str, direction: PortDirection) -> EngineResult<ServerPortId> {
        let mut state = self.state.lock();
        if state.ports.values().any(|p| p.name == name) {
            return Err(EngineError::Server(format!("port name in use: {name}")));
        }
        let id = ServerPortId(state.next_id);
        state.next_id += 1;
        state.ports.insert(
            id,
            ServerPortInfo {
                name: name.to_string(),
                direction,
            },
        );
        log::debug!("{}: registered port {}", self.name, name);
        Ok(id)
    }

    fn unregister_port(&self, port: ServerPortId) -> EngineResult<()> {
        match self.state.lock().ports.remove(&port) {
            Some(info) => {
                log::debug!("{}: unregistered port {}", self.name, info.name);
                Ok(())
            }
            None => Err(EngineError::Server(format!("unknown port {port:?}"))),
        }
    }

    fn rename_port(&self, port: ServerPortId, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock();
        match state.ports.get_mut(&port) {
            Some(info) => {
                info.name = name.to_string();
                Ok(())
            }
            None => Err(EngineError::Server(format!("unknown port {port:?}"))),
        }
    }

    fn sample_rate(&self) -> f32 {
        self.state.lock().sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.state.lock().buffer_size
    }

    fn activate(&self) -> EngineResult<()> {
        self.state.lock().active = true;
        log::info!("{}: client activated", self.name);
        Ok(())
    }

    fn deactivate(&self) {
        self.state.lock().active = false;
        log::info!("{}: client deactivated", self.name);
    }

    fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

/// Per-cycle buffers handed to `Group::process`
#[derive(Debug, Default)]
pub struct MemoryIo {
    buffers: HashMap<ServerPortId, Vec<Sample>>,
}

impl MemoryIo {
    /// Writable view of any port, for feeding capture ports
    pub fn buffer_mut(&mut self, port: ServerPortId) -> Option<&mut [Sample]> {
        self.buffers.get_mut(&port).map(Vec::as_mut_slice)
    }

    pub fn buffer(&self, port: ServerPortId) -> Option<&[Sample]> {
        self.buffers.get(&port).map(Vec::as_slice)
    }
}

impl ServerIo for MemoryIo {
    fn input(&self, port: ServerPortId) -> Option<&[Sample]> {
        self.buffer(port)
    }

    fn output(&mut self, port: ServerPortId) -> Option<&mut [Sample]> {
        self.buffer_mut(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let server = MemoryServer::new("test", 48000.0, 64);
        let a = server.register_port("A/in-1", PortDirection::Input).unwrap();
        let b = server.register_port("A/out-1", PortDirection::Output).unwrap();
        assert_ne!(a, b);
        assert_eq!(server.port_count(), 2);
        assert_eq!(server.port_by_name("A/out-1"), Some(b));

        server.unregister_port(a).unwrap();
        assert_eq!(server.port_count(), 1);
        assert!(server.unregister_port(a).is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let server = MemoryServer::new("test", 48000.0, 64);
        server.register_port("x", PortDirection::Input).unwrap();
        assert!(matches!(
            server.register_port("x", PortDirection::Output),
            Err(EngineError::Server(_))
        ));
    }

    #[test]
    fn test_rename() {
        let server = MemoryServer::new("test", 48000.0, 64);
        let id = server.register_port("A/in-1", PortDirection::Input).unwrap();
        server.rename_port(id, "B/in-1").unwrap();
        assert_eq!(server.port_names(), vec!["B/in-1".to_string()]);
    }

    #[test]
    fn test_io_buffers_sized() {
        let server = MemoryServer::new("test", 48000.0, 32);
        let id = server.register_port("in", PortDirection::Input).unwrap();
        let mut io = server.io();
        assert_eq!(io.input(id).unwrap().len(), 32);
        io.buffer_mut(id).unwrap()[0] = 0.5;
        assert_eq!(io.input(id).unwrap()[0], 0.5);
        assert!(io.input(ServerPortId(999)).is_none());
    }

    #[test]
    fn test_activation() {
        let server = MemoryServer::new("test", 48000.0, 32);
        assert!(!server.is_active());
        server.activate().unwrap();
        assert!(server.is_active());
        server.deactivate();
        assert!(!server.is_active());
    }
}

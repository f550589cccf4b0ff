//! OSC control surface
//!
//! Binds the mixer's OSC endpoint and runs its listener thread. Routed
//! messages arrive on a crossbeam channel and are applied on the UI thread
//! by [`ControlSurface::drain`]; changes made locally are echoed to every
//! external path bound to the port with [`ControlSurface::notify`].

use crossbeam_channel::{Receiver, RecvTimeoutError};
use mx_control::{ControlMessage, Listener, OscEndpoint};
use std::net::SocketAddr;
use std::time::Duration;

use crate::mixer::Mixer;
use crate::EngineResult;

pub struct ControlSurface {
    endpoint: OscEndpoint,
    _listener: Listener,
    messages: Receiver<ControlMessage>,
}

impl ControlSurface {
    /// Bind the configured OSC port and start listening
    pub fn start(mixer: &Mixer) -> EngineResult<Self> {
        let config = mixer.config();
        let endpoint = OscEndpoint::bind(config.osc.port, &config.instance_name)?;
        Self::with_endpoint(mixer, endpoint)
    }

    pub fn with_endpoint(mixer: &Mixer, endpoint: OscEndpoint) -> EngineResult<Self> {
        let (listener, messages) = endpoint.spawn_listener(mixer.control().clone())?;
        Ok(Self {
            endpoint,
            _listener: listener,
            messages,
        })
    }

    pub fn endpoint(&self) -> &OscEndpoint {
        &self.endpoint
    }

    pub fn local_addr(&self) -> EngineResult<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Introduce ourselves to a peer and ask for its signals
    pub fn add_peer(&self, mixer: &Mixer, name: &str, addr: SocketAddr) -> EngineResult<()> {
        let mut map = mixer.control().lock();
        Ok(self.endpoint.add_peer(&mut map, name, addr)?)
    }

    /// Apply every message received so far. Returns how many set a value.
    pub fn drain(&self, mixer: &Mixer) -> usize {
        self.messages
            .try_iter()
            .filter(|message| apply(mixer, message))
            .count()
    }

    /// Wait up to `timeout` for the first message, then drain
    pub fn drain_timeout(&self, mixer: &Mixer, timeout: Duration) -> usize {
        match self.messages.recv_timeout(timeout) {
            Ok(first) => usize::from(apply(mixer, &first)) + self.drain(mixer),
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("OSC listener gone");
                0
            }
        }
    }

    /// Send a locally made change to every external path bound to `path`
    pub fn notify(&self, mixer: &Mixer, path: &str, value: f32) -> EngineResult<usize> {
        let map = mixer.control().lock();
        Ok(self.endpoint.notify(path, value, &map)?)
    }

    /// Set a control from the UI and echo it to the surfaces
    pub fn set_and_notify(&self, mixer: &Mixer, path: &str, value: f32) -> EngineResult<f32> {
        let applied = mixer.set_control(path, value)?;
        self.notify(mixer, path, applied)?;
        Ok(applied)
    }
}

fn apply(mixer: &Mixer, message: &ControlMessage) -> bool {
    match message {
        ControlMessage::Set { path, value } => match mixer.set_control(path, *value) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("OSC {} ignored: {}", path, e);
                false
            }
        },
        ControlMessage::SignalCreated(signal) => {
            log::debug!("Peer {} published {}", signal.peer, signal.path);
            false
        }
        ControlMessage::SignalRemoved(signal) => {
            log::debug!("Peer {} withdrew {}", signal.peer, signal.path);
            false
        }
    }
}

//! Peer signal discovery
//!
//! Peers announce the signals they publish (`/signal/created`,
//! `/signal/removed`, replies to `/signal/list`). The directory keeps what
//! each peer has announced so the UI can offer binding candidates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Input,
    Output,
    Bidirectional,
}

impl SignalDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "in",
            Self::Output => "out",
            Self::Bidirectional => "bidi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(Self::Input),
            "out" => Some(Self::Output),
            "bidi" => Some(Self::Bidirectional),
            _ => None,
        }
    }
}

/// A signal announced by a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSignal {
    pub peer: String,
    pub path: String,
    pub direction: SignalDirection,
    pub min: f32,
    pub max: f32,
}

impl PeerSignal {
    /// Control-voltage style output: exactly 0..1
    pub fn is_cv_candidate(&self) -> bool {
        self.direction == SignalDirection::Output && self.min == 0.0 && self.max == 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Created,
    Removed,
}

#[derive(Debug, Clone)]
struct Peer {
    addr: SocketAddr,
    signals: BTreeMap<String, PeerSignal>,
}

/// Known peers and their signals
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: BTreeMap<String, Peer>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Returns false when the name was already known (its
    /// address is updated).
    pub fn add_peer(&mut self, name: &str, addr: SocketAddr) -> bool {
        match self.peers.get_mut(name) {
            Some(peer) => {
                peer.addr = addr;
                false
            }
            None => {
                log::info!("New OSC peer {} at {}", name, addr);
                self.peers.insert(
                    name.to_string(),
                    Peer {
                        addr,
                        signals: BTreeMap::new(),
                    },
                );
                true
            }
        }
    }

    pub fn remove_peer(&mut self, name: &str) -> bool {
        self.peers.remove(name).is_some()
    }

    pub fn peer_addr(&self, name: &str) -> Option<SocketAddr> {
        self.peers.get(name).map(|p| p.addr)
    }

    /// Name of the peer at `addr`
    pub fn peer_name(&self, addr: SocketAddr) -> Option<&str> {
        self.peers
            .iter()
            .find(|(_, p)| p.addr == addr)
            .map(|(name, _)| name.as_str())
    }

    pub fn peer_addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.peers.values().map(|p| p.addr)
    }

    pub fn peer_names(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Record an announced signal. Returns false for an unknown peer.
    pub fn signal_created(&mut self, signal: PeerSignal) -> bool {
        match self.peers.get_mut(&signal.peer) {
            Some(peer) => {
                log::debug!("Peer {} signal {} ({})", signal.peer, signal.path, signal.direction.as_str());
                peer.signals.insert(signal.path.clone(), signal);
                true
            }
            None => false,
        }
    }

    pub fn signal_removed(&mut self, peer: &str, path: &str) -> Option<PeerSignal> {
        self.peers.get_mut(peer)?.signals.remove(path)
    }

    pub fn signals(&self, peer: &str) -> impl Iterator<Item = &PeerSignal> {
        self.peers.get(peer).into_iter().flat_map(|p| p.signals.values())
    }

    /// Call back once per known signal, peers and paths in sorted order
    pub fn list_peer_signals<T>(&self, context: &mut T, mut callback: impl FnMut(&PeerSignal, SignalState, &mut T)) {
        for peer in self.peers.values() {
            for signal in peer.signals.values() {
                callback(signal, SignalState::Created, context);
            }
        }
    }

    /// Signals a controller may bind to in CV mode
    pub fn cv_candidates(&self) -> Vec<&PeerSignal> {
        self.peers
            .values()
            .flat_map(|p| p.signals.values())
            .filter(|s| s.is_cv_candidate())
            .collect()
    }
}

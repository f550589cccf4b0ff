//! OSC endpoint (rosc over UDP)
//!
//! Wire protocol between peers:
//! - `/hello name`: introduce ourselves; an unknown sender is registered and
//!   answered once with our own `/hello` and a `/signal/list` request
//! - `/signal/list`: answered with one `/reply "/signal/list" path direction
//!   min max` per published signal, then a bare `/reply "/signal/list"`
//! - `/signal/created path direction min max`, `/signal/removed path`
//! - anything else with a numeric first argument is a value, routed through
//!   the [`ControlMap`]
//!
//! The socket is non-blocking; `poll` drains whatever has arrived.

use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Mutex, RwLock};
use rosc::{OscMessage, OscPacket, OscType};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::signal::{PeerSignal, SignalDirection};
use crate::{ControlError, ControlMap, ControlMessage, ControlResult};

const MAX_PACKET: usize = 65536;
const SIGNAL_LIST: &str = "/signal/list";

/// Listener → UI queue depth
const LISTENER_QUEUE: usize = 1024;
const LISTENER_IDLE: Duration = Duration::from_millis(2);

/// A signal this endpoint publishes
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSignal {
    pub path: String,
    pub direction: SignalDirection,
    pub min: f32,
    pub max: f32,
}

impl LocalSignal {
    fn args(&self) -> Vec<OscType> {
        vec![
            OscType::String(self.path.clone()),
            OscType::String(self.direction.as_str().to_string()),
            OscType::Float(self.min),
            OscType::Float(self.max),
        ]
    }
}

pub struct OscEndpoint {
    socket: UdpSocket,
    name: String,
    signals: Arc<RwLock<BTreeMap<String, LocalSignal>>>,
    buf: Vec<u8>,
}

impl OscEndpoint {
    /// Listen on every interface; port 0 picks a free one
    pub fn bind(port: u16, name: &str) -> ControlResult<Self> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port)), name)
    }

    pub fn bind_addr(addr: SocketAddr, name: &str) -> ControlResult<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        log::info!("OSC endpoint {} listening on {}", name, socket.local_addr()?);
        Ok(Self {
            socket,
            name: name.to_string(),
            signals: Arc::new(RwLock::new(BTreeMap::new())),
            buf: vec![0; MAX_PACKET],
        })
    }

    /// Second handle on the same socket and published signals
    pub fn try_clone(&self) -> ControlResult<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            name: self.name.clone(),
            signals: self.signals.clone(),
            buf: vec![0; MAX_PACKET],
        })
    }

    pub fn local_addr(&self) -> ControlResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, to: SocketAddr, path: &str, args: Vec<OscType>) -> ControlResult<()> {
        let packet = OscPacket::Message(OscMessage {
            addr: path.to_string(),
            args,
        });
        let bytes = rosc::encoder::encode(&packet).map_err(|e| ControlError::Osc(format!("{e:?}")))?;
        self.socket.send_to(&bytes, to)?;
        Ok(())
    }

    // ─── Peers ──────────────────────────────────────────────────────────────

    /// Register `name` at `addr`, introduce ourselves and ask for its signals
    pub fn add_peer(&self, map: &mut ControlMap, name: &str, addr: SocketAddr) -> ControlResult<()> {
        map.peers.add_peer(name, addr);
        self.send(addr, "/hello", vec![OscType::String(self.name.clone())])?;
        self.send(addr, SIGNAL_LIST, Vec::new())
    }

    /// Ask every known peer for its signal list
    pub fn request_peer_signals(&self, map: &ControlMap) -> ControlResult<()> {
        for addr in map.peers.peer_addrs() {
            self.send(addr, SIGNAL_LIST, Vec::new())?;
        }
        Ok(())
    }

    /// Send a value to one peer by name
    pub fn send_to_peer(&self, map: &ControlMap, peer: &str, path: &str, value: f32) -> ControlResult<()> {
        let addr = map
            .peers
            .peer_addr(peer)
            .ok_or_else(|| ControlError::UnknownPeer(peer.to_string()))?;
        self.send(addr, path, vec![OscType::Float(value)])
    }

    // ─── Published signals ──────────────────────────────────────────────────

    pub fn add_signal(&self, map: &ControlMap, signal: LocalSignal) -> ControlResult<()> {
        let args = signal.args();
        self.signals.write().insert(signal.path.clone(), signal);
        for addr in map.peers.peer_addrs() {
            self.send(addr, "/signal/created", args.clone())?;
        }
        Ok(())
    }

    pub fn remove_signal(&self, map: &ControlMap, path: &str) -> ControlResult<bool> {
        if self.signals.write().remove(path).is_none() {
            return Ok(false);
        }
        for addr in map.peers.peer_addrs() {
            self.send(addr, "/signal/removed", vec![OscType::String(path.to_string())])?;
        }
        Ok(true)
    }

    fn reply_signal_list(&self, to: SocketAddr) -> ControlResult<()> {
        let signals: Vec<LocalSignal> = self.signals.read().values().cloned().collect();
        for signal in signals {
            let mut args = vec![OscType::String(SIGNAL_LIST.to_string())];
            args.extend(signal.args());
            self.send(to, "/reply", args)?;
        }
        self.send(to, "/reply", vec![OscType::String(SIGNAL_LIST.to_string())])
    }

    // ─── Outbound values ────────────────────────────────────────────────────

    /// Send `value` on every external path bound to `internal`, to every
    /// peer. Returns the number of messages sent.
    pub fn notify(&self, internal: &str, value: f32, map: &ControlMap) -> ControlResult<usize> {
        let mut sent = 0;
        for external in map.table.connections(internal) {
            for addr in map.peers.peer_addrs() {
                self.send(addr, external, vec![OscType::Float(value)])?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    // ─── Inbound ────────────────────────────────────────────────────────────

    /// Drain every pending packet without blocking
    pub fn poll(&mut self, map: &mut ControlMap) -> ControlResult<Vec<ControlMessage>> {
        let mut out = Vec::new();
        loop {
            let (size, from) = match self.socket.recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                // ICMP from a peer that went away
                Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset) => continue,
                Err(e) => return Err(e.into()),
            };
            let decoded = rosc::decoder::decode_udp(&self.buf[..size]).map(|(_, packet)| packet);
            match decoded {
                Ok(packet) => self.handle_packet(from, packet, map, &mut out)?,
                Err(e) => log::warn!("Malformed OSC packet from {}: {:?}", from, e),
            }
        }
        Ok(out)
    }

    fn handle_packet(
        &self,
        from: SocketAddr,
        packet: OscPacket,
        map: &mut ControlMap,
        out: &mut Vec<ControlMessage>,
    ) -> ControlResult<()> {
        match packet {
            OscPacket::Message(msg) => self.handle_message(from, msg, map, out),
            OscPacket::Bundle(bundle) => {
                for inner in bundle.content {
                    self.handle_packet(from, inner, map, out)?;
                }
                Ok(())
            }
        }
    }

    fn handle_message(
        &self,
        from: SocketAddr,
        msg: OscMessage,
        map: &mut ControlMap,
        out: &mut Vec<ControlMessage>,
    ) -> ControlResult<()> {
        let peer = map
            .peers
            .peer_name(from)
            .map_or_else(|| from.to_string(), str::to_string);

        match (msg.addr.as_str(), msg.args.as_slice()) {
            ("/hello", [OscType::String(name), ..]) => {
                if map.peers.add_peer(name, from) {
                    self.send(from, "/hello", vec![OscType::String(self.name.clone())])?;
                    self.send(from, SIGNAL_LIST, Vec::new())?;
                }
            }
            (SIGNAL_LIST, _) => self.reply_signal_list(from)?,
            ("/reply", [OscType::String(what), rest @ ..]) if what == SIGNAL_LIST => {
                // A bare reply ends the list
                if let Some(signal) = parse_signal(&peer, rest) {
                    self.signal_created(signal, map, out);
                }
            }
            ("/signal/created", args) => match parse_signal(&peer, args) {
                Some(signal) => self.signal_created(signal, map, out),
                None => log::warn!("Malformed /signal/created from {}", peer),
            },
            ("/signal/removed", [OscType::String(path), ..]) => {
                if let Some(signal) = map.peers.signal_removed(&peer, path) {
                    out.push(ControlMessage::SignalRemoved(signal));
                }
            }
            (path, [first, ..]) => match number(first) {
                Some(value) => out.extend(map.route(&peer, path, value)),
                None => log::debug!("Ignoring non-numeric {} from {}", path, peer),
            },
            (path, []) => log::debug!("Ignoring empty {} from {}", path, peer),
        }
        Ok(())
    }

    fn signal_created(&self, signal: PeerSignal, map: &mut ControlMap, out: &mut Vec<ControlMessage>) {
        if map.peers.signal_created(signal.clone()) {
            out.push(ControlMessage::SignalCreated(signal));
        } else {
            log::debug!("Signal {} from unregistered peer {}", signal.path, signal.peer);
        }
    }

    // ─── Listener thread ────────────────────────────────────────────────────

    /// Poll on a background thread, forwarding routed messages to the
    /// returned channel. This endpoint stays usable for sending.
    pub fn spawn_listener(&self, map: Arc<Mutex<ControlMap>>) -> ControlResult<(Listener, Receiver<ControlMessage>)> {
        let mut endpoint = self.try_clone()?;
        let (tx, rx) = bounded(LISTENER_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let thread = std::thread::Builder::new()
            .name(format!("osc-listener:{}", self.name))
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    let messages = endpoint.poll(&mut map.lock());
                    match messages {
                        Ok(messages) => {
                            for message in messages {
                                if tx.try_send(message).is_err() {
                                    log::warn!("OSC listener queue full, dropping message");
                                }
                            }
                        }
                        Err(e) => log::error!("OSC receive failed: {}", e),
                    }
                    std::thread::sleep(LISTENER_IDLE);
                }
            })?;

        Ok((
            Listener {
                stop,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

/// Stops and joins the listener thread when dropped
pub struct Listener {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("OSC listener thread panicked");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn number(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(v) => Some(*v),
        OscType::Double(v) => Some(*v as f32),
        OscType::Int(v) => Some(*v as f32),
        OscType::Long(v) => Some(*v as f32),
        OscType::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// `path direction min max`
fn parse_signal(peer: &str, args: &[OscType]) -> Option<PeerSignal> {
    match args {
        [OscType::String(path), OscType::String(direction), min, max, ..] => Some(PeerSignal {
            peer: peer.to_string(),
            path: path.clone(),
            direction: SignalDirection::parse(direction)?,
            min: number(min)?,
            max: number(max)?,
        }),
        _ => None,
    }
}

//! Integration tests for the OSC control surface
//!
//! A controller endpoint on loopback talks to the mixer's surface, whose
//! listener runs on its own thread.

mod common;

use approx::assert_relative_eq;
use common::{init_logging, mixer};
use mx_control::{ControlMap, LearnOutcome, OscEndpoint};
use mx_core::{ModuleId, PortRef};
use mx_engine::{ControlSurface, Mixer, Module};
use parking_lot::Mutex;
use rosc::{OscPacket, OscType};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn loopback(name: &str) -> OscEndpoint {
    OscEndpoint::bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)), name).unwrap()
}

fn add_vox(mixer: &Mixer) -> ModuleId {
    let ctx = *mixer.context();
    let mut chain = mixer.new_chain("Vox");
    let gain = chain.add_module(Module::gain(1, &ctx));
    mixer.add_chain("main", chain).unwrap();
    gain
}

fn gain_db(mixer: &Mixer, gain: ModuleId) -> f32 {
    mixer
        .with_chain("Vox", |c| c.port(PortRef::new(gain, 2)).unwrap().control_value())
        .unwrap()
}

/// Controller side: an endpoint that knows the mixer as peer "mixer"
fn controller(surface: &ControlSurface) -> (OscEndpoint, ControlMap) {
    let endpoint = loopback("controller");
    let mut map = ControlMap::new();
    map.peers.add_peer("mixer", surface.local_addr().unwrap());
    (endpoint, map)
}

#[test]
fn test_internal_path_sets_control() {
    init_logging();
    let (mixer, _server) = mixer();
    let gain = add_vox(&mixer);
    let surface = ControlSurface::with_endpoint(&mixer, loopback("mixer")).unwrap();
    let (remote, map) = controller(&surface);

    remote
        .send_to_peer(&map, "mixer", "/strip/Vox/Gain/Gain_(dB)", -10.0)
        .unwrap();
    assert_eq!(surface.drain_timeout(&mixer, TIMEOUT), 1);
    assert_relative_eq!(gain_db(&mixer, gain), -10.0);

    // Out-of-range values are clamped to the port
    remote.send_to_peer(&map, "mixer", "/strip/Vox/0/0", 40.0).unwrap();
    assert_eq!(surface.drain_timeout(&mixer, TIMEOUT), 1);
    assert_relative_eq!(gain_db(&mixer, gain), 6.0);
}

#[test]
fn test_unknown_path_is_ignored() {
    init_logging();
    let (mixer, _server) = mixer();
    let gain = add_vox(&mixer);
    let surface = ControlSurface::with_endpoint(&mixer, loopback("mixer")).unwrap();
    let (remote, map) = controller(&surface);

    remote.send_to_peer(&map, "mixer", "/strip/Drums/Gain/Gain_(dB)", -10.0).unwrap();
    remote.send_to_peer(&map, "mixer", "/strip/Vox/Gain/Gain_(dB)", -3.0).unwrap();

    // Both arrive, only the second names a strip that exists
    let mut applied = 0;
    for _ in 0..2 {
        applied += surface.drain_timeout(&mixer, TIMEOUT);
        if applied == 1 {
            break;
        }
    }
    assert_eq!(applied, 1);
    assert_relative_eq!(gain_db(&mixer, gain), -3.0);
}

#[test]
fn test_learn_binds_external_path() {
    init_logging();
    let (mixer, _server) = mixer();
    let gain = add_vox(&mixer);
    let surface = ControlSurface::with_endpoint(&mixer, loopback("mixer")).unwrap();
    let (remote, map) = controller(&surface);

    let outcome = Arc::new(Mutex::new(None));
    let internal = {
        let outcome = outcome.clone();
        mixer
            .learn(
                "Vox",
                PortRef::new(gain, 2),
                None,
                Box::new(move |o: LearnOutcome| *outcome.lock() = Some(o)),
            )
            .unwrap()
    };
    assert_eq!(internal, "/strip/Vox/Gain/Gain_(dB)");

    remote.send_to_peer(&map, "mixer", "/1/fader3", -18.0).unwrap();
    assert_eq!(surface.drain_timeout(&mixer, TIMEOUT), 1);
    assert_relative_eq!(gain_db(&mixer, gain), -18.0);
    assert_eq!(
        *outcome.lock(),
        Some(LearnOutcome::Bound {
            external: "/1/fader3".into(),
            internal: internal.clone()
        })
    );
    assert_eq!(mixer.translations().lookup("/1/fader3"), Some(internal.as_str()));

    // Later messages follow the translation without learning again
    remote.send_to_peer(&map, "mixer", "/1/fader3", -1.0).unwrap();
    assert_eq!(surface.drain_timeout(&mixer, TIMEOUT), 1);
    assert_relative_eq!(gain_db(&mixer, gain), -1.0);
}

#[test]
fn test_local_change_is_echoed_to_peer() {
    init_logging();
    let (mixer, _server) = mixer();
    add_vox(&mixer);
    let surface = ControlSurface::with_endpoint(&mixer, loopback("mixer")).unwrap();

    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();
    surface
        .add_peer(&mixer, "surface", peer.local_addr().unwrap())
        .unwrap();
    mixer.add_translation("/1/fader3", "/strip/Vox/Gain/Gain_(dB)");

    let applied = surface
        .set_and_notify(&mixer, "/strip/Vox/Gain/Gain_(dB)", -4.5)
        .unwrap();
    assert_relative_eq!(applied, -4.5);

    // Skip the greeting sent by add_peer
    let mut buf = [0u8; 1024];
    let echoed = loop {
        let (size, _) = peer.recv_from(&mut buf).unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buf[..size]).unwrap();
        if let OscPacket::Message(msg) = packet {
            if msg.addr == "/1/fader3" {
                break msg.args;
            }
        }
    };
    assert_eq!(echoed, vec![OscType::Float(-4.5)]);
}

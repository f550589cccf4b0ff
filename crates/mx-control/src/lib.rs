//! Remote control mapping
//!
//! Everything between an external controller and a port's control value:
//! - `TranslationTable`: external OSC path ⇄ internal port path
//! - `LearnSession`: bind the next incoming path to an armed target
//! - `PeerDirectory`: signals announced by other OSC peers
//! - `cv_to_control`: 0..1 control voltage onto a port's range
//! - `OscEndpoint`: rosc over UDP, plus a listener thread feeding a channel
//!
//! None of this runs on the real-time thread.

use thiserror::Error;

pub mod cv;
pub mod endpoint;
pub mod learn;
pub mod signal;
pub mod translation;

pub use cv::{control_to_cv, cv_to_control};
pub use endpoint::{Listener, LocalSignal, OscEndpoint};
pub use learn::{LearnCompletion, LearnOutcome, LearnSession};
pub use signal::{PeerDirectory, PeerSignal, SignalDirection, SignalState};
pub use translation::{Translation, TranslationTable};

/// Internal port paths all live under this prefix
pub const STRIP_PREFIX: &str = "/strip/";

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OSC error: {0}")]
    Osc(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ControlResult<T> = Result<T, ControlError>;

/// What the control layer hands to the graph
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Set the control input at internal `path`
    Set { path: String, value: f32 },
    SignalCreated(PeerSignal),
    SignalRemoved(PeerSignal),
}

/// Translation table, learn slot and peer directory, owned together
#[derive(Debug, Default)]
pub struct ControlMap {
    pub table: TranslationTable,
    pub learn: LearnSession,
    pub peers: PeerDirectory,
}

impl ControlMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: TranslationTable) -> Self {
        Self {
            table,
            ..Self::default()
        }
    }

    /// Route one incoming value from `peer`.
    ///
    /// An armed learn claims the path first. Translated paths map to their
    /// internal target; untranslated paths already under
    /// [`STRIP_PREFIX`] pass through unchanged; anything else is dropped.
    pub fn route(&mut self, peer: &str, path: &str, value: f32) -> Option<ControlMessage> {
        let internal = path.starts_with(STRIP_PREFIX);
        if !internal {
            self.learn.offer(peer, path, &mut self.table);
        }

        if let Some(target) = self.table.lookup(path) {
            return Some(ControlMessage::Set {
                path: target.to_string(),
                value,
            });
        }
        if internal {
            return Some(ControlMessage::Set {
                path: path.to_string(),
                value,
            });
        }
        log::trace!("No translation for {} from {}", path, peer);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_translated() {
        let mut map = ControlMap::new();
        map.table.add_translation("/fader/1", "/strip/A/Gain/Gain_(dB)");
        assert_eq!(
            map.route("surface", "/fader/1", -6.0),
            Some(ControlMessage::Set {
                path: "/strip/A/Gain/Gain_(dB)".into(),
                value: -6.0
            })
        );
    }

    #[test]
    fn test_route_strip_passthrough_and_drop() {
        let mut map = ControlMap::new();
        assert_eq!(
            map.route("surface", "/strip/A/Pan/Pan", 0.25),
            Some(ControlMessage::Set {
                path: "/strip/A/Pan/Pan".into(),
                value: 0.25
            })
        );
        assert_eq!(map.route("surface", "/unknown", 1.0), None);
    }

    #[test]
    fn test_route_learns_then_translates() {
        let mut map = ControlMap::new();
        map.learn.arm("/strip/A/Gain/Gain_(dB)", None, Box::new(|_: LearnOutcome| {}));
        let routed = map.route("surface", "/knob/4", 0.5);
        assert_eq!(
            routed,
            Some(ControlMessage::Set {
                path: "/strip/A/Gain/Gain_(dB)".into(),
                value: 0.5
            })
        );
        assert!(!map.learn.is_armed());
    }

    #[test]
    fn test_internal_paths_never_learned() {
        let mut map = ControlMap::new();
        map.learn.arm("/strip/A/Gain/Gain_(dB)", None, Box::new(|_: LearnOutcome| {}));
        map.route("surface", "/strip/B/Pan/Pan", 0.5);
        assert!(map.learn.is_armed());
        assert!(map.table.is_empty());
    }
}

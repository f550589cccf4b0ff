//! Learn binding
//!
//! Arming a session names an internal path (and optionally the only peer
//! allowed to claim it). The next external path offered by a matching peer
//! is bound to it in the translation table and the session disarms. Arming
//! again preempts whatever was armed before.

use std::fmt;

use crate::translation::TranslationTable;

/// How an armed learn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    Bound { external: String, internal: String },
    /// Another target was armed before anything arrived
    Preempted { internal: String },
    Cancelled { internal: String },
}

pub type LearnCompletion = Box<dyn FnOnce(LearnOutcome) + Send>;

struct Armed {
    internal: String,
    peer: Option<String>,
    completion: LearnCompletion,
}

#[derive(Default)]
pub struct LearnSession {
    armed: Option<Armed>,
}

impl LearnSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next external path to bind to `internal`
    pub fn arm(&mut self, internal: &str, peer: Option<&str>, completion: LearnCompletion) {
        if let Some(previous) = self.armed.take() {
            log::debug!("Learn for {} preempted by {}", previous.internal, internal);
            (previous.completion)(LearnOutcome::Preempted {
                internal: previous.internal,
            });
        }
        log::info!("Learning {}", internal);
        self.armed = Some(Armed {
            internal: internal.to_string(),
            peer: peer.map(str::to_string),
            completion,
        });
    }

    /// Offer an incoming external path. Binds and returns true when armed
    /// and `peer` matches; otherwise leaves everything as it was.
    pub fn offer(&mut self, peer: &str, external: &str, table: &mut TranslationTable) -> bool {
        let matches = match &self.armed {
            Some(armed) => armed.peer.as_deref().is_none_or(|p| p == peer),
            None => false,
        };
        if !matches {
            return false;
        }
        let Some(armed) = self.armed.take() else {
            return false;
        };

        table.add_translation(external, &armed.internal);
        log::info!("Learned {} -> {} from {}", external, armed.internal, peer);
        (armed.completion)(LearnOutcome::Bound {
            external: external.to_string(),
            internal: armed.internal,
        });
        true
    }

    pub fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            (armed.completion)(LearnOutcome::Cancelled {
                internal: armed.internal,
            });
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Internal path waiting to be bound
    pub fn target(&self) -> Option<&str> {
        self.armed.as_ref().map(|a| a.internal.as_str())
    }
}

impl fmt::Debug for LearnSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearnSession")
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

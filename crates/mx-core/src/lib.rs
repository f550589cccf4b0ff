//! mx-core: Shared types for the MX mixer engine
//!
//! Everything the graph, the plugin hosts and the control layer agree on:
//! - `Port` and its hints, buffers and connection back-reference
//! - `ModuleId` identities (hex encoded when persisted)
//! - Fixed-capacity event buffers
//! - `EngineConfig` (JSON preferences file)

mod config;
mod cycle;
mod error;
mod event;
mod id;
mod port;
mod sample;

pub use config::*;
pub use cycle::*;
pub use error::*;
pub use event::*;
pub use id::*;
pub use port::*;
pub use sample::*;

/// Upper bound on audio channels gathered on the stack for one process call
pub const MAX_CHANNELS: usize = 16;

/// Whether a module may run `n` audio channels without spilling the
/// per-cycle channel lists to the heap
#[inline]
pub fn channel_count_supported(n: usize) -> bool {
    (1..=MAX_CHANNELS).contains(&n)
}

/// Default capacity of an event port buffer (events per cycle)
pub const DEFAULT_EVENT_CAPACITY: usize = 512;

//! Per-cycle processing context

/// What a module is told about the cycle in flight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cycle {
    /// Frames to process this cycle (never more than the port buffer size)
    pub frames: usize,
    /// Current sample rate in Hz
    pub sample_rate: f32,
}

impl Cycle {
    pub fn new(frames: usize, sample_rate: f32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }
}

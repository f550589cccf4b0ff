//! Parameter smoothing for built-in modules
//!
//! Exponential one-pole ramp so a control value arriving once per cycle
//! does not step the audio:
//!
//! current = current + coeff * (target - current)
//! coeff   = 1 - exp(-1 / (time_constant * sample_rate))

// ═══════════════════════════════════════════════════════════════════════════
// SMOOTHER CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

pub const MIN_SMOOTH_TIME_MS: f32 = 0.5;

pub const MAX_SMOOTH_TIME_MS: f32 = 200.0;

const SMOOTH_THRESHOLD: f32 = 1e-5;

// ═══════════════════════════════════════════════════════════════════════════
// SMOOTHER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ParamSmoother {
    current: f32,
    target: f32,
    coeff: f32,
    sample_rate: f32,
    smooth_time_ms: f32,
    is_smoothing: bool,
}

impl ParamSmoother {
    pub fn new(sample_rate: f32, initial_value: f32, smooth_time_ms: f32) -> Self {
        let smooth_time_ms = smooth_time_ms.clamp(MIN_SMOOTH_TIME_MS, MAX_SMOOTH_TIME_MS);
        Self {
            current: initial_value,
            target: initial_value,
            coeff: Self::calculate_coeff(sample_rate, smooth_time_ms),
            sample_rate,
            smooth_time_ms,
            is_smoothing: false,
        }
    }

    #[inline]
    fn calculate_coeff(sample_rate: f32, smooth_time_ms: f32) -> f32 {
        let time_constant_samples = (smooth_time_ms / 1000.0) * sample_rate;
        if time_constant_samples <= 1.0 {
            return 1.0;
        }
        1.0 - (-1.0 / time_constant_samples).exp()
    }

    #[inline]
    pub fn set_target(&mut self, target: f32) {
        if (self.target - target).abs() > SMOOTH_THRESHOLD {
            self.target = target;
            self.is_smoothing = true;
        }
    }

    #[inline]
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.is_smoothing = false;
    }

    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.is_smoothing {
            self.current += self.coeff * (self.target - self.current);
            if (self.current - self.target).abs() < SMOOTH_THRESHOLD {
                self.current = self.target;
                self.is_smoothing = false;
            }
        }
        self.current
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        self.is_smoothing
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.coeff = Self::calculate_coeff(sample_rate, self.smooth_time_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_converges_to_target() {
        let mut s = ParamSmoother::new(48000.0, 0.0, 1.0);
        s.set_target(1.0);
        assert!(s.is_smoothing());
        let first = s.next_value();
        assert!(first > 0.0 && first < 1.0);
        for _ in 0..48_000 {
            s.next_value();
        }
        assert!(!s.is_smoothing());
        assert_relative_eq!(s.current(), 1.0);
    }

    #[test]
    fn test_immediate() {
        let mut s = ParamSmoother::new(48000.0, 0.0, 20.0);
        s.set_immediate(0.5);
        assert!(!s.is_smoothing());
        assert_relative_eq!(s.next_value(), 0.5);
    }

    #[test]
    fn test_monotonic_ramp() {
        let mut s = ParamSmoother::new(48000.0, 0.0, 5.0);
        s.set_target(1.0);
        let mut last = 0.0;
        for _ in 0..256 {
            let v = s.next_value();
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn test_sample_rate_change_keeps_value() {
        let mut s = ParamSmoother::new(44100.0, 0.25, 10.0);
        s.set_sample_rate(96000.0);
        assert_relative_eq!(s.current(), 0.25);
        assert_eq!(s.target(), 0.25);
    }
}

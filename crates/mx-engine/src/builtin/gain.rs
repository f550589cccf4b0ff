//! Gain stage with mute, smoothed per sample

use mx_core::{
    buffer_copy_and_apply_gain, channel_count_supported, db_to_gain, passthrough_audio, split_audio, Cycle, Port,
    PortHints, MAX_CHANNELS,
};
use mx_plugin::ModuleBackend;

use super::{audio_ports, carry_controls};
use crate::smoother::ParamSmoother;

pub const GAIN_PORT: &str = "Gain (dB)";
pub const MUTE_PORT: &str = "Mute";

/// Floor of the gain control; anything at or below is silence
const MIN_GAIN_DB: f32 = -70.0;

pub struct GainModule {
    channels: usize,
    smoother: ParamSmoother,
    bypass: bool,
}

impl GainModule {
    pub fn new(channels: usize, sample_rate: f32, smooth_time_ms: f32) -> Self {
        Self {
            channels: channels.clamp(1, MAX_CHANNELS),
            smoother: ParamSmoother::new(sample_rate, 1.0, smooth_time_ms),
            bypass: false,
        }
    }

    fn ports_for(channels: usize) -> Vec<Port> {
        let mut ports = audio_ports(channels, channels);
        ports.push(Port::control_input(GAIN_PORT, PortHints::ranged(MIN_GAIN_DB, 6.0, 0.0)));
        ports.push(Port::control_input(MUTE_PORT, PortHints::boolean(false)));
        ports
    }

    fn target_gain(&self, ports: &[Port]) -> f32 {
        let db = ports.get(2 * self.channels).map_or(0.0, |p| p.control_value());
        let mute = ports.get(2 * self.channels + 1).is_some_and(|p| p.control_value() > 0.5);
        if mute || db <= MIN_GAIN_DB {
            0.0
        } else {
            db_to_gain(db)
        }
    }
}

impl ModuleBackend for GainModule {
    fn name(&self) -> &str {
        "Gain"
    }

    fn create_ports(&mut self) -> Vec<Port> {
        Self::ports_for(self.channels)
    }

    fn can_support_inputs(&self, n: usize) -> Option<usize> {
        channel_count_supported(n).then_some(n)
    }

    fn configure_inputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool {
        if !channel_count_supported(n) {
            return false;
        }
        let mut fresh = Self::ports_for(n);
        carry_controls(ports, &mut fresh);
        *ports = fresh;
        self.channels = n;
        true
    }

    fn process(&mut self, ports: &mut [Port], cycle: &Cycle) {
        if self.bypass {
            passthrough_audio(ports, cycle.frames);
            return;
        }

        let target = self.target_gain(ports);
        self.smoother.set_target(target);

        let (inputs, mut outputs) = split_audio(ports, cycle.frames);
        if !self.smoother.is_smoothing() {
            let gain = self.smoother.current();
            for (out, input) in outputs.iter_mut().zip(inputs.iter()) {
                buffer_copy_and_apply_gain(out, input, gain);
            }
            return;
        }

        let frames = outputs.first().map_or(0, |o| o.len());
        for f in 0..frames {
            let gain = self.smoother.next_value();
            for (out, input) in outputs.iter_mut().zip(inputs.iter()) {
                if let (Some(o), Some(i)) = (out.get_mut(f), input.get(f)) {
                    *o = *i * gain;
                }
            }
        }
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    fn sample_rate_changed(&mut self, sample_rate: f32) {
        self.smoother.set_sample_rate(sample_rate);
    }
}

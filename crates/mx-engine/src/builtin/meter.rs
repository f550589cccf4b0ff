//! Peak meter
//!
//! Audio passes through unchanged; each channel's peak for the cycle is
//! published in dB on a read-back control output.

use mx_core::{
    buffer_copy, buffer_peak, channel_count_supported, gain_to_db, split_audio, Cycle, Port, PortHints, MAX_CHANNELS,
};
use mx_plugin::ModuleBackend;

use super::audio_ports;

const FLOOR_DB: f32 = -70.0;

pub struct MeterModule {
    channels: usize,
}

impl MeterModule {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.clamp(1, MAX_CHANNELS),
        }
    }

    fn ports_for(channels: usize) -> Vec<Port> {
        let mut ports = audio_ports(channels, channels);
        for i in 0..channels {
            ports.push(Port::control_output(
                format!("Level {}", i + 1),
                PortHints::ranged(FLOOR_DB, 6.0, FLOOR_DB),
            ));
        }
        ports
    }
}

impl ModuleBackend for MeterModule {
    fn name(&self) -> &str {
        "Meter"
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
        *ports = Self::ports_for(n);
        self.channels = n;
        true
    }

    // Metering continues while bypassed; there is nothing to bypass.
    fn process(&mut self, ports: &mut [Port], cycle: &Cycle) {
        let channels = self.channels;
        let (audio, levels) = ports.split_at_mut((2 * channels).min(ports.len()));
        {
            let (inputs, mut outputs) = split_audio(audio, cycle.frames);
            for (out, input) in outputs.iter_mut().zip(inputs.iter()) {
                buffer_copy(out, input);
            }
        }
        for (c, level) in levels.iter_mut().enumerate() {
            let peak = audio
                .get(c)
                .and_then(|p| p.buffer())
                .map_or(0.0, |b| buffer_peak(&b[..cycle.frames.min(b.len())]));
            level.set_control_value(gain_to_db(peak).max(FLOOR_DB));
        }
    }

    fn set_bypass(&mut self, _bypass: bool) {}
}

//! Mono panner
//!
//! One input (or two, summed to mono) onto a left/right pair. The pan
//! control runs -1 (hard left) to 1 (hard right) with a linear law.

use mx_core::{split_audio, Cycle, Port, PortHints};
use mx_plugin::ModuleBackend;

use super::{audio_ports, carry_controls};
use crate::smoother::ParamSmoother;

pub const PAN_PORT: &str = "Pan";

pub struct MonoPanModule {
    inputs: usize,
    smoother: ParamSmoother,
    bypass: bool,
}

impl MonoPanModule {
    pub fn new(sample_rate: f32, smooth_time_ms: f32) -> Self {
        Self {
            inputs: 1,
            smoother: ParamSmoother::new(sample_rate, 0.5, smooth_time_ms),
            bypass: false,
        }
    }

    fn ports_for(inputs: usize) -> Vec<Port> {
        let mut ports = audio_ports(inputs, 2);
        ports.push(Port::control_input(PAN_PORT, PortHints::ranged(-1.0, 1.0, 0.0)));
        ports
    }
}

impl ModuleBackend for MonoPanModule {
    fn name(&self) -> &str {
        "Mono Pan"
    }

    fn create_ports(&mut self) -> Vec<Port> {
        Self::ports_for(self.inputs)
    }

    fn can_support_inputs(&self, n: usize) -> Option<usize> {
        matches!(n, 1 | 2).then_some(2)
    }

    fn configure_inputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool {
        if self.can_support_inputs(n).is_none() {
            return false;
        }
        let mut fresh = Self::ports_for(n);
        carry_controls(ports, &mut fresh);
        *ports = fresh;
        self.inputs = n;
        true
    }

    fn process(&mut self, ports: &mut [Port], cycle: &Cycle) {
        // 0 = left, 1 = right
        let position = ports
            .get(self.inputs + 2)
            .map_or(0.0, |p| p.control_value().clamp(-1.0, 1.0));
        let bypass = self.bypass;
        self.smoother.set_target((position + 1.0) * 0.5);

        let (inputs, mut outputs) = split_audio(ports, cycle.frames);
        let [left, right] = outputs.as_mut_slice() else {
            return;
        };
        let Some(first) = inputs.first() else {
            left.fill(0.0);
            right.fill(0.0);
            return;
        };
        let second = inputs.get(1);

        for (f, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let mono = first.get(f).copied().unwrap_or(0.0) + second.and_then(|s| s.get(f)).copied().unwrap_or(0.0);
            if bypass {
                *l = mono;
                *r = mono;
            } else {
                let g = self.smoother.next_value();
                *l = mono * (1.0 - g);
                *r = mono * g;
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

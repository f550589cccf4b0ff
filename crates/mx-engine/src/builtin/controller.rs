//! Controller module
//!
//! Drives one control input elsewhere in the chain through its single
//! control output. In GUI mode the output holds whatever the UI or OSC last
//! set. In CV mode an auxiliary audio input (backed by a server port) is
//! read once per cycle and scaled onto the target's range.

use mx_control::cv_to_control;
use mx_core::{Cycle, Port, PortHints, PortLayout};
use mx_plugin::ModuleBackend;
use serde::{Deserialize, Serialize};

pub const VALUE_PORT: &str = "Value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlMode {
    #[default]
    Gui = 0,
    Cv = 1,
}

impl ControlMode {
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Gui),
            1 => Some(Self::Cv),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Default)]
pub struct ControllerModule {
    mode: ControlMode,
    target_hints: PortHints,
    /// Port index of the CV input while in CV mode
    cv_port: Option<usize>,
}

impl ControllerModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn target_hints(&self) -> &PortHints {
        &self.target_hints
    }

    /// Adopt the range of the control input this controller now drives
    pub fn set_target(&mut self, ports: &mut [Port], hints: PortHints, value: f32) {
        self.target_hints = hints;
        if let Some(out) = ports.first_mut() {
            out.set_hints(hints);
            out.set_control_value(value);
        }
    }

    /// Append the CV input and switch to CV mode
    pub fn attach_cv_input(&mut self, ports: &mut Vec<Port>, name: String) {
        if self.cv_port.is_some() {
            return;
        }
        self.cv_port = Some(ports.len());
        ports.push(Port::audio_input(name));
        self.mode = ControlMode::Cv;
    }

    /// Remove the CV input and switch back to GUI mode
    pub fn detach_cv_input(&mut self, ports: &mut Vec<Port>) -> Option<Port> {
        let index = self.cv_port.take()?;
        self.mode = ControlMode::Gui;
        (index < ports.len()).then(|| ports.remove(index))
    }
}

impl ModuleBackend for ControllerModule {
    fn name(&self) -> &str {
        "Controller"
    }

    fn create_ports(&mut self) -> Vec<Port> {
        vec![Port::control_output(VALUE_PORT, PortHints::default())]
    }

    fn can_support_inputs(&self, _n: usize) -> Option<usize> {
        None
    }

    fn configure_inputs(&mut self, ports: &mut Vec<Port>, n: usize) -> bool {
        PortLayout::of(ports).audio_in.len() == n
    }

    fn process(&mut self, ports: &mut [Port], _cycle: &Cycle) {
        if self.mode != ControlMode::Cv {
            return;
        }
        let raw = self
            .cv_port
            .and_then(|i| ports.get(i))
            .and_then(|p| p.buffer())
            .and_then(|b| b.first().copied());
        if let (Some(raw), Some(out)) = (raw, ports.first_mut()) {
            out.set_control_value(cv_to_control(raw, &self.target_hints));
        }
    }

    fn set_bypass(&mut self, _bypass: bool) {}
}

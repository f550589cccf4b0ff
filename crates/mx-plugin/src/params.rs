//! Native parameter id ⇄ port index mapping
//!
//! Port order is assigned when the module is built and need not follow the
//! plugin's own enumeration order (VST3 and CLAP ids are sparse). Read-back
//! parameters are kept in their own list so `process` can copy them
//! plugin → port without looking anything up.

use std::collections::HashMap;

use crate::NativeParamId;

/// Input parameter bound to a control port
#[derive(Debug, Clone)]
pub struct ParamBinding {
    pub id: NativeParamId,
    pub port: usize,
    /// Value last sent to the plugin (NaN forces a resend)
    pub(crate) last: f32,
}

/// Bidirectional map between native parameter ids and port indices
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    inputs: Vec<ParamBinding>,
    read_back: Vec<(NativeParamId, usize)>,
    by_id: HashMap<NativeParamId, usize>,
    by_port: HashMap<usize, NativeParamId>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a host-written parameter to `port`
    pub fn insert_input(&mut self, id: NativeParamId, port: usize) {
        self.index(&id, port);
        self.inputs.push(ParamBinding {
            id,
            port,
            last: f32::NAN,
        });
    }

    /// Bind a plugin-written (read-back) parameter to `port`
    pub fn insert_read_back(&mut self, id: NativeParamId, port: usize) {
        self.index(&id, port);
        self.read_back.push((id, port));
    }

    fn index(&mut self, id: &NativeParamId, port: usize) {
        self.by_id.insert(id.clone(), port);
        self.by_port.insert(port, id.clone());
    }

    pub fn port_for(&self, id: &NativeParamId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn native_for(&self, port: usize) -> Option<&NativeParamId> {
        self.by_port.get(&port)
    }

    pub fn is_read_back(&self, id: &NativeParamId) -> bool {
        self.read_back.iter().any(|(r, _)| r == id)
    }

    pub fn inputs(&self) -> &[ParamBinding] {
        &self.inputs
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut [ParamBinding] {
        &mut self.inputs
    }

    pub fn read_back(&self) -> &[(NativeParamId, usize)] {
        &self.read_back
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Force every input to be resent on the next cycle
    pub fn invalidate(&mut self) {
        for binding in &mut self.inputs {
            binding.last = f32::NAN;
        }
    }
}

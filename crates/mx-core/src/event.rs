//! Event port buffers
//!
//! Events are short MIDI messages stamped with a frame offset inside the
//! current cycle. An `EventBuffer` never grows past the capacity it was
//! created with, so filling it from the real-time thread never allocates.

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Longest message carried inline (channel voice messages)
pub const MAX_EVENT_BYTES: usize = 3;

/// A timestamped short MIDI message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiEvent {
    /// Frame offset within the cycle
    pub frame: u32,
    data: [u8; MAX_EVENT_BYTES],
    len: u8,
}

impl MidiEvent {
    /// Build from raw bytes, `None` when longer than `MAX_EVENT_BYTES` or empty
    pub fn new(frame: u32, bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_EVENT_BYTES {
            return None;
        }
        let mut data = [0u8; MAX_EVENT_BYTES];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            frame,
            data,
            len: bytes.len() as u8,
        })
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.data[0]
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT BUFFER
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-capacity list of events for one cycle
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Vec<MidiEvent>,
    capacity: usize,
    overflowed: u32,
}

impl EventBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            overflowed: 0,
        }
    }

    /// Append an event; returns false (and counts an overflow) when full
    #[inline]
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.capacity {
            self.overflowed = self.overflowed.saturating_add(1);
            return false;
        }
        self.events.push(event);
        true
    }

    #[inline]
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Replace contents with `other`, truncated to this buffer's capacity
    pub fn copy_from(&mut self, other: &EventBuffer) {
        self.events.clear();
        let n = other.events.len().min(self.capacity);
        self.events.extend_from_slice(&other.events[..n]);
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped because the buffer was full
    pub fn overflowed(&self) -> u32 {
        self.overflowed
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::with_capacity(crate::DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bytes() {
        let ev = MidiEvent::new(12, &[0x90, 60, 100]).unwrap();
        assert_eq!(ev.bytes(), &[0x90, 60, 100]);
        assert_eq!(ev.status(), 0x90);
        assert!(MidiEvent::new(0, &[]).is_none());
        assert!(MidiEvent::new(0, &[1, 2, 3, 4]).is_none());
    }

    #[test]
    fn test_buffer_capacity_is_fixed() {
        let mut buf = EventBuffer::with_capacity(2);
        let ev = MidiEvent::new(0, &[0xB0, 7, 64]).unwrap();
        assert!(buf.push(ev));
        assert!(buf.push(ev));
        assert!(!buf.push(ev));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.overflowed(), 1);
    }

    #[test]
    fn test_copy_from_truncates() {
        let mut big = EventBuffer::with_capacity(4);
        for i in 0..4 {
            big.push(MidiEvent::new(i, &[0x80, 60, 0]).unwrap());
        }
        let mut small = EventBuffer::with_capacity(2);
        small.copy_from(&big);
        assert_eq!(small.len(), 2);
        assert_eq!(small.iter().last().unwrap().frame, 1);
    }
}

//! Module identities

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_MODULE_ID: AtomicU32 = AtomicU32::new(1);

/// Unique module identifier
///
/// Persisted as an 8-digit upper-case hex string so that project files can
/// cross-reference modules (controller `:module` keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Make sure ids allocated from now on are greater than `id`.
    ///
    /// Called when restoring a project that carries explicit ids.
    pub fn reserve_above(id: ModuleId) {
        NEXT_MODULE_ID.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }

    pub fn to_hex(self) -> String {
        format!("{:08X}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        u32::from_str_radix(s.trim(), 16).ok().map(Self)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl Serialize for ModuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ModuleId::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid module id: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ModuleId::next();
        let b = ModuleId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = ModuleId(0xA1);
        assert_eq!(id.to_hex(), "000000A1");
        assert_eq!(ModuleId::from_hex("000000A1"), Some(id));
        assert_eq!(ModuleId::from_hex("zz"), None);
    }

    #[test]
    fn test_reserve_above() {
        ModuleId::reserve_above(ModuleId(50_000));
        assert!(ModuleId::next().0 > 50_000);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&ModuleId(255)).unwrap();
        assert_eq!(json, "\"000000FF\"");
        let back: ModuleId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ModuleId(255));
    }
}

//! External ⇄ internal OSC path translation
//!
//! Each entry maps an external path (what a controller sends) to an
//! internal path (a port's OSC path). Lookups run both ways: inbound
//! messages translate external → internal, outbound notifications scan
//! internal → every external path bound to it.
//!
//! The table persists on its own, independent of the graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::ControlResult;

/// One persisted entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub external: String,
    pub internal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Translation>", into = "Vec<Translation>")]
pub struct TranslationTable {
    forward: BTreeMap<String, String>,
    reverse: HashMap<String, BTreeSet<String>>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `external` to `internal`, replacing any previous binding of
    /// `external`.
    pub fn add_translation(&mut self, external: &str, internal: &str) {
        if let Some(old) = self.forward.insert(external.to_string(), internal.to_string()) {
            self.unlink(&old, external);
        }
        self.reverse
            .entry(internal.to_string())
            .or_default()
            .insert(external.to_string());
        log::debug!("Translation {} -> {}", external, internal);
    }

    /// Remove `external`'s binding. Returns the internal path it pointed at.
    pub fn del_translation(&mut self, external: &str) -> Option<String> {
        let internal = self.forward.remove(external)?;
        self.unlink(&internal, external);
        Some(internal)
    }

    fn unlink(&mut self, internal: &str, external: &str) {
        if let Some(set) = self.reverse.get_mut(internal) {
            set.remove(external);
            if set.is_empty() {
                self.reverse.remove(internal);
            }
        }
    }

    pub fn lookup(&self, external: &str) -> Option<&str> {
        self.forward.get(external).map(String::as_str)
    }

    /// Every external path bound to `internal`, sorted
    pub fn connections(&self, internal: &str) -> impl Iterator<Item = &str> {
        self.reverse
            .get(internal)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn is_connected(&self, internal: &str) -> bool {
        self.reverse.contains_key(internal)
    }

    /// Re-point every binding of `old_internal` at `new_internal` (a port's
    /// path changed after a rename). Returns how many entries moved.
    pub fn rename_destination(&mut self, old_internal: &str, new_internal: &str) -> usize {
        let Some(externals) = self.reverse.remove(old_internal) else {
            return 0;
        };
        for external in &externals {
            self.forward.insert(external.clone(), new_internal.to_string());
        }
        let moved = externals.len();
        self.reverse
            .entry(new_internal.to_string())
            .or_default()
            .extend(externals);
        moved
    }

    /// Drop every binding that points at `internal`
    pub fn remove_destination(&mut self, internal: &str) -> usize {
        let Some(externals) = self.reverse.remove(internal) else {
            return 0;
        };
        for external in &externals {
            self.forward.remove(external);
        }
        externals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(e, i)| (e.as_str(), i.as_str()))
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> ControlResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let table: Self = serde_json::from_str(&content)?;
        log::info!("Loaded {} translations from {:?}", table.len(), path);
        Ok(table)
    }

    /// Save as a JSON file, creating parent directories
    pub fn save(&self, path: &Path) -> ControlResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        log::debug!("Saved {} translations to {:?}", self.len(), path);
        Ok(())
    }
}

impl From<Vec<Translation>> for TranslationTable {
    fn from(entries: Vec<Translation>) -> Self {
        let mut table = Self::new();
        for t in entries {
            table.add_translation(&t.external, &t.internal);
        }
        table
    }
}

impl From<TranslationTable> for Vec<Translation> {
    fn from(table: TranslationTable) -> Self {
        table
            .forward
            .into_iter()
            .map(|(external, internal)| Translation { external, internal })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_delete_leaves_others() {
        let mut table = TranslationTable::new();
        table.add_translation("/p", "/strip/A/Gain/Gain_(dB)");
        table.add_translation("/r", "/strip/B/Gain/Gain_(dB)");

        assert_eq!(table.del_translation("/p").as_deref(), Some("/strip/A/Gain/Gain_(dB)"));
        assert_eq!(table.lookup("/p"), None);
        assert_eq!(table.lookup("/r"), Some("/strip/B/Gain/Gain_(dB)"));
        assert!(!table.is_connected("/strip/A/Gain/Gain_(dB)"));
        assert_eq!(table.del_translation("/p"), None);
    }

    #[test]
    fn test_reverse_lookup() {
        let mut table = TranslationTable::new();
        table.add_translation("/fader/1", "/strip/A/Gain/Gain_(dB)");
        table.add_translation("/knob/7", "/strip/A/Gain/Gain_(dB)");
        table.add_translation("/knob/8", "/strip/B/Gain/Gain_(dB)");

        let conns: Vec<_> = table.connections("/strip/A/Gain/Gain_(dB)").collect();
        assert_eq!(conns, vec!["/fader/1", "/knob/7"]);
        assert_eq!(table.connections("/nowhere").count(), 0);
    }

    #[test]
    fn test_rebinding_external_moves_reverse_entry() {
        let mut table = TranslationTable::new();
        table.add_translation("/fader/1", "/a");
        table.add_translation("/fader/1", "/b");
        assert_eq!(table.len(), 1);
        assert!(!table.is_connected("/a"));
        assert_eq!(table.connections("/b").collect::<Vec<_>>(), vec!["/fader/1"]);
    }

    #[test]
    fn test_rename_destination() {
        let mut table = TranslationTable::new();
        table.add_translation("/fader/1", "/strip/Old/Gain/Gain_(dB)");
        table.add_translation("/fader/2", "/strip/Old/Gain/Gain_(dB)");

        assert_eq!(table.rename_destination("/strip/Old/Gain/Gain_(dB)", "/strip/New/Gain/Gain_(dB)"), 2);
        assert_eq!(table.lookup("/fader/2"), Some("/strip/New/Gain/Gain_(dB)"));
        assert!(!table.is_connected("/strip/Old/Gain/Gain_(dB)"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osc").join("translations.json");
        let mut table = TranslationTable::new();
        table.add_translation("/x", "/strip/A/Pan/Pan");
        table.save(&path).unwrap();

        let loaded = TranslationTable::load(&path).unwrap();
        assert_eq!(loaded.lookup("/x"), Some("/strip/A/Pan/Pan"));
        assert_eq!(loaded.connections("/strip/A/Pan/Pan").count(), 1);
    }
}

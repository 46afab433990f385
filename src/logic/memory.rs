//! Guardian Memory - user judgement about process names
//!
//! Three disjoint sets: trusted (suppress verdicts, credit the score),
//! dangerous (penalize the score), ignored (skip detection entirely).
//! A name lives in at most one set; marking it moves it. Mutations persist
//! immediately - they are rare, user-driven, and must survive a crash.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::GuardianResult;
use super::storage::{self, LoadOutcome};

/// Read-only view of the remembered names, sorted for stable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryListing {
    pub trusted: Vec<String>,
    pub dangerous: Vec<String>,
    pub ignored: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    trusted: BTreeSet<String>,
    #[serde(default)]
    dangerous: BTreeSet<String>,
    #[serde(default)]
    ignored: BTreeSet<String>,
}

pub struct GuardianMemory {
    path: Option<PathBuf>,
    trusted: BTreeSet<String>,
    dangerous: BTreeSet<String>,
    ignored: BTreeSet<String>,
    load_warning: Option<String>,
}

impl GuardianMemory {
    /// Load from disk, or start empty.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut memory = Self {
            path: Some(path.into()),
            trusted: BTreeSet::new(),
            dangerous: BTreeSet::new(),
            ignored: BTreeSet::new(),
            load_warning: None,
        };
        memory.load();
        memory
    }

    /// Unpersisted instance for embedding in tests.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            trusted: BTreeSet::new(),
            dangerous: BTreeSet::new(),
            ignored: BTreeSet::new(),
            load_warning: None,
        }
    }

    /// Reason the last load fell back to empty state, if it did.
    pub fn take_load_warning(&mut self) -> Option<String> {
        self.load_warning.take()
    }

    pub fn load(&mut self) -> Option<String> {
        let path = self.path.clone()?;
        match storage::load_json::<MemoryFile>(&path) {
            LoadOutcome::Loaded(file) => {
                self.trusted = file.trusted;
                self.dangerous = file.dangerous;
                self.ignored = file.ignored;
                None
            }
            LoadOutcome::Missing => None,
            LoadOutcome::Quarantined(reason) => {
                log::warn!("Guardian memory corrupt ({}); starting empty", reason);
                self.load_warning = Some(reason.clone());
                Some(reason)
            }
        }
    }

    pub fn save(&self) -> GuardianResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = MemoryFile {
            trusted: self.trusted.clone(),
            dangerous: self.dangerous.clone(),
            ignored: self.ignored.clone(),
        };
        storage::atomic_write(path, &storage::to_payload(&file)?)
    }

    // ------------------------------------------------------------------
    // Mutations (each moves the name into exactly one set)
    // ------------------------------------------------------------------

    pub fn mark_trusted(&mut self, name: &str) {
        self.dangerous.remove(name);
        self.ignored.remove(name);
        self.trusted.insert(name.to_string());
        self.persist();
    }

    pub fn mark_dangerous(&mut self, name: &str) {
        self.trusted.remove(name);
        self.ignored.remove(name);
        self.dangerous.insert(name.to_string());
        self.persist();
    }

    pub fn mark_ignored(&mut self, name: &str) {
        self.trusted.remove(name);
        self.dangerous.remove(name);
        self.ignored.insert(name.to_string());
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            log::error!("Failed to save guardian memory: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    pub fn is_trusted(&self, name: &str) -> bool {
        self.trusted.contains(name)
    }

    pub fn is_dangerous(&self, name: &str) -> bool {
        self.dangerous.contains(name)
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.trusted.len(), self.dangerous.len(), self.ignored.len())
    }

    /// Sorted copies of the three sets, for the read surface.
    pub fn listing(&self) -> MemoryListing {
        MemoryListing {
            trusted: self.trusted.iter().cloned().collect(),
            dangerous: self.dangerous.iter().cloned().collect(),
            ignored: self.ignored.iter().cloned().collect(),
        }
    }

    pub fn clear_all(&mut self) -> GuardianResult<()> {
        self.trusted.clear();
        self.dangerous.clear();
        self.ignored.clear();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_stay_disjoint() {
        let mut mem = GuardianMemory::in_memory();
        mem.mark_trusted("svc");
        assert!(mem.is_trusted("svc"));

        mem.mark_dangerous("svc");
        assert!(!mem.is_trusted("svc"));
        assert!(mem.is_dangerous("svc"));

        mem.mark_ignored("svc");
        assert!(!mem.is_dangerous("svc"));
        assert!(mem.is_ignored("svc"));

        assert_eq!(mem.counts(), (0, 0, 1));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        {
            let mut mem = GuardianMemory::new(&path);
            mem.mark_trusted("good");
            mem.mark_dangerous("bad");
            mem.mark_ignored("meh");
        }

        let mem = GuardianMemory::new(&path);
        assert!(mem.is_trusted("good"));
        assert!(mem.is_dangerous("bad"));
        assert!(mem.is_ignored("meh"));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, b"\"whoops").unwrap();

        let mem = GuardianMemory::new(&path);
        assert_eq!(mem.counts(), (0, 0, 0));
        assert!(dir.path().join("memory.json.bad").exists());
    }

    #[test]
    fn test_listing_is_sorted() {
        let mut mem = GuardianMemory::in_memory();
        mem.mark_trusted("zsh");
        mem.mark_trusted("bash");
        mem.mark_dangerous("cryptominer");

        let listing = mem.listing();
        assert_eq!(listing.trusted, vec!["bash".to_string(), "zsh".to_string()]);
        assert_eq!(listing.dangerous, vec!["cryptominer".to_string()]);
        assert!(listing.ignored.is_empty());
    }

    #[test]
    fn test_clear_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let mut mem = GuardianMemory::new(&path);
        mem.mark_trusted("a");
        mem.mark_dangerous("b");
        mem.clear_all().unwrap();
        assert_eq!(mem.counts(), (0, 0, 0));

        let reloaded = GuardianMemory::new(&path);
        assert_eq!(reloaded.counts(), (0, 0, 0));
    }
}

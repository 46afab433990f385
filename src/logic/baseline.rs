//! Baseline Store - long-term behavioral averages
//!
//! Keeps one EMA profile per process *name* (PIDs recycle, behaviors
//! persist per program) plus the global first-run timestamp that anchors
//! the learning phase. Persisted as a single JSON object mapping name ->
//! profile with a `_metadata` block for the anchor.
//!
//! # Failure Strategy
//! A corrupt file is quarantined and the store starts empty; the learning
//! phase then simply restarts from now.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants;
use super::error::GuardianResult;
use super::storage::{self, LoadOutcome};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Long-term profile for one process name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub avg_cpu: f64,
    pub avg_ram: f64,
    pub avg_children: f64,
    #[serde(default)]
    pub avg_net_sent: f64,
    #[serde(default)]
    pub avg_net_received: f64,
    pub samples: u64,
    pub first_seen: i64,
    pub last_seen: i64,
    #[serde(default)]
    pub trusted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BaselineMetadata {
    system_first_run: i64,
}

/// On-disk layout: profiles keyed by name, `_metadata` alongside them.
#[derive(Debug, Serialize, Deserialize)]
struct BaselineFile {
    #[serde(rename = "_metadata")]
    metadata: BaselineMetadata,
    #[serde(flatten)]
    entries: HashMap<String, Baseline>,
}

/// Tuning knobs, overridable in tests.
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    pub alpha: f64,
    pub learning_secs: i64,
    pub retention_days: i64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            alpha: constants::LONG_TERM_ALPHA,
            learning_secs: constants::LEARNING_PHASE_SECS,
            retention_days: constants::BASELINE_RETENTION_DAYS,
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

pub struct BaselineStore {
    path: PathBuf,
    config: BaselineConfig,
    entries: HashMap<String, Baseline>,
    system_first_run: i64,
    load_warning: Option<String>,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, BaselineConfig::default())
    }

    /// Load the store from disk, or start empty. A quarantined file is
    /// surfaced through `take_load_warning` so the caller can audit it.
    pub fn with_config(path: impl Into<PathBuf>, config: BaselineConfig) -> Self {
        let path = path.into();
        let mut store = Self {
            path,
            config,
            entries: HashMap::new(),
            system_first_run: Utc::now().timestamp(),
            load_warning: None,
        };
        store.load();
        store
    }

    /// Reason the last load fell back to empty state, if it did.
    pub fn take_load_warning(&mut self) -> Option<String> {
        self.load_warning.take()
    }

    /// Reload from disk. Returns the quarantine reason when the file was
    /// corrupt and the store fell back to empty state.
    pub fn load(&mut self) -> Option<String> {
        match storage::load_json::<BaselineFile>(&self.path) {
            LoadOutcome::Loaded(file) => {
                self.entries = file.entries;
                self.system_first_run = file.metadata.system_first_run;
                self.compact(Utc::now());
                log::info!(
                    "Loaded {} baselines (first run anchor: {})",
                    self.entries.len(),
                    self.system_first_run
                );
                None
            }
            LoadOutcome::Missing => {
                self.entries.clear();
                self.system_first_run = Utc::now().timestamp();
                None
            }
            LoadOutcome::Quarantined(reason) => {
                log::warn!("Baseline store corrupt ({}); starting empty", reason);
                self.entries.clear();
                self.system_first_run = Utc::now().timestamp();
                self.load_warning = Some(reason.clone());
                Some(reason)
            }
        }
    }

    /// Insert or EMA-update the profile for `name`.
    pub fn update(
        &mut self,
        name: &str,
        cpu: f64,
        ram: f64,
        children: f64,
        net_sent: f64,
        net_recv: f64,
    ) {
        let now = Utc::now().timestamp();
        let alpha = self.config.alpha;
        match self.entries.get_mut(name) {
            Some(b) if b.samples > 0 => {
                b.avg_cpu = ema(alpha, cpu, b.avg_cpu);
                b.avg_ram = ema(alpha, ram, b.avg_ram);
                b.avg_children = ema(alpha, children, b.avg_children);
                b.avg_net_sent = ema(alpha, net_sent, b.avg_net_sent);
                b.avg_net_received = ema(alpha, net_recv, b.avg_net_received);
                b.samples += 1;
                b.last_seen = now;
            }
            Some(b) => {
                // Skeleton created by mark_trusted before any sample arrived.
                b.avg_cpu = cpu;
                b.avg_ram = ram;
                b.avg_children = children;
                b.avg_net_sent = net_sent;
                b.avg_net_received = net_recv;
                b.samples = 1;
                b.last_seen = now;
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    Baseline {
                        avg_cpu: cpu,
                        avg_ram: ram,
                        avg_children: children,
                        avg_net_sent: net_sent,
                        avg_net_received: net_recv,
                        samples: 1,
                        first_seen: now,
                        last_seen: now,
                        trusted: false,
                    },
                );
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Baseline> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flag a name as trusted. Creates a skeleton profile when the name has
    /// never been observed so the flag survives until first contact.
    pub fn mark_trusted(&mut self, name: &str) {
        let now = Utc::now().timestamp();
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| Baseline {
                avg_cpu: 0.0,
                avg_ram: 0.0,
                avg_children: 0.0,
                avg_net_sent: 0.0,
                avg_net_received: 0.0,
                samples: 0,
                first_seen: now,
                last_seen: now,
                trusted: true,
            })
            .trusted = true;
    }

    pub fn mark_untrusted(&mut self, name: &str) {
        if let Some(b) = self.entries.get_mut(name) {
            b.trusted = false;
        }
    }

    // ------------------------------------------------------------------
    // Learning phase
    // ------------------------------------------------------------------

    /// Progress of the learning phase, 0..=100.
    pub fn learning_progress(&self) -> u8 {
        self.learning_progress_at(Utc::now())
    }

    pub fn learning_progress_at(&self, now: DateTime<Utc>) -> u8 {
        let elapsed = (now.timestamp() - self.system_first_run).max(0);
        let progress = elapsed * 100 / self.config.learning_secs.max(1);
        progress.min(100) as u8
    }

    /// Move the learning anchor. Tests use this to simulate a warm system;
    /// reset uses it to restart the phase.
    pub fn anchor_learning_at(&mut self, ts: i64) {
        self.system_first_run = ts;
    }

    pub fn system_first_run(&self) -> i64 {
        self.system_first_run
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn to_file(&self) -> BaselineFile {
        BaselineFile {
            metadata: BaselineMetadata {
                system_first_run: self.system_first_run,
            },
            entries: self.entries.clone(),
        }
    }

    /// Serialize the current state for the persistence writer.
    pub fn persist_payload(&self) -> GuardianResult<Vec<u8>> {
        storage::to_payload(&self.to_file())
    }

    /// Synchronous save, used on shutdown and by the reset protocol.
    pub fn save(&self) -> GuardianResult<()> {
        storage::atomic_write(&self.path, &self.persist_payload()?)
    }

    /// Wipe all profiles and restart the learning phase from now.
    pub fn clear_all(&mut self) -> GuardianResult<()> {
        self.entries.clear();
        self.system_first_run = Utc::now().timestamp();
        self.save()
    }

    /// Evict profiles not seen within the retention window.
    pub fn compact(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = (now - Duration::days(self.config.retention_days)).timestamp();
        let before = self.entries.len();
        self.entries.retain(|_, b| b.last_seen >= cutoff);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::info!("Compacted baseline store: evicted {} stale profiles", evicted);
        }
        evicted
    }
}

#[inline]
fn ema(alpha: f64, sample: f64, avg: f64) -> f64 {
    alpha * sample + (1.0 - alpha) * avg
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store_in(dir: &tempfile::TempDir) -> BaselineStore {
        BaselineStore::new(dir.path().join("baselines.json"))
    }

    #[test]
    fn test_first_sample_seeds_averages() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update("svc", 4.0, 120.0, 1.0, 10.0, 20.0);

        let b = store.get("svc").unwrap();
        assert_eq!(b.samples, 1);
        assert_eq!(b.avg_cpu, 4.0);
        assert_eq!(b.avg_ram, 120.0);
        assert_eq!(b.avg_net_received, 20.0);
        assert!(b.last_seen >= b.first_seen);
    }

    #[test]
    fn test_ema_moves_toward_new_level() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update("svc", 10.0, 100.0, 0.0, 0.0, 0.0);
        store.update("svc", 20.0, 100.0, 0.0, 0.0, 0.0);

        let b = store.get("svc").unwrap();
        assert_eq!(b.samples, 2);
        // 0.1 * 20 + 0.9 * 10
        assert!((b.avg_cpu - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_convergence_under_constant_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update("svc", 0.0, 0.0, 0.0, 0.0, 0.0);
        for _ in 0..200 {
            store.update("svc", 50.0, 0.0, 0.0, 0.0, 0.0);
        }
        let b = store.get("svc").unwrap();
        assert!((b.avg_cpu - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_trusted_skeleton_before_first_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.mark_trusted("installer");

        let b = store.get("installer").unwrap();
        assert!(b.trusted);
        assert_eq!(b.samples, 0);

        // First real sample seeds the averages but keeps the flag.
        store.update("installer", 2.0, 80.0, 0.0, 0.0, 0.0);
        let b = store.get("installer").unwrap();
        assert!(b.trusted);
        assert_eq!(b.samples, 1);
        assert_eq!(b.avg_ram, 80.0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baselines.json");
        let mut store = BaselineStore::new(&path);
        store.update("svc", 3.0, 64.0, 2.0, 1.0, 1.0);
        store.update("svc", 4.0, 66.0, 2.0, 1.0, 1.0);
        store.mark_trusted("svc");
        let anchor = store.system_first_run();
        store.save().unwrap();

        let reloaded = BaselineStore::new(&path);
        assert_eq!(reloaded.system_first_run(), anchor);
        let a = store.get("svc").unwrap();
        let b = reloaded.get("svc").unwrap();
        assert_eq!(a.samples, b.samples);
        assert!(b.trusted);
        assert!((a.avg_cpu - b.avg_cpu).abs() < 1e-6);
        assert!((a.avg_ram - b.avg_ram).abs() < 1e-6);
    }

    #[test]
    fn test_clear_all_restarts_learning() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update("svc", 3.0, 64.0, 0.0, 0.0, 0.0);
        store.anchor_learning_at(Utc::now().timestamp() - 10_000);
        assert_eq!(store.learning_progress(), 100);

        store.clear_all().unwrap();
        assert!(store.is_empty());
        assert!(store.learning_progress() < 100);
    }

    #[test]
    fn test_learning_progress_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let now = Utc::now();

        store.anchor_learning_at(now.timestamp());
        assert_eq!(store.learning_progress_at(now), 0);

        store.anchor_learning_at(now.timestamp() - 150);
        assert_eq!(store.learning_progress_at(now), 50);

        store.anchor_learning_at(now.timestamp() - 600);
        assert_eq!(store.learning_progress_at(now), 100);

        // A clock step backwards never underflows.
        store.anchor_learning_at(now.timestamp() + 500);
        assert_eq!(store.learning_progress_at(now), 0);
    }

    #[test]
    fn test_compaction_evicts_stale_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update("fresh", 1.0, 10.0, 0.0, 0.0, 0.0);
        store.update("stale", 1.0, 10.0, 0.0, 0.0, 0.0);
        if let Some(b) = store.entries.get_mut("stale") {
            b.last_seen = (Utc::now() - Duration::days(45)).timestamp();
        }

        let evicted = store.compact(Utc::now());
        assert_eq!(evicted, 1);
        assert!(store.get("fresh").is_some());
        assert!(store.get("stale").is_none());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baselines.json");
        std::fs::write(&path, b"][").unwrap();

        let store = BaselineStore::new(&path);
        assert!(store.is_empty());
        assert!(dir.path().join("baselines.json.bad").exists());

        // Next save recreates a clean file.
        store.save().unwrap();
        assert!(path.exists());
    }

    proptest! {
        /// |avg - v| <= (1 - alpha)^k * |initial - v| under a constant stream.
        #[test]
        fn prop_convergence_bound(initial in 0.0..500.0f64, v in 0.0..500.0f64, k in 1usize..60) {
            let dir = tempfile::tempdir().unwrap();
            let mut store = BaselineStore::new(dir.path().join("b.json"));
            store.update("p", initial, 0.0, 0.0, 0.0, 0.0);
            for _ in 0..k {
                store.update("p", v, 0.0, 0.0, 0.0, 0.0);
            }
            let avg = store.get("p").unwrap().avg_cpu;
            let bound = (1.0 - constants::LONG_TERM_ALPHA).powi(k as i32) * (initial - v).abs();
            prop_assert!((avg - v).abs() <= bound + 1e-9);
        }

        /// If every new sample exceeds the current average, the average
        /// strictly increases.
        #[test]
        fn prop_monotone_under_step_up(start in 0.0..100.0f64, step in 1.0..400.0f64, k in 1usize..40) {
            let dir = tempfile::tempdir().unwrap();
            let mut store = BaselineStore::new(dir.path().join("b.json"));
            store.update("p", start, 0.0, 0.0, 0.0, 0.0);
            let target = start + step;
            let mut prev = store.get("p").unwrap().avg_cpu;
            for _ in 0..k {
                store.update("p", target, 0.0, 0.0, 0.0, 0.0);
                let cur = store.get("p").unwrap().avg_cpu;
                prop_assert!(cur > prev);
                prop_assert!(cur <= target);
                prev = cur;
            }
        }

        /// EMAs never go negative for non-negative inputs.
        #[test]
        fn prop_averages_non_negative(samples in proptest::collection::vec(0.0..1000.0f64, 1..50)) {
            let dir = tempfile::tempdir().unwrap();
            let mut store = BaselineStore::new(dir.path().join("b.json"));
            for s in &samples {
                store.update("p", *s, *s, *s, *s, *s);
            }
            let b = store.get("p").unwrap();
            prop_assert!(b.avg_cpu >= 0.0 && b.avg_ram >= 0.0 && b.avg_children >= 0.0);
            prop_assert_eq!(b.samples, samples.len() as u64);
        }
    }
}

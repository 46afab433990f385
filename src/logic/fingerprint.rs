//! Fingerprint Manager - short-window live view per PID
//!
//! Each running process gets a fast-adapting EMA profile plus bounded
//! rolling windows used for trend detection (memory growth, child churn,
//! sustained CPU). Fingerprints die with their PID; the manager also keeps
//! the per-name registry of distinct PIDs that backs restart-loop
//! detection, which is cumulative and survives cleanup on purpose.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::constants;
use super::anomaly::types::AnomalyKind;

// ============================================================================
// FINGERPRINT
// ============================================================================

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub pid: u32,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,

    // Live metrics, smoothed for spike tolerance
    pub cpu_ema: f64,
    pub ram_ema: f64,
    pub net_sent_ema: f64,
    pub net_recv_ema: f64,

    // Tendency tracking (bounded rings, oldest dropped first)
    pub cpu_samples: VecDeque<f64>,
    pub ram_samples: VecDeque<f64>,
    pub child_counts: VecDeque<u32>,

    // Anomaly kinds already reported once for this PID
    emitted: HashSet<AnomalyKind>,
}

impl Fingerprint {
    fn new(pid: u32, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            pid,
            name: name.to_string(),
            start_time: now,
            last_update: now,
            cpu_ema: 0.0,
            ram_ema: 0.0,
            net_sent_ema: 0.0,
            net_recv_ema: 0.0,
            cpu_samples: VecDeque::with_capacity(constants::CPU_RING_CAPACITY),
            ram_samples: VecDeque::with_capacity(constants::RAM_RING_CAPACITY),
            child_counts: VecDeque::with_capacity(constants::CHILD_RING_CAPACITY),
            emitted: HashSet::new(),
        }
    }

    fn update(
        &mut self,
        alpha: f64,
        now: DateTime<Utc>,
        cpu: f64,
        ram: f64,
        net_sent: f64,
        net_recv: f64,
        child_count: u32,
        first: bool,
    ) {
        if first {
            // First observation seeds the averages instead of smoothing
            // up from zero, so young processes compare honestly.
            self.cpu_ema = cpu;
            self.ram_ema = ram;
            self.net_sent_ema = net_sent;
            self.net_recv_ema = net_recv;
        } else {
            self.cpu_ema = alpha * cpu + (1.0 - alpha) * self.cpu_ema;
            self.ram_ema = alpha * ram + (1.0 - alpha) * self.ram_ema;
            self.net_sent_ema = alpha * net_sent + (1.0 - alpha) * self.net_sent_ema;
            self.net_recv_ema = alpha * net_recv + (1.0 - alpha) * self.net_recv_ema;
        }

        push_bounded(&mut self.cpu_samples, cpu, constants::CPU_RING_CAPACITY);
        push_bounded(&mut self.ram_samples, ram, constants::RAM_RING_CAPACITY);
        push_bounded(&mut self.child_counts, child_count, constants::CHILD_RING_CAPACITY);

        self.last_update = now.max(self.last_update);
    }

    /// Linear RAM growth across the window: (last - first) / count.
    /// Zero until enough samples exist to call it a trend.
    pub fn growth_rate(&self) -> f64 {
        if self.ram_samples.len() < constants::GROWTH_MIN_SAMPLES {
            return 0.0;
        }
        let first = *self.ram_samples.front().unwrap_or(&0.0);
        let last = *self.ram_samples.back().unwrap_or(&0.0);
        (last - first) / self.ram_samples.len() as f64
    }

    pub fn lifespan_secs(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds().max(0)
    }

    /// True when the RAM window holds a strict monotone climb.
    pub fn ram_strictly_increasing(&self) -> bool {
        if self.ram_samples.len() < constants::GROWTH_MIN_SAMPLES {
            return false;
        }
        self.ram_samples
            .iter()
            .zip(self.ram_samples.iter().skip(1))
            .all(|(a, b)| a < b)
    }

    pub fn has_emitted(&self, kind: AnomalyKind) -> bool {
        self.emitted.contains(&kind)
    }

    pub fn mark_emitted(&mut self, kind: AnomalyKind) {
        self.emitted.insert(kind);
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, value: T, cap: usize) {
    if ring.len() == cap {
        ring.pop_front();
    }
    ring.push_back(value);
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct FingerprintManager {
    alpha: f64,
    fingerprints: HashMap<u32, Fingerprint>,
    /// Distinct PIDs ever observed per name. Never pruned: the PIDs of a
    /// crash loop are already dead when the loop becomes visible.
    name_pids: HashMap<String, HashSet<u32>>,
}

impl Default for FingerprintManager {
    fn default() -> Self {
        Self::new(constants::SHORT_TERM_ALPHA)
    }
}

impl FingerprintManager {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            fingerprints: HashMap::new(),
            name_pids: HashMap::new(),
        }
    }

    /// Create or update the fingerprint for `pid` and return it.
    #[allow(clippy::too_many_arguments)]
    pub fn track(
        &mut self,
        pid: u32,
        name: &str,
        cpu: f64,
        ram: f64,
        net_sent: f64,
        net_recv: f64,
        child_count: u32,
    ) -> &Fingerprint {
        self.track_at(Utc::now(), pid, name, cpu, ram, net_sent, net_recv, child_count)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn track_at(
        &mut self,
        now: DateTime<Utc>,
        pid: u32,
        name: &str,
        cpu: f64,
        ram: f64,
        net_sent: f64,
        net_recv: f64,
        child_count: u32,
    ) -> &Fingerprint {
        self.name_pids
            .entry(name.to_string())
            .or_default()
            .insert(pid);

        let alpha = self.alpha;
        let mut first = false;
        let fp = self.fingerprints.entry(pid).or_insert_with(|| {
            first = true;
            Fingerprint::new(pid, name, now)
        });
        fp.update(alpha, now, cpu, ram, net_sent, net_recv, child_count, first);
        fp
    }

    pub fn get(&self, pid: u32) -> Option<&Fingerprint> {
        self.fingerprints.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut Fingerprint> {
        self.fingerprints.get_mut(&pid)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// RAM growth rate for a tracked PID; zero when unknown or young.
    pub fn growth_rate(&self, pid: u32) -> f64 {
        self.get(pid).map_or(0.0, Fingerprint::growth_rate)
    }

    /// Seconds since the fingerprint for `pid` was first seen.
    pub fn lifespan_secs(&self, pid: u32) -> i64 {
        self.get(pid).map_or(0, Fingerprint::lifespan_secs)
    }

    /// Distinct PIDs observed for `name` since engine start.
    pub fn restart_count(&self, name: &str) -> u32 {
        self.name_pids.get(name).map_or(0, |s| s.len() as u32)
    }

    /// Drop fingerprints whose PID left the active set. The per-name PID
    /// registry is intentionally untouched.
    pub fn cleanup(&mut self, active_pids: &HashSet<u32>) {
        self.fingerprints.retain(|pid, _| active_pids.contains(pid));
    }
}

//! Behavioral Chain Manager - sequences of suspicion per PID
//!
//! A single anomaly is noise; certain sequences are intent. Each PID keeps
//! a five-minute window of anomaly events, and the window shape maps to a
//! suspicion multiplier the scorer applies on top of the weighted sum.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::constants;
use super::anomaly::types::{Anomaly, AnomalyKind};

// ============================================================================
// CHAIN
// ============================================================================

#[derive(Debug, Clone)]
pub struct BehavioralChain {
    pub pid: u32,
    pub name: String,
    events: Vec<(DateTime<Utc>, AnomalyKind)>,
    window_secs: i64,
    pub suspicion_multiplier: f64,
}

impl BehavioralChain {
    fn new(pid: u32, name: &str, window_secs: i64) -> Self {
        Self {
            pid,
            name: name.to_string(),
            events: Vec::new(),
            window_secs,
            suspicion_multiplier: 1.0,
        }
    }

    fn add_event(&mut self, now: DateTime<Utc>, kind: AnomalyKind) {
        self.events.push((now, kind));
        self.prune(now);
        self.suspicion_multiplier = self.evaluate_intent();
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.window_secs);
        self.events.retain(|(ts, _)| *ts > cutoff);
        // A noisy process can out-produce the time window; cap the memory
        if self.events.len() > constants::CHAIN_MAX_EVENTS {
            let excess = self.events.len() - constants::CHAIN_MAX_EVENTS;
            self.events.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, kind: AnomalyKind) -> bool {
        self.events.iter().any(|(_, k)| *k == kind)
    }

    /// Map the current window shape to a multiplier.
    fn evaluate_intent(&self) -> f64 {
        let has = |k: AnomalyKind| self.events.iter().any(|(_, e)| *e == k);
        let count = |k: AnomalyKind| self.events.iter().filter(|(_, e)| *e == k).count();

        // Exfiltration shape: spawn helpers, burn CPU, push data out
        if has(AnomalyKind::ChildProliferation)
            && (has(AnomalyKind::CpuSpike) || has(AnomalyKind::SustainedCpu))
            && has(AnomalyKind::NetworkBurst)
        {
            return 2.5;
        }

        // Resource hijack shape: memory pressure ending in restarts
        if (has(AnomalyKind::MemoryLeak) || has(AnomalyKind::MemoryDeviation))
            && has(AnomalyKind::RestartLoop)
        {
            return 2.0;
        }

        // Rapid proliferation
        if count(AnomalyKind::ChildProliferation) > 2 {
            return 1.8;
        }

        // Variety alone is mildly suspicious
        let distinct: HashSet<AnomalyKind> = self.events.iter().map(|(_, k)| *k).collect();
        (1.0 + 0.1 * distinct.len() as f64).min(1.5)
    }
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct ChainManager {
    chains: HashMap<u32, BehavioralChain>,
    window_secs: i64,
}

impl Default for ChainManager {
    fn default() -> Self {
        Self::new(constants::CHAIN_WINDOW_SECS)
    }
}

impl ChainManager {
    pub fn new(window_secs: i64) -> Self {
        Self {
            chains: HashMap::new(),
            window_secs,
        }
    }

    /// Record this tick's anomalies for `pid` and return the multiplier.
    /// An anomaly-free tick leaves the window untouched and reports 1.0.
    pub fn update(&mut self, pid: u32, name: &str, anomalies: &[Anomaly]) -> f64 {
        self.update_at(Utc::now(), pid, name, anomalies)
    }

    pub fn update_at(
        &mut self,
        now: DateTime<Utc>,
        pid: u32,
        name: &str,
        anomalies: &[Anomaly],
    ) -> f64 {
        if anomalies.is_empty() {
            return 1.0;
        }

        let window_secs = self.window_secs;
        let chain = self
            .chains
            .entry(pid)
            .or_insert_with(|| BehavioralChain::new(pid, name, window_secs));
        for anomaly in anomalies {
            chain.add_event(now, anomaly.kind);
        }
        chain.suspicion_multiplier
    }

    pub fn get(&self, pid: u32) -> Option<&BehavioralChain> {
        self.chains.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn cleanup(&mut self, active_pids: &HashSet<u32>) {
        self.chains.retain(|pid, _| active_pids.contains(pid));
    }

    pub fn clear_all(&mut self) {
        self.chains.clear();
    }
}

//! Anomaly Detector - fingerprint vs baseline
//!
//! A pure transform: given the live fingerprint, the long-term baseline and
//! the raw sample, report every deviation with severity and comparative
//! evidence. The detector holds no mutable state; one-shot bookkeeping
//! lives on the fingerprint and restart counting on the fingerprint
//! manager, so the same inputs always produce the same output.
//!
//! Detection stays silent while a baseline has fewer than five samples -
//! a young profile is not evidence of anything.

pub mod types;

use once_cell::sync::Lazy;

use crate::constants;
use super::baseline::Baseline;
use super::fingerprint::Fingerprint;
use super::types::PersistenceEntry;

pub use self::types::{Anomaly, AnomalyKind};

// ============================================================================
// SUSPICIOUS PATH PATTERNS
// ============================================================================

#[cfg(windows)]
const SUSPICIOUS_PATH_PATTERNS: &[&str] = &[
    "\\windows\\temp\\",
    "\\appdata\\local\\temp\\",
    "\\appdata\\roaming\\temp\\",
    "\\downloads\\",
    "\\programdata\\",
];

#[cfg(not(windows))]
const SUSPICIOUS_PATH_PATTERNS: &[&str] = &["/tmp/", "/var/tmp/", "/dev/shm/"];

static DEFAULT_PATH_PATTERNS: Lazy<Vec<String>> = Lazy::new(|| {
    SUSPICIOUS_PATH_PATTERNS
        .iter()
        .map(|s| s.to_string())
        .collect()
});

// ============================================================================
// CONFIG
// ============================================================================

/// Detection thresholds, overridable in tests.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub min_baseline_samples: u64,
    pub cpu_factor: f64,
    pub cpu_floor: f64,
    pub cpu_sustained_factor: f64,
    pub ram_factor: f64,
    pub ram_min_delta_mb: f64,
    pub child_factor: f64,
    pub child_margin: f64,
    pub restart_threshold: u32,
    pub net_factor: f64,
    pub net_floor_kbps: f64,
    pub suspicious_paths: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_baseline_samples: constants::MIN_BASELINE_SAMPLES,
            cpu_factor: constants::CPU_SPIKE_FACTOR,
            cpu_floor: constants::CPU_SPIKE_FLOOR,
            cpu_sustained_factor: constants::CPU_SUSTAINED_FACTOR,
            ram_factor: constants::RAM_DEVIATION_FACTOR,
            ram_min_delta_mb: constants::RAM_DEVIATION_MIN_MB,
            child_factor: constants::CHILD_PROLIFERATION_FACTOR,
            child_margin: constants::CHILD_PROLIFERATION_MARGIN,
            restart_threshold: constants::RESTART_LOOP_THRESHOLD,
            net_factor: constants::NETWORK_BURST_FACTOR,
            net_floor_kbps: constants::NETWORK_BURST_FLOOR_KBPS,
            suspicious_paths: DEFAULT_PATH_PATTERNS.clone(),
        }
    }
}

// ============================================================================
// DETECTION CONTEXT
// ============================================================================

/// Everything the detector may look at for one process in one tick.
pub struct DetectionContext<'a> {
    pub pid: u32,
    pub name: &'a str,
    pub exe_path: &'a str,
    pub cpu: f64,
    pub ram: f64,
    pub child_count: u32,
    pub net_sent: f64,
    pub net_recv: f64,
    pub fingerprint: &'a Fingerprint,
    pub baseline: Option<&'a Baseline>,
    /// Distinct PIDs observed for this name since engine start.
    pub restart_count: u32,
    pub persistence: &'a [PersistenceEntry],
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct AnomalyDetector {
    config: DetectorConfig,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Analyze one process. Returns an empty list during the cold period
    /// (no baseline, or fewer than the minimum samples).
    pub fn analyze(&self, ctx: &DetectionContext) -> Vec<Anomaly> {
        let baseline = match ctx.baseline {
            Some(b) if b.samples >= self.config.min_baseline_samples => b,
            _ => return Vec::new(),
        };

        let mut anomalies = Vec::new();
        let samples = baseline.samples;

        self.check_cpu(ctx, baseline, samples, &mut anomalies);
        self.check_ram(ctx, baseline, samples, &mut anomalies);
        self.check_restart_loop(ctx, &mut anomalies);
        self.check_children(ctx, baseline, samples, &mut anomalies);
        self.check_network(ctx, baseline, samples, &mut anomalies);
        self.check_suspicious_path(ctx, &mut anomalies);
        self.check_startup_persistence(ctx, &mut anomalies);

        anomalies
    }

    // ------------------------------------------------------------------
    // CPU: spike vs sustained load
    // ------------------------------------------------------------------

    fn check_cpu(&self, ctx: &DetectionContext, b: &Baseline, samples: u64, out: &mut Vec<Anomaly>) {
        let avg_cpu = b.avg_cpu.max(0.5);
        if ctx.cpu <= avg_cpu * self.config.cpu_factor || ctx.cpu <= self.config.cpu_floor {
            return;
        }

        let sustained_bar = avg_cpu * self.config.cpu_sustained_factor;
        let ring = &ctx.fingerprint.cpu_samples;
        let sustained = ring.len() >= 5 && ring.iter().rev().take(5).all(|c| *c > sustained_bar);

        let confidence = (0.5 + samples as f64 / 100.0).min(0.95);

        if sustained {
            out.push(Anomaly {
                kind: AnomalyKind::SustainedCpu,
                severity: 3,
                message: format!(
                    "Sustained high CPU usage ({:.1}%) detected over the last window.",
                    ctx.cpu
                ),
                actual: format!("{:.1}%", ctx.cpu),
                baseline: format!("{:.1}%", avg_cpu),
                confidence,
                samples,
            });
        } else {
            out.push(Anomaly {
                kind: AnomalyKind::CpuSpike,
                severity: 1,
                message: format!("CPU spike detected ({:.1}%).", ctx.cpu),
                actual: format!("{:.1}%", ctx.cpu),
                baseline: format!("{:.1}%", avg_cpu),
                confidence: confidence * 0.8,
                samples,
            });
        }
    }

    // ------------------------------------------------------------------
    // RAM: leak vs deviation
    // ------------------------------------------------------------------

    fn check_ram(&self, ctx: &DetectionContext, b: &Baseline, samples: u64, out: &mut Vec<Anomaly>) {
        let avg_ram = b.avg_ram.max(10.0);
        if ctx.ram <= avg_ram * self.config.ram_factor
            || ctx.ram - avg_ram <= self.config.ram_min_delta_mb
        {
            return;
        }

        let confidence = (0.6 + samples as f64 / 100.0).min(0.98);

        if ctx.fingerprint.ram_strictly_increasing() {
            out.push(Anomaly {
                kind: AnomalyKind::MemoryLeak,
                severity: 3,
                message: format!(
                    "Potential memory leak: RAM has climbed steadily to {:.0} MB (~{:.1} MB/sample).",
                    ctx.ram,
                    ctx.fingerprint.growth_rate()
                ),
                actual: format!("{:.0} MB", ctx.ram),
                baseline: format!("{:.1} MB", avg_ram),
                confidence,
                samples,
            });
        } else {
            out.push(Anomaly {
                kind: AnomalyKind::MemoryDeviation,
                severity: 2,
                message: format!(
                    "Significant RAM deviation ({:.0} MB) from baseline ({:.1} MB).",
                    ctx.ram, avg_ram
                ),
                actual: format!("{:.0} MB", ctx.ram),
                baseline: format!("{:.1} MB", avg_ram),
                confidence: confidence * 0.9,
                samples,
            });
        }
    }

    // ------------------------------------------------------------------
    // Restart loops (distinct PIDs per name)
    // ------------------------------------------------------------------

    fn check_restart_loop(&self, ctx: &DetectionContext, out: &mut Vec<Anomaly>) {
        if ctx.restart_count < self.config.restart_threshold {
            return;
        }
        out.push(Anomaly {
            kind: AnomalyKind::RestartLoop,
            severity: 5,
            message: format!(
                "Process instability: {} has spawned {} distinct PIDs.",
                ctx.name, ctx.restart_count
            ),
            actual: format!("{} starts", ctx.restart_count),
            baseline: "1 start".to_string(),
            confidence: 0.9,
            samples: ctx.restart_count as u64,
        });
    }

    // ------------------------------------------------------------------
    // Child proliferation
    // ------------------------------------------------------------------

    fn check_children(
        &self,
        ctx: &DetectionContext,
        b: &Baseline,
        samples: u64,
        out: &mut Vec<Anomaly>,
    ) {
        let avg_children = b.avg_children.max(1.0);
        let current = ctx.child_count as f64;
        if current <= avg_children * self.config.child_factor
            || current <= avg_children + self.config.child_margin
        {
            return;
        }
        out.push(Anomaly {
            kind: AnomalyKind::ChildProliferation,
            severity: 3,
            message: format!(
                "Sudden explosion of child processes: {} (normal: ~{:.1}).",
                ctx.child_count, avg_children
            ),
            actual: ctx.child_count.to_string(),
            baseline: format!("~{:.1}", avg_children),
            confidence: 0.9,
            samples,
        });
    }

    // ------------------------------------------------------------------
    // Network bursts (dormant unless the producer reports throughput)
    // ------------------------------------------------------------------

    fn check_network(
        &self,
        ctx: &DetectionContext,
        b: &Baseline,
        samples: u64,
        out: &mut Vec<Anomaly>,
    ) {
        let current = ctx.net_sent + ctx.net_recv;
        if current <= 0.0 {
            return;
        }
        let avg_net = (b.avg_net_sent + b.avg_net_received).max(1.0);
        if current <= avg_net * self.config.net_factor || current <= self.config.net_floor_kbps {
            return;
        }
        out.push(Anomaly {
            kind: AnomalyKind::NetworkBurst,
            severity: 3,
            message: format!(
                "Network burst: {:.0} kbps against a typical {:.1} kbps.",
                current, avg_net
            ),
            actual: format!("{:.0} kbps", current),
            baseline: format!("{:.1} kbps", avg_net),
            confidence: 0.85,
            samples,
        });
    }

    // ------------------------------------------------------------------
    // One-shot signals: path + startup persistence
    // ------------------------------------------------------------------

    fn check_suspicious_path(&self, ctx: &DetectionContext, out: &mut Vec<Anomaly>) {
        if ctx.exe_path.is_empty() || ctx.fingerprint.has_emitted(AnomalyKind::SuspiciousPath) {
            return;
        }
        let path = ctx.exe_path.to_lowercase();
        let matched = self
            .config
            .suspicious_paths
            .iter()
            .find(|pattern| path.contains(pattern.as_str()));
        if let Some(pattern) = matched {
            out.push(Anomaly {
                kind: AnomalyKind::SuspiciousPath,
                severity: 3,
                message: format!("Executable runs from a suspicious location: {}", ctx.exe_path),
                actual: ctx.exe_path.to_string(),
                baseline: format!("outside {}", pattern),
                confidence: 0.8,
                samples: 1,
            });
        }
    }

    fn check_startup_persistence(&self, ctx: &DetectionContext, out: &mut Vec<Anomaly>) {
        if ctx.exe_path.is_empty()
            || ctx.persistence.is_empty()
            || ctx.fingerprint.has_emitted(AnomalyKind::StartupPersistence)
        {
            return;
        }
        let path = ctx.exe_path.to_lowercase();
        let registered = ctx
            .persistence
            .iter()
            .any(|entry| entry.command.to_lowercase().contains(&path));
        if registered {
            out.push(Anomaly {
                kind: AnomalyKind::StartupPersistence,
                severity: 4,
                message: format!("{} registered itself to run at startup.", ctx.name),
                actual: "startup entry present".to_string(),
                baseline: "no startup entry".to_string(),
                confidence: 0.9,
                samples: 1,
            });
        }
    }
}

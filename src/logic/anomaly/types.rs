//! Anomaly types
//!
//! Data structures only - detection logic lives in the parent module.

use serde::{Deserialize, Serialize};

// ============================================================================
// ANOMALY KINDS
// ============================================================================

/// The fixed set of behavioral deviations the detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    CpuSpike,
    SustainedCpu,
    MemoryDeviation,
    MemoryLeak,
    ChildProliferation,
    RestartLoop,
    NetworkBurst,
    SuspiciousPath,
    StartupPersistence,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::CpuSpike => "CPU_SPIKE",
            AnomalyKind::SustainedCpu => "SUSTAINED_CPU",
            AnomalyKind::MemoryDeviation => "MEMORY_DEVIATION",
            AnomalyKind::MemoryLeak => "MEMORY_LEAK",
            AnomalyKind::ChildProliferation => "CHILD_PROLIFERATION",
            AnomalyKind::RestartLoop => "RESTART_LOOP",
            AnomalyKind::NetworkBurst => "NETWORK_BURST",
            AnomalyKind::SuspiciousPath => "SUSPICIOUS_PATH",
            AnomalyKind::StartupPersistence => "STARTUP_PERSISTENCE",
        }
    }

    /// Human-readable label used in recommendation text.
    pub fn label(&self) -> &'static str {
        match self {
            AnomalyKind::CpuSpike => "CPU spike",
            AnomalyKind::SustainedCpu => "sustained CPU",
            AnomalyKind::MemoryDeviation => "memory deviation",
            AnomalyKind::MemoryLeak => "memory leak",
            AnomalyKind::ChildProliferation => "child proliferation",
            AnomalyKind::RestartLoop => "restart loop",
            AnomalyKind::NetworkBurst => "network burst",
            AnomalyKind::SuspiciousPath => "suspicious path",
            AnomalyKind::StartupPersistence => "startup persistence",
        }
    }

    /// Risk weight used by the scorer. Chain and scoring semantics exist for
    /// exactly these variants; new kinds must extend both.
    pub fn weight(&self) -> f64 {
        match self {
            AnomalyKind::CpuSpike => 2.0,
            AnomalyKind::SustainedCpu => 4.0,
            AnomalyKind::MemoryDeviation => 2.0,
            AnomalyKind::MemoryLeak => 4.0,
            AnomalyKind::ChildProliferation => 3.0,
            AnomalyKind::RestartLoop => 6.0,
            AnomalyKind::NetworkBurst => 3.0,
            AnomalyKind::SuspiciousPath => 5.0,
            AnomalyKind::StartupPersistence => 5.0,
        }
    }

    /// Kinds reported at most once per PID lifetime.
    pub fn is_one_shot(&self) -> bool {
        matches!(
            self,
            AnomalyKind::SuspiciousPath | AnomalyKind::StartupPersistence
        )
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ANOMALY REPORT
// ============================================================================

/// One detected deviation with its comparative evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    /// 1 (noteworthy) .. 5 (severe)
    pub severity: u8,
    pub message: String,
    /// Observed value, rendered for display
    pub actual: String,
    /// Expected value from the baseline, rendered for display
    pub baseline: String,
    /// 0.0 .. 1.0
    pub confidence: f64,
    /// Baseline sample count backing the confidence
    pub samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&AnomalyKind::SustainedCpu).unwrap();
        assert_eq!(json, "\"SUSTAINED_CPU\"");
        let back: AnomalyKind = serde_json::from_str("\"MEMORY_LEAK\"").unwrap();
        assert_eq!(back, AnomalyKind::MemoryLeak);
    }

    #[test]
    fn test_one_shot_kinds() {
        assert!(AnomalyKind::SuspiciousPath.is_one_shot());
        assert!(AnomalyKind::StartupPersistence.is_one_shot());
        assert!(!AnomalyKind::CpuSpike.is_one_shot());
        assert!(!AnomalyKind::RestartLoop.is_one_shot());
    }

    #[test]
    fn test_weights_match_severity_ordering() {
        assert!(AnomalyKind::RestartLoop.weight() > AnomalyKind::CpuSpike.weight());
        assert!(AnomalyKind::SustainedCpu.weight() > AnomalyKind::CpuSpike.weight());
        assert!(AnomalyKind::MemoryLeak.weight() > AnomalyKind::MemoryDeviation.weight());
    }
}

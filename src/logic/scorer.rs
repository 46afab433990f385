//! Risk Scorer - anomalies to a single number
//!
//! Weighted sum of the tick's anomalies, inflated by the behavioral chain
//! multiplier, then adjusted for user judgement: trusted names get a large
//! credit, known-dangerous names a penalty. The result is clamped at zero.
//!
//! The scorer also applies the significance filter: an anomaly set that is
//! neither heavy (score) nor sharp (severity) is discarded before verdict
//! generation.

use crate::constants;
use super::anomaly::types::Anomaly;
use super::memory::GuardianMemory;

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub score: f64,
    /// The anomalies worth reporting; empty when the set is insignificant.
    pub significant: Vec<Anomaly>,
}

impl ScoreOutcome {
    pub fn is_significant(&self) -> bool {
        !self.significant.is_empty()
    }
}

// ============================================================================
// SCORER
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub score_threshold: f64,
    pub severity_threshold: u8,
    pub trusted_credit: f64,
    pub dangerous_penalty: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            score_threshold: constants::SCORE_THRESHOLD,
            severity_threshold: constants::SEVERITY_THRESHOLD,
            trusted_credit: constants::TRUSTED_SCORE_CREDIT,
            dangerous_penalty: constants::DANGEROUS_SCORE_PENALTY,
        }
    }
}

pub struct RiskScorer {
    config: ScorerConfig,
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

impl RiskScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Score one process for this tick.
    pub fn score(
        &self,
        memory: &GuardianMemory,
        name: &str,
        anomalies: Vec<Anomaly>,
        chain_multiplier: f64,
    ) -> ScoreOutcome {
        if anomalies.is_empty() {
            return ScoreOutcome {
                score: 0.0,
                significant: Vec::new(),
            };
        }

        let weighted: f64 = anomalies.iter().map(|a| a.kind.weight()).sum();
        let mut score = weighted * chain_multiplier;

        if memory.is_trusted(name) {
            score -= self.config.trusted_credit;
        } else if memory.is_dangerous(name) {
            score += self.config.dangerous_penalty;
        }
        score = score.max(0.0);

        let escalate = score >= self.config.score_threshold
            || anomalies
                .iter()
                .any(|a| a.severity >= self.config.severity_threshold);

        ScoreOutcome {
            score,
            significant: if escalate { anomalies } else { Vec::new() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::anomaly::types::AnomalyKind;
    use proptest::prelude::*;

    fn memory() -> GuardianMemory {
        GuardianMemory::in_memory()
    }

    fn anomaly(kind: AnomalyKind, severity: u8) -> Anomaly {
        Anomaly {
            kind,
            severity,
            message: String::new(),
            actual: String::new(),
            baseline: String::new(),
            confidence: 0.9,
            samples: 10,
        }
    }

    #[test]
    fn test_empty_is_zero() {
        let scorer = RiskScorer::default();
        let outcome = scorer.score(&memory(), "svc", vec![], 2.5);
        assert_eq!(outcome.score, 0.0);
        assert!(!outcome.is_significant());
    }

    #[test]
    fn test_weighted_sum_times_multiplier() {
        let scorer = RiskScorer::default();
        let anomalies = vec![
            anomaly(AnomalyKind::SustainedCpu, 3),
            anomaly(AnomalyKind::ChildProliferation, 3),
        ];
        // (4 + 3) * 2.0
        let outcome = scorer.score(&memory(), "svc", anomalies, 2.0);
        assert!((outcome.score - 14.0).abs() < 1e-9);
        assert!(outcome.is_significant());
    }

    #[test]
    fn test_low_grade_anomaly_filtered() {
        let scorer = RiskScorer::default();
        // One spike: weight 2, severity 1 -> neither heavy nor sharp
        let outcome = scorer.score(&memory(), "svc", vec![anomaly(AnomalyKind::CpuSpike, 1)], 1.1);
        assert!(outcome.score < 5.0);
        assert!(!outcome.is_significant());
    }

    #[test]
    fn test_severity_alone_escalates() {
        let scorer = RiskScorer::default();
        let mut mem = memory();
        mem.mark_trusted("svc");
        // Trusted credit drives the score to zero, but severity still escalates
        let outcome = scorer.score(&mem, "svc", vec![anomaly(AnomalyKind::RestartLoop, 5)], 1.0);
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.is_significant());
    }

    #[test]
    fn test_dangerous_penalty_applies() {
        let scorer = RiskScorer::default();
        let mut mem = memory();
        mem.mark_dangerous("evil");
        let outcome = scorer.score(&mem, "evil", vec![anomaly(AnomalyKind::CpuSpike, 1)], 1.0);
        // 2 * 1.0 + 10
        assert!((outcome.score - 12.0).abs() < 1e-9);
        assert!(outcome.is_significant());
    }

    proptest! {
        /// Score is never negative, whatever the modifiers do.
        #[test]
        fn prop_score_non_negative(
            kinds in proptest::collection::vec(0usize..9, 1..10),
            multiplier in 1.0..2.5f64,
            trusted in proptest::bool::ANY,
        ) {
            const ALL: [AnomalyKind; 9] = [
                AnomalyKind::CpuSpike,
                AnomalyKind::SustainedCpu,
                AnomalyKind::MemoryDeviation,
                AnomalyKind::MemoryLeak,
                AnomalyKind::ChildProliferation,
                AnomalyKind::RestartLoop,
                AnomalyKind::NetworkBurst,
                AnomalyKind::SuspiciousPath,
                AnomalyKind::StartupPersistence,
            ];
            let mut mem = memory();
            if trusted {
                mem.mark_trusted("p");
            }
            let anomalies: Vec<Anomaly> = kinds.iter().map(|i| anomaly(ALL[*i], 1)).collect();
            let outcome = RiskScorer::default().score(&mem, "p", anomalies, multiplier);
            prop_assert!(outcome.score >= 0.0);
        }
    }
}

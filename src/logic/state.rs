//! Global State Engine - host posture
//!
//! Aggregates the current per-PID risk scores into one stance for the
//! whole host, with the UI hints (color, intensity) the external surface
//! renders.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// POSTURE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostPosture {
    Calm,
    Watchful,
    Alert,
    Defensive,
    Critical,
}

impl HostPosture {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostPosture::Calm => "CALM",
            HostPosture::Watchful => "WATCHFUL",
            HostPosture::Alert => "ALERT",
            HostPosture::Defensive => "DEFENSIVE",
            HostPosture::Critical => "CRITICAL",
        }
    }

    pub fn status_color(&self) -> &'static str {
        match self {
            HostPosture::Calm => "healthy",
            HostPosture::Watchful | HostPosture::Alert | HostPosture::Defensive => "warning",
            HostPosture::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HostPosture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// UI-facing view of the posture, extended by the pipeline with the
/// learning-phase fields before publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostureInfo {
    pub state: HostPosture,
    pub status_color: String,
    /// 0..=100, scaled from the worst per-PID score
    pub intensity: u8,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct GlobalStateEngine {
    current: HostPosture,
    max_score: f64,
    suspicious_count: usize,
    /// A per-PID score at or above this counts as a suspicious process.
    suspicious_floor: f64,
}

impl Default for GlobalStateEngine {
    fn default() -> Self {
        Self {
            current: HostPosture::Calm,
            max_score: 0.0,
            suspicious_count: 0,
            suspicious_floor: crate::constants::SCORE_THRESHOLD,
        }
    }
}

impl GlobalStateEngine {
    /// Re-evaluate the posture from this tick's score set.
    pub fn update(&mut self, scores: &HashMap<u32, f64>) -> HostPosture {
        if scores.is_empty() {
            self.current = HostPosture::Calm;
            self.max_score = 0.0;
            self.suspicious_count = 0;
            return self.current;
        }

        self.max_score = scores.values().cloned().fold(0.0, f64::max);
        self.suspicious_count = scores
            .values()
            .filter(|s| **s >= self.suspicious_floor)
            .count();

        self.current = if self.max_score >= 25.0 || self.suspicious_count >= 5 {
            HostPosture::Critical
        } else if self.max_score >= 15.0 || self.suspicious_count >= 3 {
            HostPosture::Defensive
        } else if self.max_score >= 10.0 || self.suspicious_count >= 1 {
            HostPosture::Alert
        } else if self.max_score >= 5.0 {
            HostPosture::Watchful
        } else {
            HostPosture::Calm
        };
        self.current
    }

    pub fn current(&self) -> HostPosture {
        self.current
    }

    pub fn max_score(&self) -> f64 {
        self.max_score
    }

    pub fn suspicious_count(&self) -> usize {
        self.suspicious_count
    }

    pub fn posture_info(&self) -> PostureInfo {
        PostureInfo {
            state: self.current,
            status_color: self.current.status_color().to_string(),
            intensity: (self.max_score * 5.0).min(100.0).max(0.0) as u8,
        }
    }

    pub fn reset(&mut self) {
        self.current = HostPosture::Calm;
        self.max_score = 0.0;
        self.suspicious_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scores(values: &[f64]) -> HashMap<u32, f64> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u32 + 1, *v))
            .collect()
    }

    #[test]
    fn test_empty_scores_are_calm() {
        let mut engine = GlobalStateEngine::default();
        engine.update(&scores(&[30.0]));
        assert_eq!(engine.update(&HashMap::new()), HostPosture::Calm);
        assert_eq!(engine.max_score(), 0.0);
    }

    #[test]
    fn test_threshold_ladder() {
        let mut engine = GlobalStateEngine::default();
        assert_eq!(engine.update(&scores(&[1.0, 2.0])), HostPosture::Calm);
        // One score in [5, 10) counts as suspicious -> Alert, not Watchful
        assert_eq!(engine.update(&scores(&[6.0])), HostPosture::Alert);
        assert_eq!(engine.update(&scores(&[10.0])), HostPosture::Alert);
        assert_eq!(engine.update(&scores(&[15.0])), HostPosture::Defensive);
        assert_eq!(engine.update(&scores(&[25.0])), HostPosture::Critical);
    }

    #[test]
    fn test_suspicious_count_escalation() {
        let mut engine = GlobalStateEngine::default();
        assert_eq!(
            engine.update(&scores(&[6.0, 6.0, 6.0])),
            HostPosture::Defensive
        );
        assert_eq!(
            engine.update(&scores(&[6.0, 6.0, 6.0, 6.0, 6.0])),
            HostPosture::Critical
        );
    }

    #[test]
    fn test_intensity_scaling() {
        let mut engine = GlobalStateEngine::default();
        engine.update(&scores(&[4.0]));
        assert_eq!(engine.posture_info().intensity, 20);
        engine.update(&scores(&[50.0]));
        assert_eq!(engine.posture_info().intensity, 100);
    }

    #[test]
    fn test_status_colors() {
        assert_eq!(HostPosture::Calm.status_color(), "healthy");
        assert_eq!(HostPosture::Watchful.status_color(), "warning");
        assert_eq!(HostPosture::Defensive.status_color(), "warning");
        assert_eq!(HostPosture::Critical.status_color(), "critical");
    }

    proptest! {
        /// Raising any single score never lowers the posture.
        #[test]
        fn prop_posture_monotone_in_scores(
            base in proptest::collection::vec(0.0..30.0f64, 1..8),
            idx in 0usize..8,
            bump in 0.0..30.0f64,
        ) {
            let idx = idx % base.len();
            let mut engine = GlobalStateEngine::default();
            let before = engine.update(&scores(&base));

            let mut raised = base.clone();
            raised[idx] += bump;
            let after = engine.update(&scores(&raised));
            prop_assert!(after >= before);
        }
    }
}

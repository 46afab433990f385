//! Intervention Engine - how loudly to react
//!
//! Maps a risk score to one of five escalation levels and, from Recommend
//! upward, synthesizes a one-line course of action keyed on the worst
//! anomaly in the set.

use serde::{Deserialize, Serialize};

use crate::constants;
use super::anomaly::types::{Anomaly, AnomalyKind};

// ============================================================================
// LEVELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionLevel {
    /// Silent tracking
    Observe,
    /// Log only
    Inform,
    /// Surface an insight
    Warn,
    /// Insight plus a suggested action
    Recommend,
    /// Proactive confirmation dialog
    RequestConfirmation,
}

impl InterventionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionLevel::Observe => "OBSERVE",
            InterventionLevel::Inform => "INFORM",
            InterventionLevel::Warn => "WARN",
            InterventionLevel::Recommend => "RECOMMEND",
            InterventionLevel::RequestConfirmation => "REQUEST_CONFIRMATION",
        }
    }
}

impl std::fmt::Display for InterventionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct InterventionConfig {
    pub inform_at: f64,
    pub warn_at: f64,
    pub recommend_at: f64,
    pub confirm_at: f64,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            inform_at: constants::INFORM_THRESHOLD,
            warn_at: constants::WARN_THRESHOLD,
            recommend_at: constants::RECOMMEND_THRESHOLD,
            confirm_at: constants::CONFIRM_THRESHOLD,
        }
    }
}

pub struct InterventionEngine {
    config: InterventionConfig,
}

impl Default for InterventionEngine {
    fn default() -> Self {
        Self::new(InterventionConfig::default())
    }
}

impl InterventionEngine {
    pub fn new(config: InterventionConfig) -> Self {
        Self { config }
    }

    pub fn level_for(&self, score: f64) -> InterventionLevel {
        if score >= self.config.confirm_at {
            InterventionLevel::RequestConfirmation
        } else if score >= self.config.recommend_at {
            InterventionLevel::Recommend
        } else if score >= self.config.warn_at {
            InterventionLevel::Warn
        } else if score >= self.config.inform_at {
            InterventionLevel::Inform
        } else {
            InterventionLevel::Observe
        }
    }

    /// Suggested action for levels at or above Recommend; `None` below.
    /// The template keys on the highest-severity anomaly present.
    pub fn recommendation(
        &self,
        process_name: &str,
        anomalies: &[Anomaly],
        level: InterventionLevel,
    ) -> Option<String> {
        if level < InterventionLevel::Recommend {
            return None;
        }
        let primary = anomalies.iter().max_by_key(|a| a.severity)?;
        let reason = format!(
            "due to {} ({} vs typical {})",
            primary.kind.label(),
            primary.actual,
            primary.baseline
        );

        Some(match primary.kind {
            AnomalyKind::SustainedCpu => format!(
                "Recommend closing {} {} to restore system responsiveness.",
                process_name, reason
            ),
            AnomalyKind::MemoryLeak => format!(
                "Recommend restarting {} {} to reclaim leaked memory.",
                process_name, reason
            ),
            AnomalyKind::RestartLoop => format!(
                "Recommend terminating {} {} as it is unstable.",
                process_name, reason
            ),
            _ => format!("Recommend reviewing {} {}.", process_name, reason),
        })
    }
}

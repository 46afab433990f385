//! Verdicts - externalized suspicion reports
//!
//! A verdict packages one process's worst evidence for the tick with its
//! score, the chosen intervention level, and a rendered reason line the
//! user-facing surface can show verbatim.

use serde::{Deserialize, Serialize};

use super::anomaly::types::{Anomaly, AnomalyKind};
use super::intervention::InterventionLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub process: String,
    pub pid: u32,
    pub score: f64,
    pub level: InterventionLevel,
    pub anomaly_type: AnomalyKind,
    pub actual: String,
    pub baseline: String,
    pub confidence: f64,
    /// Rendered comparative-evidence line
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl Verdict {
    /// Build from the primary (highest-severity) anomaly of a significant set.
    pub fn from_primary(
        process: &str,
        pid: u32,
        score: f64,
        level: InterventionLevel,
        primary: &Anomaly,
        recommendation: Option<String>,
    ) -> Self {
        Self {
            process: process.to_string(),
            pid,
            score,
            level,
            anomaly_type: primary.kind,
            actual: primary.actual.clone(),
            baseline: primary.baseline.clone(),
            confidence: primary.confidence,
            reason: render_reason(process, primary),
            recommendation,
        }
    }
}

/// One-line report with comparative reasoning and confidence context.
pub fn render_reason(process: &str, anomaly: &Anomaly) -> String {
    format!(
        "[Guardian] {}: {} (Actual: {} vs Typical: {}) | Confidence: {}% (based on {} samples)",
        process,
        anomaly.message,
        anomaly.actual,
        anomaly.baseline,
        (anomaly.confidence * 100.0).round() as u32,
        anomaly.samples
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anomaly() -> Anomaly {
        Anomaly {
            kind: AnomalyKind::SustainedCpu,
            severity: 3,
            message: "Sustained high CPU usage (42.0%) detected over the last window.".to_string(),
            actual: "42.0%".to_string(),
            baseline: "5.0%".to_string(),
            confidence: 0.87,
            samples: 37,
        }
    }

    #[test]
    fn test_reason_line_format() {
        let line = render_reason("svc", &anomaly());
        assert!(line.starts_with("[Guardian] svc:"));
        assert!(line.contains("Actual: 42.0% vs Typical: 5.0%"));
        assert!(line.contains("Confidence: 87%"));
        assert!(line.contains("37 samples"));
    }

    #[test]
    fn test_verdict_carries_primary_evidence() {
        let v = Verdict::from_primary(
            "svc",
            1234,
            13.5,
            InterventionLevel::RequestConfirmation,
            &anomaly(),
            Some("Recommend closing svc.".to_string()),
        );
        assert_eq!(v.anomaly_type, AnomalyKind::SustainedCpu);
        assert_eq!(v.pid, 1234);
        assert!(v.recommendation.is_some());

        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["level"], "REQUEST_CONFIRMATION");
        assert_eq!(json["anomaly_type"], "SUSTAINED_CPU");
    }

    #[test]
    fn test_recommendation_omitted_when_absent() {
        let v = Verdict::from_primary("svc", 1, 6.0, InterventionLevel::Warn, &anomaly(), None);
        let json = serde_json::to_string(&v).unwrap();
        assert!(!json.contains("recommendation"));
    }
}

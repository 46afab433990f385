//! Guardian - the owned engine bundle
//!
//! One value holding every component the pipeline mutates, guarded by a
//! single coarse lock at the call site. External callers reach the bundle
//! only through the control-surface commands and the reset protocol; the
//! pipeline drives everything else tick by tick.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::constants;
use super::anomaly::{AnomalyDetector, DetectorConfig};
use super::audit::{AuditEvent, AuditKind, AuditLog};
use super::baseline::{BaselineConfig, BaselineStore};
use super::chain::ChainManager;
use super::error::{GuardianError, GuardianResult};
use super::fingerprint::FingerprintManager;
use super::intervention::{InterventionConfig, InterventionEngine};
use super::memory::GuardianMemory;
use super::scorer::{RiskScorer, ScorerConfig};
use super::snapshot::{GuardianSnapshot, GuardianStateInfo};
use super::state::GlobalStateEngine;
use super::types::TelemetryMessage;
use super::verdict::Verdict;

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct GuardianConfig {
    pub data_dir: PathBuf,
    pub baseline: BaselineConfig,
    pub detector: DetectorConfig,
    pub scorer: ScorerConfig,
    pub intervention: InterventionConfig,
    pub short_term_alpha: f64,
    pub chain_window_secs: i64,
    pub audit_max_events: usize,
    pub audit_flush_every: usize,
    pub baseline_save_every_ticks: u64,
    pub prompt_release_ticks: u32,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self::with_data_dir(constants::default_data_dir())
    }
}

impl GuardianConfig {
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            baseline: BaselineConfig::default(),
            detector: DetectorConfig::default(),
            scorer: ScorerConfig::default(),
            intervention: InterventionConfig::default(),
            short_term_alpha: constants::SHORT_TERM_ALPHA,
            chain_window_secs: constants::CHAIN_WINDOW_SECS,
            audit_max_events: constants::AUDIT_MAX_EVENTS,
            audit_flush_every: constants::AUDIT_FLUSH_EVERY,
            baseline_save_every_ticks: constants::BASELINE_SAVE_EVERY_TICKS,
            prompt_release_ticks: constants::PROMPT_RELEASE_TICKS,
        }
    }

    pub fn baselines_path(&self) -> PathBuf {
        self.data_dir.join(constants::BASELINES_FILE)
    }

    pub fn memory_path(&self) -> PathBuf {
        self.data_dir.join(constants::MEMORY_FILE)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join(constants::AUDIT_FILE)
    }
}

// ============================================================================
// CONTROL SURFACE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptDecision {
    Approve,
    Deny,
}

impl PromptDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptDecision::Approve => "approve",
            PromptDecision::Deny => "deny",
        }
    }
}

/// Commands external callers may issue against the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GuardianCommand {
    Reset,
    MarkTrusted { name: String },
    MarkDangerous { name: String },
    MarkIgnored { name: String },
    AcknowledgePrompt { command_id: String, decision: PromptDecision },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

impl CommandResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Outcome of a command; `snapshot` is set when the command changed the
/// published state (reset) and must be republished by the caller.
pub struct CommandOutcome {
    pub response: CommandResponse,
    pub snapshot: Option<GuardianSnapshot>,
}

// ============================================================================
// CONFIRMATION PROMPTS
// ============================================================================

/// Request handed to the user-facing collaborator for explicit approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub command_id: String,
    pub command_name: String,
    pub details: String,
}

/// Bookkeeping entry preventing duplicate prompts per process name.
#[derive(Debug, Clone, Serialize)]
pub struct ActivePrompt {
    pub command_id: String,
    pub process: String,
    pub details: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    /// Consecutive ticks the name scored below Recommend
    #[serde(skip)]
    pub calm_ticks: u32,
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Point-in-time engine counters, read under the state lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianStatistics {
    pub posture: super::state::HostPosture,
    pub max_score: f64,
    pub suspicious_count: usize,
    pub learning_progress: u8,
    pub is_learning: bool,
    pub tick_count: u64,
    pub samples_count: u64,
    pub dropped_messages: u64,
    pub baseline_count: usize,
    pub fingerprint_count: usize,
    pub chain_count: usize,
    pub audit_events: usize,
    pub active_prompts: usize,
    pub trusted_names: usize,
    pub dangerous_names: usize,
    pub ignored_names: usize,
}

// ============================================================================
// GUARDIAN
// ============================================================================

pub struct Guardian {
    pub(crate) config: GuardianConfig,
    pub(crate) baselines: BaselineStore,
    pub(crate) fingerprints: FingerprintManager,
    pub(crate) detector: AnomalyDetector,
    pub(crate) chains: ChainManager,
    pub(crate) scorer: RiskScorer,
    pub(crate) state: GlobalStateEngine,
    pub(crate) intervention: InterventionEngine,
    pub(crate) memory: GuardianMemory,
    pub(crate) audit: AuditLog,
    pub(crate) active_prompts: HashMap<String, ActivePrompt>,
    pub(crate) tick_count: u64,
    pub(crate) samples_count: u64,
    pub(crate) dropped_messages: u64,
}

impl Guardian {
    pub fn new(config: GuardianConfig) -> Self {
        let mut baselines =
            BaselineStore::with_config(config.baselines_path(), config.baseline.clone());
        let mut memory = GuardianMemory::new(config.memory_path());
        let mut audit = AuditLog::with_capacity(config.audit_path(), config.audit_max_events);

        // Quarantined files load as empty; leave a trace in the trail.
        for (file, warning) in [
            (constants::BASELINES_FILE, baselines.take_load_warning()),
            (constants::MEMORY_FILE, memory.take_load_warning()),
            (constants::AUDIT_FILE, audit.take_load_warning()),
        ] {
            if let Some(reason) = warning {
                audit.log(
                    AuditKind::System,
                    "guardian",
                    json!({ "event": "state_file_quarantined", "file": file, "reason": reason }),
                );
            }
        }

        Self {
            fingerprints: FingerprintManager::new(config.short_term_alpha),
            detector: AnomalyDetector::new(config.detector.clone()),
            chains: ChainManager::new(config.chain_window_secs),
            scorer: RiskScorer::new(config.scorer.clone()),
            state: GlobalStateEngine::default(),
            intervention: InterventionEngine::new(config.intervention.clone()),
            active_prompts: HashMap::new(),
            tick_count: 0,
            samples_count: 0,
            dropped_messages: 0,
            baselines,
            memory,
            audit,
            config,
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(
        &self,
        verdicts: Vec<Verdict>,
        telemetry: Option<TelemetryMessage>,
    ) -> GuardianSnapshot {
        let progress = self.baselines.learning_progress();
        let posture = self.state.posture_info();

        let mut insights = Vec::with_capacity(verdicts.len());
        for verdict in &verdicts {
            insights.push(verdict.reason.clone());
            if let Some(plan) = &verdict.recommendation {
                insights.push(format!("[Guardian Plan] {}", plan));
            }
        }

        GuardianSnapshot {
            guardian_state: GuardianStateInfo {
                state: posture.state,
                status_color: posture.status_color,
                intensity: posture.intensity,
                learning_progress: progress,
                is_learning: progress < 100,
            },
            verdicts,
            insights,
            samples_count: self.samples_count,
            dropped_messages: self.dropped_messages,
            last_update: Utc::now(),
            telemetry,
        }
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    pub fn handle_command(&mut self, command: GuardianCommand) -> CommandOutcome {
        match command {
            GuardianCommand::Reset => match self.reset() {
                Ok(snapshot) => CommandOutcome {
                    response: CommandResponse::ok("Guardian reset; learning phase restarted"),
                    snapshot: Some(snapshot),
                },
                Err(e) => CommandOutcome {
                    response: CommandResponse::err(format!("Reset failed: {}", e)),
                    snapshot: None,
                },
            },
            GuardianCommand::MarkTrusted { name } => {
                self.memory.mark_trusted(&name);
                self.baselines.mark_trusted(&name);
                self.audit.log(
                    AuditKind::UserDecision,
                    &name,
                    json!({ "decision": "mark_trusted" }),
                );
                CommandOutcome {
                    response: CommandResponse::ok(format!("{} marked trusted", name)),
                    snapshot: None,
                }
            }
            GuardianCommand::MarkDangerous { name } => {
                self.memory.mark_dangerous(&name);
                self.baselines.mark_untrusted(&name);
                self.audit.log(
                    AuditKind::UserDecision,
                    &name,
                    json!({ "decision": "mark_dangerous" }),
                );
                CommandOutcome {
                    response: CommandResponse::ok(format!("{} marked dangerous", name)),
                    snapshot: None,
                }
            }
            GuardianCommand::MarkIgnored { name } => {
                self.memory.mark_ignored(&name);
                self.baselines.mark_untrusted(&name);
                self.audit.log(
                    AuditKind::UserDecision,
                    &name,
                    json!({ "decision": "mark_ignored" }),
                );
                CommandOutcome {
                    response: CommandResponse::ok(format!("{} marked ignored", name)),
                    snapshot: None,
                }
            }
            GuardianCommand::AcknowledgePrompt {
                command_id,
                decision,
            } => match self.acknowledge_prompt(&command_id, decision) {
                Ok(process) => CommandOutcome {
                    response: CommandResponse::ok(format!(
                        "Prompt for {} resolved: {}",
                        process,
                        decision.as_str()
                    )),
                    snapshot: None,
                },
                Err(e) => CommandOutcome {
                    response: CommandResponse::err(e.to_string()),
                    snapshot: None,
                },
            },
        }
    }

    fn acknowledge_prompt(
        &mut self,
        command_id: &str,
        decision: PromptDecision,
    ) -> GuardianResult<String> {
        let name = self
            .active_prompts
            .iter()
            .find(|(_, p)| p.command_id == command_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| GuardianError::UnknownPrompt(command_id.to_string()))?;

        self.active_prompts.remove(&name);
        self.audit.log(
            AuditKind::UserDecision,
            &name,
            json!({ "decision": decision.as_str(), "command_id": command_id }),
        );
        Ok(name)
    }

    /// Open a confirmation prompt for `name`, unless one is already active.
    pub(crate) fn open_prompt(
        &mut self,
        now: DateTime<Utc>,
        name: &str,
        score: f64,
        reason: &str,
    ) -> Option<ConfirmationRequest> {
        if self.active_prompts.contains_key(name) {
            return None;
        }
        let details = format!(
            "{}\nRisk score {:.1} exceeded the confirmation threshold. Review this process?",
            reason, score
        );
        let request = ConfirmationRequest {
            command_id: Uuid::new_v4().to_string(),
            command_name: format!("Guardian review: {}", name),
            details: details.clone(),
        };
        self.active_prompts.insert(
            name.to_string(),
            ActivePrompt {
                command_id: request.command_id.clone(),
                process: name.to_string(),
                details,
                created_at: now,
                calm_ticks: 0,
            },
        );
        Some(request)
    }

    /// Age out prompts whose process kept scoring below Recommend.
    pub(crate) fn settle_prompts(&mut self, name_scores: &HashMap<String, f64>) {
        let recommend_at = self.config.intervention.recommend_at;
        let release_after = self.config.prompt_release_ticks;
        self.active_prompts.retain(|name, prompt| {
            let score = name_scores.get(name).copied().unwrap_or(0.0);
            if score < recommend_at {
                prompt.calm_ticks += 1;
            } else {
                prompt.calm_ticks = 0;
            }
            prompt.calm_ticks < release_after
        });
    }

    pub fn active_prompts(&self) -> Vec<ActivePrompt> {
        let mut prompts: Vec<ActivePrompt> = self.active_prompts.values().cloned().collect();
        prompts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        prompts
    }

    pub fn audit_history(&self, process: Option<&str>, limit: usize) -> Vec<AuditEvent> {
        self.audit.history(process, limit)
    }

    /// Engine counters for the diagnostics surface.
    pub fn statistics(&self) -> GuardianStatistics {
        let (trusted, dangerous, ignored) = self.memory.counts();
        let progress = self.baselines.learning_progress();
        GuardianStatistics {
            posture: self.state.current(),
            max_score: self.state.max_score(),
            suspicious_count: self.state.suspicious_count(),
            learning_progress: progress,
            is_learning: progress < 100,
            tick_count: self.tick_count,
            samples_count: self.samples_count,
            dropped_messages: self.dropped_messages,
            baseline_count: self.baselines.len(),
            fingerprint_count: self.fingerprints.len(),
            chain_count: self.chains.len(),
            audit_events: self.audit.len(),
            active_prompts: self.active_prompts.len(),
            trusted_names: trusted,
            dangerous_names: dangerous,
            ignored_names: ignored,
        }
    }

    // ------------------------------------------------------------------
    // Reset protocol
    // ------------------------------------------------------------------

    /// Clear learned behavior, user memory and the audit trail, restart the
    /// learning phase, and return the fresh snapshot to publish. A partial
    /// failure rolls back by re-reading the previously persisted state.
    pub fn reset(&mut self) -> GuardianResult<GuardianSnapshot> {
        log::info!("Guardian reset requested");
        match self.reset_inner() {
            Ok(()) => {
                self.state.reset();
                self.active_prompts.clear();
                Ok(self.snapshot(Vec::new(), None))
            }
            Err(e) => {
                log::error!("Reset failed ({}); rolling back to persisted state", e);
                self.baselines.load();
                self.memory.load();
                self.audit.load();
                Err(e)
            }
        }
    }

    fn reset_inner(&mut self) -> GuardianResult<()> {
        self.baselines.clear_all()?;
        self.chains.clear_all();
        self.memory.clear_all()?;
        self.audit.clear_all()?;
        self.audit.log(
            AuditKind::System,
            "guardian",
            json!({ "event": "reset", "message": "Guardian reset; learning phase restarted" }),
        );
        self.audit.save()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Flush every persisted store; called on clean shutdown.
    pub fn save_all(&mut self) {
        if let Err(e) = self.baselines.save() {
            log::error!("Failed to flush baselines: {}", e);
        }
        if let Err(e) = self.memory.save() {
            log::error!("Failed to flush guardian memory: {}", e);
        }
        if let Err(e) = self.audit.save() {
            log::error!("Failed to flush audit trail: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardian() -> (Guardian, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let guardian = Guardian::new(GuardianConfig::with_data_dir(dir.path()));
        (guardian, dir)
    }

    #[test]
    fn test_mark_commands_update_memory_and_baselines() {
        let (mut g, _dir) = guardian();
        g.baselines.update("svc", 1.0, 50.0, 0.0, 0.0, 0.0);

        let outcome = g.handle_command(GuardianCommand::MarkTrusted {
            name: "svc".to_string(),
        });
        assert!(outcome.response.success);
        assert!(g.memory.is_trusted("svc"));
        assert!(g.baselines.get("svc").unwrap().trusted);

        let outcome = g.handle_command(GuardianCommand::MarkDangerous {
            name: "svc".to_string(),
        });
        assert!(outcome.response.success);
        assert!(g.memory.is_dangerous("svc"));
        assert!(!g.memory.is_trusted("svc"));
        assert!(!g.baselines.get("svc").unwrap().trusted);
    }

    #[test]
    fn test_prompt_open_and_acknowledge() {
        let (mut g, _dir) = guardian();
        let now = Utc::now();
        let request = g.open_prompt(now, "svc", 14.0, "reason").unwrap();
        // Duplicate prompts are suppressed while one is active
        assert!(g.open_prompt(now, "svc", 15.0, "reason").is_none());
        assert_eq!(g.active_prompts().len(), 1);

        let outcome = g.handle_command(GuardianCommand::AcknowledgePrompt {
            command_id: request.command_id.clone(),
            decision: PromptDecision::Approve,
        });
        assert!(outcome.response.success);
        assert!(g.active_prompts().is_empty());

        // The decision landed in the trail
        let history = g.audit_history(Some("svc"), 10);
        assert_eq!(history.last().unwrap().kind, AuditKind::UserDecision);
    }

    #[test]
    fn test_unknown_prompt_rejected() {
        let (mut g, _dir) = guardian();
        let outcome = g.handle_command(GuardianCommand::AcknowledgePrompt {
            command_id: "nope".to_string(),
            decision: PromptDecision::Deny,
        });
        assert!(!outcome.response.success);
    }

    #[test]
    fn test_prompt_released_after_calm_ticks() {
        let (mut g, _dir) = guardian();
        g.open_prompt(Utc::now(), "svc", 14.0, "reason");

        let hot: HashMap<String, f64> = [("svc".to_string(), 13.0)].into_iter().collect();
        let calm: HashMap<String, f64> = HashMap::new();

        g.settle_prompts(&hot);
        assert_eq!(g.active_prompts().len(), 1);

        for _ in 0..constants::PROMPT_RELEASE_TICKS - 1 {
            g.settle_prompts(&calm);
            assert_eq!(g.active_prompts().len(), 1);
        }
        // A hot tick resets the calm streak
        g.settle_prompts(&hot);
        for _ in 0..constants::PROMPT_RELEASE_TICKS - 1 {
            g.settle_prompts(&calm);
        }
        assert_eq!(g.active_prompts().len(), 1);
        g.settle_prompts(&calm);
        assert!(g.active_prompts().is_empty());
    }

    #[test]
    fn test_reset_wipes_state_and_restarts_learning() {
        let (mut g, _dir) = guardian();
        g.baselines.update("svc", 1.0, 50.0, 0.0, 0.0, 0.0);
        g.baselines.anchor_learning_at(Utc::now().timestamp() - 10_000);
        g.memory.mark_dangerous("svc");
        g.open_prompt(Utc::now(), "svc", 14.0, "reason");
        assert_eq!(g.baselines.learning_progress(), 100);

        let snapshot = g.reset().unwrap();
        assert!(g.baselines.is_empty());
        assert!(!g.memory.is_dangerous("svc"));
        assert!(g.active_prompts().is_empty());
        assert_eq!(snapshot.guardian_state.learning_progress, 0);
        assert!(snapshot.guardian_state.is_learning);
        assert!(snapshot.verdicts.is_empty());

        // The trail holds exactly the reset marker
        let history = g.audit_history(None, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, AuditKind::System);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (mut g, _dir) = guardian();
        g.baselines.update("svc", 1.0, 50.0, 0.0, 0.0, 0.0);
        let first = g.reset().unwrap();
        let second = g.reset().unwrap();
        assert_eq!(first.guardian_state.learning_progress, 0);
        assert_eq!(second.guardian_state.learning_progress, 0);
        assert!(g.baselines.is_empty());
        assert_eq!(g.audit_history(None, 10).len(), 1);
    }
}

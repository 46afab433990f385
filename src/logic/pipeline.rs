//! Telemetry Consumer - the per-tick pipeline
//!
//! One tick processes one telemetry message to completion under the
//! coarse state lock, in a fixed order: fingerprint, detect, chain, score
//! per process; verdicts and confirmations (suppressed while learning or
//! trusted); baseline absorption *after* detection so a live anomaly does
//! not smooth itself away; posture update; cleanup; periodic persistence.
//!
//! A panic inside one process's analysis skips that process; a panic
//! anywhere else aborts the tick and leaves the published snapshot
//! untouched. Nothing here can take the host process down.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use super::anomaly::DetectionContext;
use super::audit::AuditKind;
use super::guardian::{ConfirmationRequest, Guardian};
use super::ingest::{DropCounters, IngestStats};
use super::intervention::InterventionLevel;
use super::snapshot::{GuardianSnapshot, SnapshotPublisher};
use super::storage::PersistJob;
use super::types::{PersistenceEntry, ProcessSample, TelemetryMessage};
use super::verdict::Verdict;

// ============================================================================
// TICK OUTPUT
// ============================================================================

pub struct TickOutcome {
    pub snapshot: GuardianSnapshot,
    pub confirmations: Vec<ConfirmationRequest>,
    pub baseline_save: Option<PersistJob>,
    pub audit_save: Option<PersistJob>,
}

struct ProcessOutcome {
    pid: u32,
    name: String,
    score: f64,
    verdict: Option<Verdict>,
    confirmation: Option<ConfirmationRequest>,
}

// ============================================================================
// TICK
// ============================================================================

impl Guardian {
    /// Process one telemetry message. Deterministic order; every step
    /// degrades instead of failing.
    pub fn tick(&mut self, msg: &TelemetryMessage, drops: DropCounters) -> TickOutcome {
        let now = Utc::now();
        self.tick_count += 1;
        self.samples_count += 1;
        self.dropped_messages += drops.total();

        let processes = msg.processes();
        let active_pids: HashSet<u32> = processes
            .iter()
            .filter(|p| p.is_valid())
            .map(|p| p.pid)
            .collect();

        // Producers that cannot enumerate children still report parent
        // PIDs; derive the counts from the sample itself in that case.
        let mut parent_counts: HashMap<u32, u32> = HashMap::new();
        for sample in processes {
            if let Some(ppid) = sample.parent_pid {
                *parent_counts.entry(ppid).or_insert(0) += 1;
            }
        }

        let progress = self.baselines.learning_progress_at(now);
        let is_learning = progress < 100;

        let mut scores: HashMap<u32, f64> = HashMap::new();
        let mut name_scores: HashMap<String, f64> = HashMap::new();
        let mut verdicts = Vec::new();
        let mut confirmations = Vec::new();
        let mut skipped = 0u64;
        let mut panicked = 0u64;

        for sample in processes {
            if !sample.is_valid() {
                skipped += 1;
                continue;
            }
            let child_count = if sample.children.is_empty() {
                parent_counts.get(&sample.pid).copied().unwrap_or(0)
            } else {
                sample.child_count()
            };
            let analyzed = catch_unwind(AssertUnwindSafe(|| {
                self.analyze_process(now, sample, child_count, &msg.persistence, is_learning)
            }));
            match analyzed {
                Ok(outcome) => {
                    scores.insert(outcome.pid, outcome.score);
                    let entry = name_scores.entry(outcome.name).or_insert(0.0);
                    *entry = entry.max(outcome.score);
                    if let Some(v) = outcome.verdict {
                        verdicts.push(v);
                    }
                    if let Some(c) = outcome.confirmation {
                        confirmations.push(c);
                    }
                }
                Err(_) => {
                    panicked += 1;
                    log::error!(
                        "Analysis panicked for pid {} ({}); continuing tick",
                        sample.pid,
                        sample.name
                    );
                }
            }
        }

        if skipped > 0 || panicked > 0 || drops.total() > 0 {
            self.audit.log_at(
                now,
                AuditKind::System,
                "telemetry",
                json!({
                    "event": "tick_degraded",
                    "skipped_samples": skipped,
                    "analysis_panics": panicked,
                    "malformed_lines": drops.malformed,
                    "out_of_order": drops.out_of_order,
                }),
            );
        }

        self.settle_prompts(&name_scores);
        self.state.update(&scores);
        self.fingerprints.cleanup(&active_pids);
        self.chains.cleanup(&active_pids);

        let baseline_save = if self.tick_count % self.config.baseline_save_every_ticks == 0 {
            self.baselines.compact(now);
            match self.baselines.persist_payload() {
                Ok(payload) => Some(PersistJob::new(self.baselines.path().to_path_buf(), payload)),
                Err(e) => {
                    log::error!("Failed to serialize baselines: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let audit_save = if self.audit.since_flush() >= self.config.audit_flush_every {
            match self.audit.persist_payload() {
                Ok(payload) => {
                    self.audit.mark_flushed();
                    Some(PersistJob::new(self.config.audit_path(), payload))
                }
                Err(e) => {
                    log::error!("Failed to serialize audit trail: {}", e);
                    None
                }
            }
        } else {
            None
        };

        TickOutcome {
            snapshot: self.snapshot(verdicts, Some(msg.clone())),
            confirmations,
            baseline_save,
            audit_save,
        }
    }

    /// The per-process chain: fingerprint -> detect -> chain -> score,
    /// then verdict generation and, last, baseline absorption.
    fn analyze_process(
        &mut self,
        now: DateTime<Utc>,
        sample: &ProcessSample,
        child_count: u32,
        persistence: &[PersistenceEntry],
        is_learning: bool,
    ) -> ProcessOutcome {
        let name = sample.name.as_str();

        self.fingerprints.track_at(
            now,
            sample.pid,
            name,
            sample.cpu_percent,
            sample.ram_mb,
            sample.net_sent_kbps,
            sample.net_received_kbps,
            child_count,
        );

        let mut outcome = ProcessOutcome {
            pid: sample.pid,
            name: name.to_string(),
            score: 0.0,
            verdict: None,
            confirmation: None,
        };

        if !self.memory.is_ignored(name) {
            let anomalies = {
                let fingerprint = self
                    .fingerprints
                    .get(sample.pid)
                    .expect("fingerprint exists after track");
                let ctx = DetectionContext {
                    pid: sample.pid,
                    name,
                    exe_path: &sample.exe_path,
                    cpu: sample.cpu_percent,
                    ram: sample.ram_mb,
                    child_count,
                    net_sent: sample.net_sent_kbps,
                    net_recv: sample.net_received_kbps,
                    fingerprint,
                    baseline: self.baselines.get(name),
                    restart_count: self.fingerprints.restart_count(name),
                    persistence,
                };
                self.detector.analyze(&ctx)
            };

            for anomaly in &anomalies {
                if anomaly.kind.is_one_shot() {
                    if let Some(fp) = self.fingerprints.get_mut(sample.pid) {
                        fp.mark_emitted(anomaly.kind);
                    }
                }
            }

            let multiplier = self.chains.update_at(now, sample.pid, name, &anomalies);
            let scored = self.scorer.score(&self.memory, name, anomalies, multiplier);
            outcome.score = scored.score;

            let trusted = self.memory.is_trusted(name)
                || self.baselines.get(name).is_some_and(|b| b.trusted);

            if !is_learning && !trusted && scored.is_significant() {
                let level = self.intervention.level_for(scored.score);
                let recommendation =
                    self.intervention
                        .recommendation(name, &scored.significant, level);
                let primary = scored
                    .significant
                    .iter()
                    .max_by_key(|a| a.severity)
                    .expect("significant set is non-empty");
                let verdict = Verdict::from_primary(
                    name,
                    sample.pid,
                    scored.score,
                    level,
                    primary,
                    recommendation,
                );

                if level >= InterventionLevel::Recommend {
                    if let Some(text) = &verdict.recommendation {
                        self.audit.log_at(
                            now,
                            AuditKind::Intervention,
                            name,
                            json!({
                                "score": scored.score,
                                "level": level.as_str(),
                                "recommendation": text,
                            }),
                        );
                    }
                }

                if level == InterventionLevel::RequestConfirmation {
                    if let Some(request) =
                        self.open_prompt(now, name, scored.score, &verdict.reason)
                    {
                        let lifespan = self.fingerprints.lifespan_secs(sample.pid);
                        self.audit.log_at(
                            now,
                            AuditKind::Alert,
                            name,
                            json!({
                                "score": scored.score,
                                "level": level.as_str(),
                                "anomaly": primary.kind.as_str(),
                                "process_lifespan_secs": lifespan,
                                "command_id": request.command_id,
                            }),
                        );
                        outcome.confirmation = Some(request);
                    }
                }
                outcome.verdict = Some(verdict);
            }
        }

        // Baselines absorb the sample only after detection ran against the
        // previous state.
        self.baselines.update(
            name,
            sample.cpu_percent,
            sample.ram_mb,
            child_count as f64,
            sample.net_sent_kbps,
            sample.net_received_kbps,
        );

        outcome
    }
}

// ============================================================================
// PIPELINE TASK
// ============================================================================

/// Drive the guardian from the intake channel until shutdown, publishing a
/// snapshot per tick and handing persistence to the writer task. On the way
/// out, the current tick completes and all stores flush.
pub async fn run(
    guardian: Arc<Mutex<Guardian>>,
    publisher: Arc<SnapshotPublisher>,
    mut samples: watch::Receiver<Option<Arc<TelemetryMessage>>>,
    stats: Arc<IngestStats>,
    io_tx: mpsc::UnboundedSender<PersistJob>,
    confirm_tx: mpsc::UnboundedSender<ConfirmationRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("Analysis pipeline started");
    loop {
        tokio::select! {
            changed = samples.changed() => {
                if changed.is_err() {
                    break;
                }
                let msg = { samples.borrow_and_update().clone() };
                let Some(msg) = msg else { continue };
                let drops = stats.drain();

                let ticked = {
                    let mut g = guardian.lock();
                    catch_unwind(AssertUnwindSafe(|| g.tick(&msg, drops)))
                };
                match ticked {
                    Ok(outcome) => {
                        for job in [outcome.baseline_save, outcome.audit_save]
                            .into_iter()
                            .flatten()
                        {
                            let _ = io_tx.send(job);
                        }
                        for request in outcome.confirmations {
                            let _ = confirm_tx.send(request);
                        }
                        publisher.publish(outcome.snapshot);
                    }
                    Err(_) => {
                        // Tick aborted; snapshot stays as-is.
                        log::error!("Tick aborted by internal panic; state preserved");
                        let mut g = guardian.lock();
                        g.audit.log(
                            AuditKind::System,
                            "guardian",
                            json!({ "event": "tick_aborted" }),
                        );
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    guardian.lock().save_all();
    log::info!("Analysis pipeline stopped; state flushed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::guardian::GuardianConfig;
    use crate::logic::types::{ProcessTable, SystemTelemetry};
    use std::time::Duration;

    struct Rig {
        guardian: Arc<Mutex<Guardian>>,
        publisher: Arc<SnapshotPublisher>,
        stats: Arc<IngestStats>,
        sample_tx: watch::Sender<Option<Arc<TelemetryMessage>>>,
        io_rx: mpsc::UnboundedReceiver<PersistJob>,
        confirm_rx: mpsc::UnboundedReceiver<ConfirmationRequest>,
        shutdown_tx: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
        _dir: tempfile::TempDir,
    }

    fn spawn_rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let guardian = Arc::new(Mutex::new(Guardian::new(GuardianConfig::with_data_dir(
            dir.path(),
        ))));
        let publisher = Arc::new(SnapshotPublisher::default());
        let stats = Arc::new(IngestStats::default());
        let (sample_tx, sample_rx) = watch::channel(None);
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            guardian.clone(),
            publisher.clone(),
            sample_rx,
            stats.clone(),
            io_tx,
            confirm_tx,
            shutdown_rx,
        ));

        Rig {
            guardian,
            publisher,
            stats,
            sample_tx,
            io_rx,
            confirm_rx,
            shutdown_tx,
            task,
            _dir: dir,
        }
    }

    fn message(timestamp: i64, samples: Vec<ProcessSample>) -> Arc<TelemetryMessage> {
        Arc::new(TelemetryMessage {
            timestamp,
            system: SystemTelemetry {
                processes: ProcessTable { top_ram: samples },
            },
            persistence: Vec::new(),
        })
    }

    fn sample(pid: u32, name: &str, cpu: f64) -> ProcessSample {
        ProcessSample {
            pid,
            name: name.to_string(),
            cpu_percent: cpu,
            ram_mb: 50.0,
            ..Default::default()
        }
    }

    /// Poll until the pipeline has processed `n` messages.
    async fn wait_for_samples(publisher: &SnapshotPublisher, n: u64) -> Arc<GuardianSnapshot> {
        for _ in 0..500 {
            let snapshot = publisher.get();
            if snapshot.samples_count >= n {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pipeline did not reach {} processed messages", n);
    }

    #[tokio::test]
    async fn test_task_publishes_snapshot_per_message() {
        let rig = spawn_rig();

        rig.sample_tx
            .send(Some(message(1, vec![sample(5, "svc", 2.0)])))
            .unwrap();
        let snapshot = wait_for_samples(&rig.publisher, 1).await;
        assert_eq!(snapshot.samples_count, 1);
        assert_eq!(snapshot.telemetry.as_ref().unwrap().timestamp, 1);

        rig.sample_tx
            .send(Some(message(2, vec![sample(5, "svc", 2.0)])))
            .unwrap();
        let snapshot = wait_for_samples(&rig.publisher, 2).await;
        assert_eq!(snapshot.samples_count, 2);

        rig.shutdown_tx.send(true).unwrap();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_intake_drops_fold_into_next_tick() {
        let rig = spawn_rig();
        rig.stats.note_malformed();
        rig.stats.note_out_of_order();

        rig.sample_tx
            .send(Some(message(1, vec![sample(5, "svc", 2.0)])))
            .unwrap();
        let snapshot = wait_for_samples(&rig.publisher, 1).await;
        assert_eq!(snapshot.dropped_messages, 2);

        rig.shutdown_tx.send(true).unwrap();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_state_to_disk() {
        let rig = spawn_rig();
        rig.sample_tx
            .send(Some(message(1, vec![sample(5, "svc", 2.0)])))
            .unwrap();
        wait_for_samples(&rig.publisher, 1).await;

        rig.shutdown_tx.send(true).unwrap();
        rig.task.await.unwrap();

        let config = {
            let g = rig.guardian.lock();
            g.config.clone()
        };
        assert!(config.baselines_path().exists());
        assert!(config.memory_path().exists());
        assert!(config.audit_path().exists());
    }

    #[tokio::test]
    async fn test_periodic_save_reaches_writer_channel() {
        let mut rig = spawn_rig();

        for ts in 1..=50i64 {
            rig.sample_tx
                .send(Some(message(ts, vec![sample(5, "svc", 2.0)])))
                .unwrap();
            wait_for_samples(&rig.publisher, ts as u64).await;
        }

        let job = rig.io_rx.recv().await.expect("baseline save job");
        assert!(job.path.ends_with(crate::constants::BASELINES_FILE));
        assert!(!job.payload.is_empty());

        rig.shutdown_tx.send(true).unwrap();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_confirmations_reach_collaborator_channel() {
        let mut rig = spawn_rig();
        {
            let mut g = rig.guardian.lock();
            g.baselines
                .anchor_learning_at(chrono::Utc::now().timestamp() - 3600);
            // Stationary profile plus a dangerous mark pushes one restart
            // loop over the confirmation threshold.
            for _ in 0..20 {
                g.baselines.update("crashy", 1.0, 50.0, 0.0, 0.0, 0.0);
            }
            g.memory.mark_dangerous("crashy");
        }

        for (ts, pid) in [(1i64, 100u32), (2, 101), (3, 102), (4, 103)] {
            rig.sample_tx
                .send(Some(message(ts, vec![sample(pid, "crashy", 1.0)])))
                .unwrap();
            wait_for_samples(&rig.publisher, ts as u64).await;
        }

        let request = rig.confirm_rx.recv().await.expect("confirmation request");
        assert!(request.command_name.contains("crashy"));
        assert!(!request.command_id.is_empty());

        rig.shutdown_tx.send(true).unwrap();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_persists_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(crate::logic::storage::run_writer(rx));

        let path = dir.path().join("out.json");
        tx.send(PersistJob::new(path.clone(), b"[1,2,3]".to_vec()))
            .unwrap();
        drop(tx);
        writer.await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"[1,2,3]");
    }
}

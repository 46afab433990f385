//! Audit Log - append-only event trail
//!
//! Records alerts, interventions, user decisions and system events with
//! wall-clock timestamps, bounded to the most recent 1,000 entries. The
//! pipeline flushes every 50 events to amortize I/O; write failures never
//! fail a tick - in-memory state stays authoritative and the next flush
//! retries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants;
use super::error::GuardianResult;
use super::storage::{self, LoadOutcome};

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    Alert,
    Intervention,
    UserDecision,
    System,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Alert => "Alert",
            AuditKind::Intervention => "Intervention",
            AuditKind::UserDecision => "UserDecision",
            AuditKind::System => "System",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: AuditKind,
    pub process: String,
    /// Opaque key-value bag; shape depends on the event
    pub details: Value,
}

// ============================================================================
// LOG
// ============================================================================

pub struct AuditLog {
    path: PathBuf,
    events: Vec<AuditEvent>,
    max_entries: usize,
    since_flush: usize,
    load_warning: Option<String>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, constants::AUDIT_MAX_EVENTS)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let mut log = Self {
            path: path.into(),
            events: Vec::new(),
            max_entries,
            since_flush: 0,
            load_warning: None,
        };
        log.load();
        log
    }

    /// Reason the last load fell back to empty state, if it did.
    pub fn take_load_warning(&mut self) -> Option<String> {
        self.load_warning.take()
    }

    pub fn load(&mut self) -> Option<String> {
        match storage::load_json::<Vec<AuditEvent>>(&self.path) {
            LoadOutcome::Loaded(mut events) => {
                if events.len() > self.max_entries {
                    events.drain(..events.len() - self.max_entries);
                }
                self.events = events;
                None
            }
            LoadOutcome::Missing => None,
            LoadOutcome::Quarantined(reason) => {
                log::warn!("Audit trail corrupt ({}); starting empty", reason);
                self.load_warning = Some(reason.clone());
                Some(reason)
            }
        }
    }

    /// Append one event.
    pub fn log(&mut self, kind: AuditKind, process: &str, details: Value) {
        self.log_at(Utc::now(), kind, process, details);
    }

    pub fn log_at(&mut self, now: DateTime<Utc>, kind: AuditKind, process: &str, details: Value) {
        self.events.push(AuditEvent {
            timestamp: now,
            kind,
            process: process.to_string(),
            details,
        });
        if self.events.len() > self.max_entries {
            let excess = self.events.len() - self.max_entries;
            self.events.drain(..excess);
        }
        self.since_flush += 1;
    }

    /// Events appended since the last flush; the pipeline saves when this
    /// crosses the flush interval.
    pub fn since_flush(&self) -> usize {
        self.since_flush
    }

    pub fn mark_flushed(&mut self) {
        self.since_flush = 0;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Most recent events, optionally filtered by process name.
    /// Returned oldest-first, bounded by `limit`.
    pub fn history(&self, process: Option<&str>, limit: usize) -> Vec<AuditEvent> {
        let filtered: Vec<&AuditEvent> = self
            .events
            .iter()
            .filter(|e| process.map_or(true, |p| e.process == p))
            .collect();
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].iter().map(|e| (*e).clone()).collect()
    }

    pub fn persist_payload(&self) -> GuardianResult<Vec<u8>> {
        storage::to_payload(&self.events)
    }

    pub fn save(&mut self) -> GuardianResult<()> {
        storage::atomic_write(&self.path, &self.persist_payload()?)?;
        self.since_flush = 0;
        Ok(())
    }

    pub fn clear_all(&mut self) -> GuardianResult<()> {
        self.events.clear();
        self.since_flush = 0;
        self.save()
    }
}

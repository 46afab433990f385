//! Snapshot Publisher - latest state for external readers
//!
//! The pipeline publishes an immutable snapshot at the end of every tick;
//! readers take a cheap reference-counted handle and never contend with
//! analysis. Waiters can block for the next publication with a timeout,
//! falling back to whatever was published last.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::state::HostPosture;
use super::types::TelemetryMessage;
use super::verdict::Verdict;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Posture block as rendered to the UI, including learning-phase fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianStateInfo {
    pub state: HostPosture,
    pub status_color: String,
    pub intensity: u8,
    pub learning_progress: u8,
    pub is_learning: bool,
}

impl Default for GuardianStateInfo {
    fn default() -> Self {
        Self {
            state: HostPosture::Calm,
            status_color: HostPosture::Calm.status_color().to_string(),
            intensity: 0,
            learning_progress: 0,
            is_learning: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianSnapshot {
    pub guardian_state: GuardianStateInfo,
    /// Verdicts produced by the latest tick
    pub verdicts: Vec<Verdict>,
    /// Rendered one-liners for the latest tick, ready for display
    #[serde(default)]
    pub insights: Vec<String>,
    /// Telemetry messages processed since startup
    pub samples_count: u64,
    /// Malformed or out-of-order messages dropped since startup
    pub dropped_messages: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_update: DateTime<Utc>,
    /// The latest accepted sample, echoed through unchanged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryMessage>,
}

impl Default for GuardianSnapshot {
    fn default() -> Self {
        Self {
            guardian_state: GuardianStateInfo::default(),
            verdicts: Vec::new(),
            insights: Vec::new(),
            samples_count: 0,
            dropped_messages: 0,
            last_update: Utc::now(),
            telemetry: None,
        }
    }
}

// ============================================================================
// PUBLISHER
// ============================================================================

pub struct SnapshotPublisher {
    current: RwLock<Arc<GuardianSnapshot>>,
    notify: Notify,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(GuardianSnapshot::default())),
            notify: Notify::new(),
        }
    }
}

impl SnapshotPublisher {
    /// Swap in a new snapshot and wake any waiters.
    pub fn publish(&self, snapshot: GuardianSnapshot) {
        *self.current.write() = Arc::new(snapshot);
        self.notify.notify_waiters();
    }

    /// Cheap handle to the latest snapshot.
    pub fn get(&self) -> Arc<GuardianSnapshot> {
        self.current.read().clone()
    }

    /// Wait for the next publication, or return the current snapshot when
    /// the timeout expires first.
    pub async fn wait_for_update(&self, timeout: Duration) -> Arc<GuardianSnapshot> {
        let notified = self.notify.notified();
        let _ = tokio::time::timeout(timeout, notified).await;
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot_is_learning_calm() {
        let publisher = SnapshotPublisher::default();
        let snap = publisher.get();
        assert_eq!(snap.guardian_state.state, HostPosture::Calm);
        assert!(snap.guardian_state.is_learning);
        assert!(snap.verdicts.is_empty());
    }

    #[test]
    fn test_publish_swaps_atomically() {
        let publisher = SnapshotPublisher::default();
        let before = publisher.get();

        let mut next = GuardianSnapshot::default();
        next.samples_count = 9;
        publisher.publish(next);

        // The old handle still reads the old state; new reads see the swap.
        assert_eq!(before.samples_count, 0);
        assert_eq!(publisher.get().samples_count, 9);
    }

    #[tokio::test]
    async fn test_wait_times_out_to_latest() {
        let publisher = SnapshotPublisher::default();
        let snap = publisher
            .wait_for_update(Duration::from_millis(10))
            .await;
        assert_eq!(snap.samples_count, 0);
    }

    #[tokio::test]
    async fn test_wait_sees_new_publication() {
        let publisher = Arc::new(SnapshotPublisher::default());
        let waiter = publisher.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_update(Duration::from_secs(5)).await
        });

        // Give the waiter a chance to register
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut next = GuardianSnapshot::default();
        next.samples_count = 3;
        publisher.publish(next);

        let snap = handle.await.unwrap();
        assert_eq!(snap.samples_count, 3);
    }
}

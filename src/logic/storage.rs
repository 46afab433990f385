//! Crash-safe JSON persistence
//!
//! All guardian state files are rewritten via temp-file + rename so a crash
//! mid-write never leaves a torn file. A file that fails to parse is moved
//! aside with a `.bad` suffix and the caller starts from empty state.
//!
//! The pipeline never blocks on file I/O: it serializes under the state lock
//! and hands a [`PersistJob`] to the dedicated writer task.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::error::{GuardianError, GuardianResult};

// ============================================================================
// ATOMIC WRITES
// ============================================================================

/// Write `payload` to `path` atomically (temp file + rename).
pub fn atomic_write(path: &Path, payload: &[u8]) -> GuardianResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

// ============================================================================
// LOADING
// ============================================================================

/// Outcome of loading a persisted state file.
pub enum LoadOutcome<T> {
    Loaded(T),
    /// File does not exist yet; start empty.
    Missing,
    /// File existed but was corrupt; it was moved to `<path>.bad`.
    Quarantined(String),
}

/// Load and parse a JSON state file. Corrupt files are quarantined with a
/// `.bad` suffix so the next save recreates a clean file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> LoadOutcome<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(e) => return LoadOutcome::Quarantined(e.to_string()),
    };

    match serde_json::from_slice(&data) {
        Ok(value) => LoadOutcome::Loaded(value),
        Err(e) => {
            let bad = bad_path(path);
            if let Err(mv) = fs::rename(path, &bad) {
                log::error!("Failed to quarantine corrupt file {:?}: {}", path, mv);
            } else {
                log::warn!("Quarantined corrupt file {:?} -> {:?}", path, bad);
            }
            LoadOutcome::Quarantined(e.to_string())
        }
    }
}

fn bad_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bad");
    path.with_file_name(name)
}

// ============================================================================
// WRITER TASK
// ============================================================================

/// One pending write: an already-serialized payload bound for `path`.
#[derive(Debug)]
pub struct PersistJob {
    pub path: PathBuf,
    pub payload: Vec<u8>,
}

impl PersistJob {
    pub fn new(path: PathBuf, payload: Vec<u8>) -> Self {
        Self { path, payload }
    }
}

/// Dedicated writer task. Consumes jobs until the channel closes, then
/// exits; write failures are logged and never propagate to the pipeline.
pub async fn run_writer(mut rx: mpsc::UnboundedReceiver<PersistJob>) {
    while let Some(job) = rx.recv().await {
        let result = tokio::task::spawn_blocking(move || {
            let outcome = atomic_write(&job.path, &job.payload);
            (job.path, outcome)
        })
        .await;

        match result {
            Ok((path, Ok(()))) => log::debug!("Persisted {:?}", path),
            Ok((path, Err(e))) => log::error!("Failed to persist {:?}: {}", path, e),
            Err(e) => log::error!("Persistence worker panicked: {}", e),
        }
    }
    log::info!("Persistence writer stopped");
}

/// Serialize a value for a [`PersistJob`] payload.
pub fn to_payload<T: serde::Serialize>(value: &T) -> GuardianResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(GuardianError::from)
}

//! Guardian error type
//!
//! Persistence and protocol failures only. Detection paths never return
//! errors; they degrade and record audit events instead.

use thiserror::Error;

pub type GuardianResult<T> = Result<T, GuardianError>;

#[derive(Debug, Error)]
pub enum GuardianError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unknown prompt id: {0}")]
    UnknownPrompt(String),
}

//! Central Configuration Constants
//!
//! Single source of truth for all tuning defaults. Components take these
//! through their config structs so tests can override them; to change a
//! production default, only edit this file.

use std::path::PathBuf;

/// App name
pub const APP_NAME: &str = "Behavioral Guardian";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================
// Baselining (long-term, per process name)
// ============================================

/// EMA smoothing factor for long-term baselines
pub const LONG_TERM_ALPHA: f64 = 0.1;

/// EMA smoothing factor for live fingerprints (faster adaptation)
pub const SHORT_TERM_ALPHA: f64 = 0.3;

/// Duration of the learning phase after first run / reset (seconds)
pub const LEARNING_PHASE_SECS: i64 = 300;

/// Minimum baseline samples before anomaly detection engages
pub const MIN_BASELINE_SAMPLES: u64 = 5;

/// Baselines unseen for this long are evicted during compaction (days)
pub const BASELINE_RETENTION_DAYS: i64 = 30;

/// Baselines are persisted every N processed ticks
pub const BASELINE_SAVE_EVERY_TICKS: u64 = 50;

// ============================================
// Fingerprinting (short-window, per PID)
// ============================================

/// Rolling window of raw CPU readings per PID
pub const CPU_RING_CAPACITY: usize = 10;

/// Rolling window of raw RAM readings per PID
pub const RAM_RING_CAPACITY: usize = 20;

/// Rolling window of child counts per PID
pub const CHILD_RING_CAPACITY: usize = 10;

/// Samples required before a RAM growth rate is meaningful
pub const GROWTH_MIN_SAMPLES: usize = 5;

// ============================================
// Detection thresholds
// ============================================

/// CPU must exceed this multiple of the baseline average to trigger
pub const CPU_SPIKE_FACTOR: f64 = 3.0;

/// Absolute CPU floor (%) below which spikes are ignored
pub const CPU_SPIKE_FLOOR: f64 = 5.0;

/// A CPU reading above this multiple of the average counts as sustained load
pub const CPU_SUSTAINED_FACTOR: f64 = 2.0;

/// RAM must exceed this multiple of the baseline average to trigger
pub const RAM_DEVIATION_FACTOR: f64 = 1.5;

/// RAM must also exceed the baseline by this many MB to trigger
pub const RAM_DEVIATION_MIN_MB: f64 = 50.0;

/// Child count must exceed this multiple of the baseline average
pub const CHILD_PROLIFERATION_FACTOR: f64 = 2.0;

/// Child count must also exceed the baseline average by this margin
pub const CHILD_PROLIFERATION_MARGIN: f64 = 2.0;

/// Distinct PIDs per name before a restart loop is reported
pub const RESTART_LOOP_THRESHOLD: u32 = 4;

/// Network throughput must exceed this multiple of the baselined total
pub const NETWORK_BURST_FACTOR: f64 = 3.0;

/// Absolute network floor (kbps) below which bursts are ignored
pub const NETWORK_BURST_FLOOR_KBPS: f64 = 100.0;

// ============================================
// Chaining & scoring
// ============================================

/// Behavioral chain event window (seconds)
pub const CHAIN_WINDOW_SECS: i64 = 300;

/// Hard cap on retained chain events per PID
pub const CHAIN_MAX_EVENTS: usize = 30;

/// Risk score at or above which an anomaly set is significant
pub const SCORE_THRESHOLD: f64 = 5.0;

/// Anomaly severity at or above which an anomaly set is significant
pub const SEVERITY_THRESHOLD: u8 = 3;

/// Score credit applied to processes the user marked trusted
pub const TRUSTED_SCORE_CREDIT: f64 = 20.0;

/// Score penalty applied to processes the user marked dangerous
pub const DANGEROUS_SCORE_PENALTY: f64 = 10.0;

// ============================================
// Intervention ladder (score -> level)
// ============================================

pub const INFORM_THRESHOLD: f64 = 3.0;
pub const WARN_THRESHOLD: f64 = 6.0;
pub const RECOMMEND_THRESHOLD: f64 = 9.0;
pub const CONFIRM_THRESHOLD: f64 = 12.0;

/// Ticks a name must stay below Recommend before its prompt is released
pub const PROMPT_RELEASE_TICKS: u32 = 5;

// ============================================
// Audit trail
// ============================================

/// Maximum retained audit events
pub const AUDIT_MAX_EVENTS: usize = 1000;

/// Audit trail is flushed to disk every N new events
pub const AUDIT_FLUSH_EVERY: usize = 50;

// ============================================
// Persisted file names
// ============================================

pub const BASELINES_FILE: &str = "baselines.json";
pub const MEMORY_FILE: &str = "memory.json";
pub const AUDIT_FILE: &str = "audit.json";

// ============================================
// Transport defaults
// ============================================

/// Default bind address for the telemetry ingress listener
pub const DEFAULT_TELEMETRY_ADDR: &str = "127.0.0.1:7831";

/// Default bind address for the HTTP API
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:7830";

/// Get telemetry listener address from environment or use default
pub fn get_telemetry_addr() -> String {
    std::env::var("GUARDIAN_TELEMETRY_ADDR").unwrap_or_else(|_| DEFAULT_TELEMETRY_ADDR.to_string())
}

/// Get HTTP API address from environment or use default
pub fn get_api_addr() -> String {
    std::env::var("GUARDIAN_API_ADDR").unwrap_or_else(|_| DEFAULT_API_ADDR.to_string())
}

/// Default data directory for persisted guardian state
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("behavioral-guardian")
}

/// Get data directory from environment or use default
pub fn get_data_dir() -> PathBuf {
    std::env::var("GUARDIAN_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir())
}

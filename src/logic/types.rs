//! Telemetry ingress model
//!
//! Wire types for the newline-delimited JSON stream produced by the native
//! telemetry collector. Parsing is lenient: unknown fields are ignored and
//! every per-process field has a default so a partial sample still loads.
//! Validity is checked separately so one bad process never drops the tick.

use serde::{Deserialize, Serialize};

// ============================================================================
// SAMPLES
// ============================================================================

/// One process observation within a telemetry message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    #[serde(default)]
    pub parent_pid: Option<u32>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub exe_path: String,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub ram_mb: f64,
    #[serde(default)]
    pub children: Vec<u32>,
    #[serde(default)]
    pub disk_read_kb: f64,
    #[serde(default)]
    pub disk_written_kb: f64,
    #[serde(default)]
    pub net_sent_kbps: f64,
    #[serde(default)]
    pub net_received_kbps: f64,
}

impl ProcessSample {
    /// A sample is usable when its identity is present and every metric is a
    /// finite, non-negative number. Invalid samples are skipped and counted.
    pub fn is_valid(&self) -> bool {
        if self.pid == 0 || self.name.is_empty() {
            return false;
        }
        [
            self.cpu_percent,
            self.ram_mb,
            self.disk_read_kb,
            self.disk_written_kb,
            self.net_sent_kbps,
            self.net_received_kbps,
        ]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
    }

    pub fn child_count(&self) -> u32 {
        self.children.len() as u32
    }
}

// ============================================================================
// PERSISTENCE ENTRIES
// ============================================================================

/// One autostart / registry persistence entry reported by the producer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceEntry {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub source: Option<String>,
}

// ============================================================================
// TELEMETRY MESSAGE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessTable {
    #[serde(default)]
    pub top_ram: Vec<ProcessSample>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemTelemetry {
    #[serde(default)]
    pub processes: ProcessTable,
}

/// One complete tick of telemetry as produced by the collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryMessage {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub system: SystemTelemetry,
    #[serde(default)]
    pub persistence: Vec<PersistenceEntry>,
}

impl TelemetryMessage {
    pub fn processes(&self) -> &[ProcessSample] {
        &self.system.processes.top_ram
    }
}

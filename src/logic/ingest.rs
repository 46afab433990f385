//! Telemetry intake
//!
//! Reads the newline-delimited JSON stream from the native producer over a
//! local TCP transport and hands complete messages to the pipeline through
//! a watch channel: capacity one, newest wins. If the pipeline is still on
//! the previous tick, an arriving message displaces any older pending one,
//! so the detector never falls arbitrarily behind.
//!
//! Malformed lines and out-of-order messages are dropped here and counted;
//! the pipeline folds the counters into one audit entry per tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::types::TelemetryMessage;

// ============================================================================
// DROP ACCOUNTING
// ============================================================================

/// Messages dropped at intake since the last drain.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropCounters {
    pub malformed: u64,
    pub out_of_order: u64,
}

impl DropCounters {
    pub fn total(&self) -> u64 {
        self.malformed + self.out_of_order
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    malformed: AtomicU64,
    out_of_order: AtomicU64,
}

impl IngestStats {
    pub fn note_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    /// Take and reset the counters; called once per tick by the pipeline.
    pub fn drain(&self) -> DropCounters {
        DropCounters {
            malformed: self.malformed.swap(0, Ordering::Relaxed),
            out_of_order: self.out_of_order.swap(0, Ordering::Relaxed),
        }
    }
}

// ============================================================================
// LISTENER
// ============================================================================

/// Accept producer connections and consume them one at a time until
/// shutdown. Reconnects resume with the same monotonicity cursor, so a
/// producer restart cannot replay old messages.
pub async fn run_listener(
    addr: String,
    tx: watch::Sender<Option<Arc<TelemetryMessage>>>,
    stats: Arc<IngestStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Cannot bind telemetry ingress on {}: {}", addr, e);
            return;
        }
    };
    log::info!("Telemetry ingress listening on {}", addr);

    let mut last_timestamp = i64::MIN;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        log::info!("Telemetry producer connected from {}", peer);
                        consume_stream(stream, &tx, &stats, &mut last_timestamp, &mut shutdown).await;
                        log::info!("Telemetry producer disconnected");
                    }
                    Err(e) => log::warn!("Telemetry accept failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    log::info!("Telemetry ingress stopped");
}

/// Read one producer stream line by line. Returns on EOF, read error or
/// shutdown.
pub async fn consume_stream<R: AsyncRead + Unpin>(
    stream: R,
    tx: &watch::Sender<Option<Arc<TelemetryMessage>>>,
    stats: &IngestStats,
    last_timestamp: &mut i64,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<TelemetryMessage>(&line) {
                            Ok(msg) => {
                                if msg.timestamp < *last_timestamp {
                                    stats.note_out_of_order();
                                    continue;
                                }
                                *last_timestamp = msg.timestamp;
                                let _ = tx.send(Some(Arc::new(msg)));
                            }
                            Err(e) => {
                                stats.note_malformed();
                                log::debug!("Dropped malformed telemetry line: {}", e);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Telemetry read error: {}", e);
                        break;
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
}

//! HTTP routes and handlers
//!
//! Snapshot reads come straight off the publisher and never contend with
//! the pipeline; command posts take the coarse state lock briefly.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::constants;
use crate::logic::audit::AuditEvent;
use crate::logic::guardian::{
    ActivePrompt, CommandResponse, Guardian, GuardianCommand, GuardianStatistics,
};
use crate::logic::memory::MemoryListing;
use crate::logic::snapshot::{GuardianSnapshot, SnapshotPublisher};

// ============================================================================
// STATE
// ============================================================================

#[derive(Clone)]
pub struct ApiState {
    pub guardian: Arc<Mutex<Guardian>>,
    pub publisher: Arc<SnapshotPublisher>,
}

/// Build the router with all routes.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/status/wait", get(wait_status))
        .route("/api/v1/audit", get(get_audit))
        .route("/api/v1/statistics", get(get_statistics))
        .route("/api/v1/prompts", get(get_prompts))
        .route("/api/v1/memory", get(get_memory))
        .route("/api/v1/command", post(post_command))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: constants::APP_VERSION,
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// Latest published snapshot.
async fn get_status(State(state): State<ApiState>) -> Json<GuardianSnapshot> {
    Json((*state.publisher.get()).clone())
}

#[derive(Debug, Deserialize)]
struct WaitQuery {
    timeout_ms: Option<u64>,
}

/// Long-poll variant: block until the next tick publishes, falling back
/// to the latest snapshot when the timeout expires.
async fn wait_status(
    State(state): State<ApiState>,
    Query(query): Query<WaitQuery>,
) -> Json<GuardianSnapshot> {
    let timeout = std::time::Duration::from_millis(query.timeout_ms.unwrap_or(5_000).min(30_000));
    let snapshot = state.publisher.wait_for_update(timeout).await;
    Json((*snapshot).clone())
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    process: Option<String>,
    limit: Option<usize>,
}

/// Recent audit events, optionally filtered by process name.
async fn get_audit(
    State(state): State<ApiState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEvent>> {
    let limit = query.limit.unwrap_or(100).min(constants::AUDIT_MAX_EVENTS);
    let events = {
        let guardian = state.guardian.lock();
        guardian.audit_history(query.process.as_deref(), limit)
    };
    Json(events)
}

/// Engine counters for diagnostics.
async fn get_statistics(State(state): State<ApiState>) -> Json<GuardianStatistics> {
    let statistics = {
        let guardian = state.guardian.lock();
        guardian.statistics()
    };
    Json(statistics)
}

/// Confirmation prompts awaiting a user decision.
async fn get_prompts(State(state): State<ApiState>) -> Json<Vec<ActivePrompt>> {
    let prompts = {
        let guardian = state.guardian.lock();
        guardian.active_prompts()
    };
    Json(prompts)
}

/// The remembered trusted / dangerous / ignored name sets.
async fn get_memory(State(state): State<ApiState>) -> Json<MemoryListing> {
    let listing = {
        let guardian = state.guardian.lock();
        guardian.memory.listing()
    };
    Json(listing)
}

/// Control surface: reset, trust/danger/ignore marks, prompt decisions.
async fn post_command(
    State(state): State<ApiState>,
    Json(command): Json<GuardianCommand>,
) -> (StatusCode, Json<CommandResponse>) {
    let outcome = {
        let mut guardian = state.guardian.lock();
        guardian.handle_command(command)
    };
    if let Some(snapshot) = outcome.snapshot {
        state.publisher.publish(snapshot);
    }
    let status = if outcome.response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(outcome.response))
}

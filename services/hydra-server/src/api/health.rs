//! Health check and controller status endpoints.
//!
//! Probes are used by the orchestrator; `/leader` and `/allocatable` report
//! what this replica sees of the election and of cluster capacity.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use hydra_election::ElectionState;
use hydra_quota::{AllocatableSummary, AllocatableUsage};
use serde::Serialize;

use crate::state::AppState;

const SERVICE: &str = "hydra-server";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,

    pub service: String,

    pub version: String,

    /// RFC 3339.
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentHealth {
    pub database: ComponentStatus,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// "ok", "disabled" or "unavailable".
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What this replica knows about the election.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct LeaderResponse {
    pub identity: String,
    pub state: String,
    pub is_leader: bool,
    /// Last observed holder, this replica included.
    pub leader: Option<String>,
    pub term: Option<u64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
        .route("/leader", get(leader))
        .route("/allocatable", get(allocatable))
}

/// Liveness: the process is up. Dependencies are not checked.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: None,
    })
}

/// Readiness: the desired-state database answers, when one is configured.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db() {
        None => ComponentStatus {
            status: "disabled".to_string(),
            message: None,
        },
        Some(db) => match db.health_check().await {
            Ok(()) => ComponentStatus {
                status: "ok".to_string(),
                message: None,
            },
            Err(e) => ComponentStatus {
                status: "unavailable".to_string(),
                message: Some(e.to_string()),
            },
        },
    };

    let ready = database.status != "unavailable";
    let response = HealthResponse {
        status: if ready { "ok" } else { "degraded" }.to_string(),
        service: SERVICE.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: Some(ComponentHealth { database }),
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

async fn leader(State(state): State<AppState>) -> Json<LeaderResponse> {
    let election = state.election();
    let current = election.state();
    let state_name = match &current {
        // A leader past its renewal deadline is not trusted.
        ElectionState::Leader { .. } if !election.is_leader() => "unconfirmed",
        other => other.name(),
    };

    Json(LeaderResponse {
        identity: election.identity().to_string(),
        state: state_name.to_string(),
        is_leader: election.is_leader(),
        leader: election.leader(),
        term: election.leader_term(),
    })
}

async fn allocatable(
    State(state): State<AppState>,
) -> Result<Json<AllocatableSummary>, (StatusCode, String)> {
    let workloads = state
        .workloads()
        .list()
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    let usage = AllocatableUsage {
        pod_count: workloads.len() as u64,
    };
    Ok(Json(state.catalog().summarize(&usage)))
}

//! HTTP API for health checks, status and superblock operations

use crate::config::ApiConfig;
use crate::error::{AgentError, AgentResult};
use crate::ledger::{BridgeRelay, SuperblockAction};
use crate::scheduler::{SchedulerStatus, TaskReport};
use crate::superblock::SuperblockChain;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ethers::types::H256;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SchedulerStatus>,
    pub chain: Arc<SuperblockChain>,
    /// Follows the unlock checkpoint when the operator role is enabled
    pub checkpoint: Option<watch::Receiver<u64>>,
    /// Ledger access for manual superblock operations
    pub relay: Option<Arc<dyn BridgeRelay>>,
    pub started: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/superblocks", get(get_superblocks))
        .route("/superblocks/:id/:action", post(superblock_action))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> AgentResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AgentError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get agent status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        checkpoint: state.checkpoint.as_ref().map(|rx| *rx.borrow()),
        superblocks: state.chain.len(),
        tip_superblock: state.chain.tip().map(|sb| sb.id),
        tasks: state
            .scheduler
            .reports()
            .into_iter()
            .map(|(name, report)| TaskStatus { name, report })
            .collect(),
    })
}

/// Local superblocks with their contract-reported status
async fn get_superblocks(State(state): State<AppState>) -> impl IntoResponse {
    let superblocks = state
        .chain
        .iter()
        .map(|sb| SuperblockView {
            id: sb.id,
            parent_id: sb.parent_id,
            first_height: sb.first_height,
            last_height: sb.last_height,
            timestamp: sb.timestamp,
            status: state.chain.status(&sb.id).as_str(),
            submitter: state.chain.submitter(&sb.id).map(|a| format!("{:?}", a)),
        })
        .collect::<Vec<_>>();
    Json(superblocks)
}

/// Trigger a superblock transition on the contract
async fn superblock_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> (StatusCode, Json<ActionResponse>) {
    let failure = |code: StatusCode, message: String| {
        (
            code,
            Json(ActionResponse {
                tx_hash: None,
                error: Some(message),
            }),
        )
    };

    let relay = match &state.relay {
        Some(relay) => relay.clone(),
        None => {
            return failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "ledger access is disabled".to_string(),
            )
        }
    };
    let id: H256 = match id.parse() {
        Ok(id) => id,
        Err(e) => return failure(StatusCode::BAD_REQUEST, format!("invalid id: {}", e)),
    };
    let action: SuperblockAction = match action.parse() {
        Ok(action) => action,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match relay.superblock_action(action, id).await {
        Ok(tx_hash) => (
            StatusCode::OK,
            Json(ActionResponse {
                tx_hash: Some(tx_hash),
                error: None,
            }),
        ),
        Err(e) => {
            warn!("{} for {:?} failed: {}", action.as_str(), id, e);
            failure(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    checkpoint: Option<u64>,
    superblocks: usize,
    tip_superblock: Option<H256>,
    tasks: Vec<TaskStatus>,
}

#[derive(Serialize)]
struct TaskStatus {
    name: String,
    #[serde(flatten)]
    report: TaskReport,
}

#[derive(Serialize)]
struct SuperblockView {
    id: H256,
    parent_id: H256,
    first_height: u64,
    last_height: u64,
    timestamp: u64,
    status: &'static str,
    submitter: Option<String>,
}

#[derive(Serialize)]
struct ActionResponse {
    tx_hash: Option<H256>,
    error: Option<String>,
}

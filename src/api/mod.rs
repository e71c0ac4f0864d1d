//! Status-polling API: the request/response contract binding the session
//! driver to the operator UI.
//!
//! The UI polls `GET /status` independently of whichever operation is
//! running; `POST /start` / `POST /post` kick runs off, `POST /continue`
//! resolves the 2FA checkpoint, `POST /reset` rewinds everything. Method
//! routing answers 405 for the wrong verb on any of these.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::{error, info};

use crate::core::job_state::JobStateError;
use crate::core::types::{
    ContinueRejected, ContinueResponse, ErrorResponse, GroupsResponse, JobStatus, PostRequest,
    SessionGoal, StartFailed, StartRejected, StartResponse, StatusResponse,
};
use crate::core::AppState;
use crate::session::{SessionDriver, StartError};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/continue", post(continue_session))
        .route("/reset", post(reset))
        .route("/groups", get(groups))
        .route("/post", post(post_groups))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "group-scout",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snap = state.job.snapshot();
    Json(StatusResponse {
        status: snap.status,
        output: snap.output,
        is_running: snap.is_running,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn start(State(state): State<Arc<AppState>>) -> Response {
    info!("start requested");
    spawn_session(&state, SessionGoal::Harvest, "harvest session started")
}

async fn continue_session(State(state): State<Arc<AppState>>) -> Response {
    match state.job.resume() {
        Ok(()) => {
            info!("continue signal delivered");
            (
                StatusCode::OK,
                Json(ContinueResponse {
                    message: "continue signal delivered".to_string(),
                    status: JobStatus::Running,
                }),
            )
                .into_response()
        }
        Err(e @ JobStateError::SignalDelivery) => {
            error!("continue failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            let snap = state.job.snapshot();
            (
                StatusCode::BAD_REQUEST,
                Json(ContinueRejected {
                    error: e.to_string(),
                    status: snap.status,
                }),
            )
                .into_response()
        }
    }
}

async fn reset(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    info!("reset requested");
    state.job.reset();
    let snap = state.job.snapshot();
    Json(StatusResponse {
        status: snap.status,
        output: snap.output,
        is_running: snap.is_running,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn groups(State(state): State<Arc<AppState>>) -> Json<GroupsResponse> {
    let snap = state.job.snapshot();
    if snap.status == JobStatus::Error {
        Json(GroupsResponse {
            success: false,
            groups: Vec::new(),
            message: Some("last session ended in error — see /status output".to_string()),
        })
    } else {
        Json(GroupsResponse {
            success: true,
            groups: snap.groups,
            message: None,
        })
    }
}

async fn post_groups(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PostRequest>,
) -> Response {
    let targets = if request.groups.is_empty() {
        // No explicit selection: post to everything the last harvest found.
        state
            .job
            .snapshot()
            .groups
            .iter()
            .map(|g| g.url.clone())
            .collect()
    } else {
        request.groups
    };
    if targets.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "no groups selected and no harvested list to fall back on".to_string(),
            }),
        )
            .into_response();
    }

    let message = request
        .message
        .filter(|m| !m.trim().is_empty())
        .or_else(|| state.config.resolve_post_message());
    let Some(message) = message else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "no message provided and no default configured".to_string(),
            }),
        )
            .into_response();
    };

    info!("post requested for {} groups", targets.len());
    spawn_session(
        &state,
        SessionGoal::Post { targets, message },
        "posting session started",
    )
}

fn spawn_session(state: &Arc<AppState>, goal: SessionGoal, started: &str) -> Response {
    match SessionDriver::spawn(state.clone(), goal) {
        Ok(()) => {
            let snap = state.job.snapshot();
            (
                StatusCode::OK,
                Json(StartResponse {
                    message: started.to_string(),
                    status: snap.status,
                    output: snap.output,
                }),
            )
                .into_response()
        }
        Err(StartError::State(e)) => {
            // Echo the live run's status and output alongside the rejection.
            let snap = state.job.snapshot();
            (
                StatusCode::BAD_REQUEST,
                Json(StartRejected {
                    error: e.to_string(),
                    status: snap.status,
                    output: snap.output,
                }),
            )
                .into_response()
        }
        Err(e @ StartError::MissingCredentials) => {
            error!("session kickoff failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StartFailed {
                    error: "session kickoff failed".to_string(),
                    message: e.to_string(),
                    status: JobStatus::Error,
                }),
            )
                .into_response()
        }
    }
}

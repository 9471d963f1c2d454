//! Admin API for credential management
//!
//! Runs on a separate listener (`server.admin_addr`) and is never exposed on
//! the public port. Responses carry 1-based indices and 8-character suffixes,
//! never full secrets.
//!
//! Endpoints:
//! - `GET /admin/credentials`: status snapshot
//! - `POST /admin/credentials/rotate`: force rotation to the next usable credential
//! - `POST /admin/credentials/{index}/reset`: clear health state of one credential

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use credential_pool::CredentialPool;
use tracing::{info, warn};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<CredentialPool>,
}

impl AdminState {
    pub fn new(pool: Arc<CredentialPool>) -> Self {
        Self { pool }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/credentials", get(list_credentials))
        .route("/admin/credentials/rotate", post(rotate_credential))
        .route("/admin/credentials/{index}/reset", post(reset_credential))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /admin/credentials: aggregate counts plus one entry per credential.
async fn list_credentials(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.pool.status_snapshot().await;
    let status = snapshot.health_label();
    let mut body = serde_json::to_value(&snapshot).unwrap_or_else(|_| serde_json::json!({}));
    body["status"] = serde_json::Value::from(status);
    json_response(StatusCode::OK, body)
}

/// POST /admin/credentials/rotate: move the cursor past the current credential.
///
/// 409 when no other credential is usable.
async fn rotate_credential(State(state): State<AdminState>) -> impl IntoResponse {
    match state.pool.rotate().await {
        Ok(rotation) => {
            info!(
                previous = ?rotation.previous,
                current = rotation.current,
                "credential rotated by admin"
            );
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "rotated": true,
                    "previous": rotation.previous,
                    "previous_suffix": rotation.previous_suffix,
                    "current": rotation.current,
                    "current_suffix": rotation.current_suffix,
                }),
            )
        }
        Err(e) => {
            warn!(error = %e, "admin rotation failed");
            json_response(
                StatusCode::CONFLICT,
                serde_json::json!({ "rotated": false, "error": e.to_string() }),
            )
        }
    }
}

/// POST /admin/credentials/{index}/reset: `index` is 1-based.
async fn reset_credential(
    State(state): State<AdminState>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    match state.pool.reset(index).await {
        Ok(()) => {
            info!(credential = index, "credential reset by admin");
            json_response(
                StatusCode::OK,
                serde_json::json!({ "reset": true, "credential": index }),
            )
        }
        Err(e) => json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "reset": false, "error": e.to_string() }),
        ),
    }
}

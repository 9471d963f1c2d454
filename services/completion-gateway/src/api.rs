//! Completions endpoint
//!
//! Accepts `{messages, max_retries_per_model?, user?}`, runs one dispatch and
//! returns the structured `DispatchResult`. Exhaustion is not an HTTP error
//! from the caller's point of view: it is reported as 502 with the same body
//! shape so clients can read `error` and `attempts`.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dispatcher::Dispatcher;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use transport::Message;

use crate::metrics;

/// Inbound completion request.
#[derive(Debug, Deserialize)]
pub struct CompletionBody {
    pub messages: Vec<Message>,
    /// Per-request override of the configured attempt budget
    #[serde(default)]
    pub max_retries_per_model: Option<u32>,
    /// Caller identity, logged only
    #[serde(default)]
    pub user: Option<String>,
}

/// JSON error response: {"error":{"type":"invalid_request","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "invalid_request",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Run one dispatch for an inbound request.
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn complete(
    dispatcher: &Dispatcher,
    body: Result<Json<CompletionBody>, JsonRejection>,
    request_id: String,
) -> Response {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            warn!(error = %e, "rejected completion request body");
            metrics::record_request("completions", StatusCode::BAD_REQUEST.as_u16());
            return error_response(StatusCode::BAD_REQUEST, &e.body_text(), &request_id);
        }
    };

    if body.messages.is_empty() {
        metrics::record_request("completions", StatusCode::BAD_REQUEST.as_u16());
        return error_response(
            StatusCode::BAD_REQUEST,
            "messages must not be empty",
            &request_id,
        );
    }

    info!(
        messages = body.messages.len(),
        user = body.user.as_deref().unwrap_or("anonymous"),
        "completion requested"
    );

    let result = match body.max_retries_per_model {
        Some(n) => dispatcher.dispatch_with_retries(&body.messages, n).await,
        None => dispatcher.dispatch(&body.messages).await,
    };

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    metrics::record_request("completions", status.as_u16());

    let mut payload = serde_json::to_value(&result).unwrap_or_else(|_| serde_json::json!({}));
    payload["request_id"] = serde_json::Value::from(request_id);

    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        payload.to_string(),
    )
        .into_response()
}

//! Batch send route handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::error;

use courier_dispatch::{render_message, DispatchOptions, SendJob, TokenPair};

use super::types::{
    ErrorResponse, SendMessageRequest, SendMessageResponse, ValidatedSendRequest,
};
use super::RelayServerState;

const MISSING_FIELDS_ERROR: &str =
    "Missing required fields: users, message, accessToken, refreshToken";

pub(super) fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            error: message.to_string(),
            details: None,
        }),
    )
        .into_response()
}

fn internal_server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            error: "Internal server error".to_string(),
            details: None,
        }),
    )
        .into_response()
}

fn validate_send_request(request: &SendMessageRequest) -> Result<ValidatedSendRequest, &'static str> {
    let access_token = request
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(MISSING_FIELDS_ERROR)?;
    let refresh_token = request
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(MISSING_FIELDS_ERROR)?;
    let message = request
        .message
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .ok_or(MISSING_FIELDS_ERROR)?;
    let users_value = request.users.as_ref().ok_or(MISSING_FIELDS_ERROR)?;
    let Value::Array(entries) = users_value else {
        return Err("users must be an array of user identifiers");
    };
    if entries.is_empty() {
        return Err("users must be a non-empty array of user identifiers");
    }
    let mut users = Vec::with_capacity(entries.len());
    for entry in entries {
        let user = entry
            .as_str()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or("users must be an array of user identifiers")?;
        users.push(user.to_string());
    }
    Ok(ValidatedSendRequest {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        users,
        message: message.to_string(),
    })
}

async fn run_dispatch(
    state: Arc<RelayServerState>,
    request: SendMessageRequest,
    options: DispatchOptions,
) -> Response {
    let validated = match validate_send_request(&request) {
        Ok(validated) => validated,
        Err(message) => return bad_request(message),
    };

    let rendered = render_message(&validated.message, None, None);
    let jobs: Vec<SendJob> = validated
        .users
        .iter()
        .map(|user| SendJob::bare(user, rendered.clone()))
        .collect();
    let initial_tokens = TokenPair::new(validated.access_token, validated.refresh_token);

    // Dispatch on its own task so a panicking provider client surfaces as a
    // 500 envelope instead of a dropped connection.
    let engine = Arc::clone(&state.engine);
    let dispatched =
        tokio::spawn(async move { engine.dispatch(jobs, initial_tokens, &options).await }).await;
    match dispatched {
        Ok(result) => (StatusCode::OK, Json(SendMessageResponse::from_batch(result))).into_response(),
        Err(join_error) => {
            error!(error = %join_error, "dispatch task failed");
            internal_server_error()
        }
    }
}

pub(super) async fn handle_send_message(
    State(state): State<Arc<RelayServerState>>,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    let options = state.config.parallel_options.clone();
    run_dispatch(state, request, options).await
}

pub(super) async fn handle_send_sequential(
    State(state): State<Arc<RelayServerState>>,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    let options = state.config.sequential_options.clone();
    run_dispatch(state, request, options).await
}

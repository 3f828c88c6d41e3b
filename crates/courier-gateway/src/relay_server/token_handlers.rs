//! Token refresh and liveness route handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use super::send_handlers::bad_request;
use super::types::{ErrorResponse, RefreshTokenRequest, RefreshTokenResponse};
use super::RelayServerState;

pub(super) async fn handle_refresh_token(
    State(state): State<Arc<RelayServerState>>,
    Json(request): Json<RefreshTokenRequest>,
) -> Response {
    let Some(refresh_token) = request
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return bad_request("refreshToken is required");
    };

    match state.refresher.refresh_tokens(refresh_token).await {
        Ok(refreshed) => {
            let response = RefreshTokenResponse {
                success: true,
                access_token: refreshed.access_token,
                // The provider may not rotate the refresh token; hand the
                // caller's back so the pair stays usable.
                refresh_token: refreshed
                    .refresh_token
                    .unwrap_or_else(|| refresh_token.to_string()),
                expires_in: refreshed.expires_in_seconds,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(error) => {
            warn!(error = %error, "token refresh rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    success: false,
                    error: "Token refresh failed".to_string(),
                    details: Some(error.to_string()),
                }),
            )
                .into_response()
        }
    }
}

pub(super) async fn handle_health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

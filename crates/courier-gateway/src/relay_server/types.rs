//! Wire structs for the relay API; field names follow the original
//! camelCase contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use courier_dispatch::{AttemptOutcome, BatchResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMessageRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    // Kept as a raw value so "present but not an array" validates as a 400
    // instead of a deserialization rejection.
    #[serde(default)]
    pub users: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub(super) struct ValidatedSendRequest {
    pub access_token: String,
    pub refresh_token: String,
    pub users: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefreshTokenRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct StatsBody {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OutcomeBody {
    pub user: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TokensBody {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMessageResponse {
    pub success: bool,
    pub stats: StatsBody,
    pub details: Vec<OutcomeBody>,
    pub tokens: TokensBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefreshTokenResponse {
    pub success: bool,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl SendMessageResponse {
    /// Full per-recipient breakdown, even on partial failure.
    pub(super) fn from_batch(result: BatchResult) -> Self {
        let details = result
            .outcomes
            .into_iter()
            .map(|(user, outcome)| match outcome {
                AttemptOutcome::Success => OutcomeBody {
                    user,
                    status: "success",
                    error: None,
                },
                AttemptOutcome::SuccessAfterRefresh => OutcomeBody {
                    user,
                    status: "success_after_refresh",
                    error: None,
                },
                AttemptOutcome::Failed { error } => OutcomeBody {
                    user,
                    status: "failed",
                    error: Some(error),
                },
            })
            .collect();
        Self {
            success: true,
            stats: StatsBody {
                total: result.total,
                successful: result.successful,
                failed: result.failed,
            },
            details,
            tokens: TokensBody {
                access_token: result.tokens.access_token,
                refresh_token: result.tokens.refresh_token,
            },
        }
    }
}

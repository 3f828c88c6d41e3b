use async_trait::async_trait;
use thiserror::Error;

use crate::http_helpers::truncate_for_error;

#[derive(Debug, Error)]
/// Enumerates supported `ProviderError` values.
pub enum ProviderError {
    #[error("access token rejected: {detail}")]
    AuthExpired { detail: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// True when the failure means the current access token is stale and a
    /// refresh-and-retry cycle may recover the send.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired { .. })
    }
}

const AUTH_EXPIRY_MARKERS: [&str; 3] = ["expired", "invalid_token", "invalid token"];

/// Classifies a non-success send response into the provider error taxonomy.
///
/// This is the single place error-message sniffing is allowed: a 401/403
/// status or a body mentioning token expiry maps to `AuthExpired`, everything
/// else stays a plain status error.
pub fn classify_send_failure(status: u16, body: &str) -> ProviderError {
    let lowered = body.to_lowercase();
    let mentions_expiry = AUTH_EXPIRY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker));
    if status == 401 || status == 403 || mentions_expiry {
        return ProviderError::AuthExpired {
            detail: truncate_for_error(body, 320),
        };
    }
    ProviderError::HttpStatus {
        status,
        body: truncate_for_error(body, 800),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Token material returned by a successful refresh call.
///
/// The provider may omit a rotated refresh token; callers are responsible for
/// retaining their existing one in that case.
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<u64>,
}

#[async_trait]
/// Trait contract for outbound message delivery.
pub trait MessageSender: Send + Sync {
    async fn send_message(
        &self,
        recipient_id: &str,
        message: &str,
        access_token: &str,
    ) -> Result<(), ProviderError>;
}

#[async_trait]
/// Trait contract for exchanging a refresh token for new token material.
pub trait TokenRefresher: Send + Sync {
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_expiry_classification_matches_status_and_markers() {
        assert!(classify_send_failure(401, "nope").is_auth_expired());
        assert!(classify_send_failure(403, "forbidden").is_auth_expired());
        assert!(classify_send_failure(400, "token expired").is_auth_expired());
        assert!(classify_send_failure(400, "INVALID_TOKEN supplied").is_auth_expired());
        assert!(classify_send_failure(422, "invalid token material").is_auth_expired());
        assert!(!classify_send_failure(500, "upstream exploded").is_auth_expired());
        assert!(!classify_send_failure(404, "no such user").is_auth_expired());
    }

    #[test]
    fn status_failures_carry_status_and_body() {
        match classify_send_failure(503, "busy") {
            ProviderError::HttpStatus { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }
}

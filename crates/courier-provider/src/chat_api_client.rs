//! Reqwest-backed client for the chat provider's send and token endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::types::{
    classify_send_failure, MessageSender, ProviderError, RefreshedTokens, TokenRefresher,
};

#[derive(Debug, Clone)]
/// Connection settings for the provider client.
pub struct ChatApiClientConfig {
    pub api_base: String,
    pub auth_base: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub request_timeout_ms: u64,
}

#[derive(Clone)]
pub struct ChatApiClient {
    http: reqwest::Client,
    api_base: String,
    auth_base: String,
    client_id: String,
    scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenEndpointResponse {
    #[serde(default, alias = "accessToken")]
    access_token: Option<String>,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    expires_in: Option<u64>,
    #[serde(default, alias = "expiresInMillis")]
    expires_in_millis: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenEndpointResponse {
    fn into_refreshed_tokens(self) -> Result<RefreshedTokens, ProviderError> {
        if let Some(error) = self.error {
            let detail = self.error_description.unwrap_or(error);
            return Err(ProviderError::InvalidResponse(format!(
                "token endpoint rejected refresh: {detail}"
            )));
        }
        let access_token = self
            .access_token
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse(
                    "token endpoint response missing access_token".to_string(),
                )
            })?;
        let expires_in_seconds = self
            .expires_in
            .or(self.expires_in_millis.map(|millis| millis / 1_000));
        Ok(RefreshedTokens {
            access_token,
            refresh_token: self
                .refresh_token
                .filter(|value| !value.trim().is_empty()),
            expires_in_seconds,
        })
    }
}

impl ChatApiClient {
    pub fn new(config: ChatApiClientConfig) -> Result<Self, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("courier-relay"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            auth_base: config.auth_base.trim_end_matches('/').to_string(),
            client_id: config.client_id.trim().to_string(),
            scopes: config.scopes,
        })
    }

    /// Primary refresh path: the SDK wire shape, camelCase JSON body.
    async fn refresh_via_sdk_endpoint(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, ProviderError> {
        let response = self
            .http
            .post(format!("{}/oauth2/token", self.auth_base))
            .json(&json!({
                "clientId": self.client_id,
                "refreshToken": refresh_token,
                "grantType": "refresh_token",
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                body: crate::truncate_for_error(&body, 800),
            });
        }
        response
            .json::<TokenEndpointResponse>()
            .await?
            .into_refreshed_tokens()
    }

    /// Fallback refresh path: direct form-encoded OAuth2 token endpoint call.
    async fn refresh_via_token_endpoint(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, ProviderError> {
        let scope = self.scopes.join(" ");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        let response = self
            .http
            .post(format!("{}/developer/oauth2/token", self.auth_base))
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                body: crate::truncate_for_error(&body, 800),
            });
        }
        response
            .json::<TokenEndpointResponse>()
            .await?
            .into_refreshed_tokens()
    }
}

#[async_trait]
impl MessageSender for ChatApiClient {
    async fn send_message(
        &self,
        recipient_id: &str,
        message: &str,
        access_token: &str,
    ) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(format!("{}/users/{}/messages", self.api_base, recipient_id))
            .bearer_auth(access_token)
            .json(&json!({ "message": { "body": { "text": message } } }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_send_failure(status.as_u16(), &body))
    }
}

#[async_trait]
impl TokenRefresher for ChatApiClient {
    /// Attempts the SDK-style refresh first and falls back to the direct
    /// token endpoint on any failure. Neither path retries internally; retry
    /// policy belongs to the dispatch engine.
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError> {
        match self.refresh_via_sdk_endpoint(refresh_token).await {
            Ok(refreshed) => {
                info!("token refresh succeeded via sdk endpoint");
                Ok(refreshed)
            }
            Err(primary_error) => {
                warn!(error = %primary_error, "sdk refresh failed; trying direct token endpoint");
                match self.refresh_via_token_endpoint(refresh_token).await {
                    Ok(refreshed) => {
                        info!("token refresh succeeded via direct token endpoint");
                        Ok(refreshed)
                    }
                    Err(fallback_error) => {
                        warn!(error = %fallback_error, "direct token endpoint refresh failed");
                        Err(fallback_error)
                    }
                }
            }
        }
    }
}

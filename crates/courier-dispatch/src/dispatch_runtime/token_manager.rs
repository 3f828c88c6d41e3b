//! Shared token state for one in-flight batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use courier_core::current_unix_timestamp;
use courier_provider::{ProviderError, TokenRefresher};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Access/refresh token pair owned by one in-flight batch.
///
/// Superseded wholesale on refresh: the access and refresh tokens are always
/// updated together so a stale refresh token is never paired with a newer
/// access token from a different refresh cycle.
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_unix: Option<u64>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_unix: None,
        }
    }
}

/// Serializes refresh-then-update against the batch's single shared pair.
///
/// Every job task in a batch reads and writes this one cell; a refresh
/// triggered by one task is visible to every subsequent send in the batch.
pub struct TokenManager {
    refresher: Arc<dyn TokenRefresher>,
    cell: Mutex<TokenPair>,
}

impl TokenManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>, initial: TokenPair) -> Self {
        Self {
            refresher,
            cell: Mutex::new(initial),
        }
    }

    pub async fn current_access_token(&self) -> String {
        self.cell.lock().await.access_token.clone()
    }

    /// Exchanges the shared refresh token for a new pair after a send was
    /// rejected with `stale_access_token`.
    ///
    /// Holding the cell lock across the refresh call makes the
    /// refresh-then-update sequence atomic: two tasks that fail on the same
    /// stale token cannot race two refreshes, and the loser simply adopts the
    /// pair the winner installed. A refresh response without a rotated
    /// refresh token retains the current one.
    pub async fn refresh_after_auth_failure(
        &self,
        stale_access_token: &str,
    ) -> Result<String, ProviderError> {
        let mut guard = self.cell.lock().await;
        if guard.access_token != stale_access_token {
            return Ok(guard.access_token.clone());
        }
        let refreshed = self.refresher.refresh_tokens(&guard.refresh_token).await?;
        let refresh_token = refreshed
            .refresh_token
            .unwrap_or_else(|| guard.refresh_token.clone());
        *guard = TokenPair {
            access_token: refreshed.access_token,
            refresh_token,
            expires_unix: refreshed
                .expires_in_seconds
                .map(|seconds| current_unix_timestamp().saturating_add(seconds)),
        };
        info!("shared token pair replaced after refresh");
        Ok(guard.access_token.clone())
    }

    pub async fn final_tokens(&self) -> TokenPair {
        self.cell.lock().await.clone()
    }
}

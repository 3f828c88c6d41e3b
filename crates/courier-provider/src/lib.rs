//! Chat-provider HTTP client: message delivery and OAuth2 token refresh.
//!
//! Everything that knows the provider's wire format lives here, including the
//! classification of send failures into a distinguished auth-expiry error so
//! callers never have to sniff error strings themselves.

pub mod chat_api_client;
pub mod http_helpers;
pub mod types;

pub use chat_api_client::{ChatApiClient, ChatApiClientConfig};
pub use http_helpers::{is_retryable_transport_error, truncate_for_error};
pub use types::{
    classify_send_failure, MessageSender, ProviderError, RefreshedTokens, TokenRefresher,
};

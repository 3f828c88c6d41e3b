//! Endpoint constant definitions for the relay API.

pub(super) const SEND_MESSAGE_ENDPOINT: &str = "/api/send-message";
pub(super) const SEND_SEQUENTIAL_ENDPOINT: &str = "/api/send-sequential";
pub(super) const REFRESH_TOKEN_ENDPOINT: &str = "/api/refresh-token";
pub(super) const HEALTH_ENDPOINT: &str = "/health";

use clap::Parser;

use courier_dispatch::{
    BackoffPolicy, DispatchMode, DispatchOptions, DEFAULT_BACKOFF_BASE_DELAY_MS,
    DEFAULT_BATCH_SIZE, DEFAULT_INTER_BATCH_DELAY_MS, DEFAULT_INTER_SEND_DELAY_MS,
    DEFAULT_MAX_ATTEMPTS,
};
use courier_provider::ChatApiClientConfig;

#[derive(Debug, Parser)]
#[command(
    name = "courier-server",
    about = "Message dispatch relay for chat provider APIs",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "COURIER_BIND",
        default_value = "127.0.0.1:3000",
        help = "Socket address the relay API listens on"
    )]
    pub bind: String,

    #[arg(
        long = "api-base",
        env = "COURIER_API_BASE",
        help = "Base URL for the provider messaging API"
    )]
    pub api_base: String,

    #[arg(
        long = "auth-base",
        env = "COURIER_AUTH_BASE",
        help = "Base URL for the provider OAuth2 endpoints"
    )]
    pub auth_base: String,

    #[arg(
        long = "client-id",
        env = "COURIER_CLIENT_ID",
        help = "OAuth2 client id registered with the provider"
    )]
    pub client_id: String,

    #[arg(
        long,
        env = "COURIER_SCOPES",
        value_delimiter = ',',
        default_value = "send_chat_message",
        help = "OAuth2 scopes requested on token refresh, comma separated"
    )]
    pub scopes: Vec<String>,

    #[arg(
        long = "request-timeout-ms",
        env = "COURIER_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        help = "Per-request timeout for provider HTTP calls in milliseconds"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "batch-size",
        env = "COURIER_BATCH_SIZE",
        default_value_t = DEFAULT_BATCH_SIZE,
        help = "Number of recipients dispatched concurrently per batch"
    )]
    pub batch_size: usize,

    #[arg(
        long = "inter-send-delay-ms",
        env = "COURIER_INTER_SEND_DELAY_MS",
        default_value_t = DEFAULT_INTER_SEND_DELAY_MS,
        help = "Pause between consecutive sends in sequential mode, milliseconds"
    )]
    pub inter_send_delay_ms: u64,

    #[arg(
        long = "inter-batch-delay-ms",
        env = "COURIER_INTER_BATCH_DELAY_MS",
        default_value_t = DEFAULT_INTER_BATCH_DELAY_MS,
        help = "Pause between batches in parallel mode, milliseconds"
    )]
    pub inter_batch_delay_ms: u64,

    #[arg(
        long = "max-attempts",
        env = "COURIER_MAX_ATTEMPTS",
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        help = "Send attempts per recipient before the outcome is recorded as failed"
    )]
    pub max_attempts: usize,

    #[arg(
        long = "backoff-base-delay-ms",
        env = "COURIER_BACKOFF_BASE_DELAY_MS",
        default_value_t = DEFAULT_BACKOFF_BASE_DELAY_MS,
        help = "Base delay for exponential retry backoff, milliseconds"
    )]
    pub backoff_base_delay_ms: u64,
}

impl Cli {
    pub fn provider_config(&self) -> ChatApiClientConfig {
        ChatApiClientConfig {
            api_base: self.api_base.trim_end_matches('/').to_string(),
            auth_base: self.auth_base.trim_end_matches('/').to_string(),
            client_id: self.client_id.clone(),
            scopes: self.scopes.clone(),
            request_timeout_ms: self.request_timeout_ms,
        }
    }

    pub fn parallel_options(&self) -> DispatchOptions {
        DispatchOptions {
            mode: DispatchMode::BatchedParallel,
            batch_size: self.batch_size.max(1),
            inter_send_delay_ms: self.inter_send_delay_ms,
            inter_batch_delay_ms: self.inter_batch_delay_ms,
            max_attempts: Some(self.max_attempts.max(1)),
            backoff: BackoffPolicy::Exponential,
            backoff_base_delay_ms: self.backoff_base_delay_ms,
        }
    }

    /// Sequential mode keeps retrying each recipient until the send lands,
    /// refreshing tokens between attempts.
    pub fn sequential_options(&self) -> DispatchOptions {
        DispatchOptions {
            mode: DispatchMode::Sequential,
            batch_size: 1,
            inter_send_delay_ms: self.inter_send_delay_ms,
            inter_batch_delay_ms: 0,
            max_attempts: None,
            backoff: BackoffPolicy::Fixed,
            backoff_base_delay_ms: self.backoff_base_delay_ms,
        }
    }
}

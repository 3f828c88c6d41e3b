//! Dispatch engine crate for the Courier message relay.
//!
//! Drives queued send jobs through the send / detect-auth-failure /
//! refresh-token / retry / record-outcome protocol under the configured
//! concurrency and rate-limit policy.

pub mod dispatch_runtime;

pub use dispatch_runtime::{
    build_send_jobs, render_message, AttemptOutcome, BackoffPolicy, BatchResult, DispatchEngine,
    DispatchMode, DispatchOptions, DispatchStatus, JobPoller, JobPollerConfig, JobSource,
    NullResultSink, PendingDispatch, PollCycleReport, Recipient, ResultSink, SendJob,
    TokenManager, TokenPair, DEFAULT_BACKOFF_BASE_DELAY_MS, DEFAULT_BATCH_SIZE,
    DEFAULT_INTER_BATCH_DELAY_MS, DEFAULT_INTER_SEND_DELAY_MS, DEFAULT_MAX_ATTEMPTS,
};

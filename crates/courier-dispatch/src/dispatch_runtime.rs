//! Dispatch runtime that drives send jobs through the send-refresh-retry
//! protocol and aggregates per-recipient outcomes.

use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use courier_provider::{
    is_retryable_transport_error, MessageSender, ProviderError, TokenRefresher,
};

mod backoff;
mod job_store;
mod render_helpers;
mod token_manager;
#[cfg(test)]
mod tests;

pub use backoff::{apply_retry_delay, retry_delay_ms, BackoffPolicy};
pub use job_store::{
    JobPoller, JobPollerConfig, JobSource, NullResultSink, PendingDispatch, PollCycleReport,
    Recipient, ResultSink,
};
pub use render_helpers::{build_send_jobs, render_message};
pub use token_manager::{TokenManager, TokenPair};

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_INTER_SEND_DELAY_MS: u64 = 900;
pub const DEFAULT_INTER_BATCH_DELAY_MS: u64 = 1_500;
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BACKOFF_BASE_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
/// A single rendered send request, consumed exactly once per dispatch call.
pub struct SendJob {
    pub recipient_id: String,
    pub rendered_message: String,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub message_id: Option<String>,
    pub list_id: Option<String>,
    pub user_ref: Option<String>,
}

impl SendJob {
    /// Minimal job for callers that already hold a rendered message, such as
    /// the HTTP façade where recipients arrive as bare identifiers.
    pub fn bare(recipient_id: impl Into<String>, rendered_message: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            rendered_message: rendered_message.into(),
            full_name: None,
            username: None,
            message_id: None,
            list_id: None,
            user_ref: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
/// Terminal outcome of one job after internal retries settle.
pub enum AttemptOutcome {
    Success,
    SuccessAfterRefresh,
    Failed { error: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessAfterRefresh)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SuccessAfterRefresh => "success_after_refresh",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Lifecycle states for external job-queue accounting.
pub enum DispatchStatus {
    Pending,
    Dispatching,
    Completed,
    Failed,
    Incomplete,
}

impl DispatchStatus {
    /// Terminal status for a finished batch: `Completed` iff zero failures,
    /// `Failed` iff zero successes, `Incomplete` otherwise.
    pub fn from_counts(successful: usize, failed: usize) -> Self {
        if failed == 0 {
            Self::Completed
        } else if successful == 0 {
            Self::Failed
        } else {
            Self::Incomplete
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Dispatching => "DISPATCHING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Incomplete => "INCOMPLETE",
        }
    }
}

#[derive(Debug, Clone)]
/// Aggregated result of one dispatch call; outcomes preserve submission order.
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: Vec<(String, AttemptOutcome)>,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported execution modes.
pub enum DispatchMode {
    Sequential,
    BatchedParallel,
}

#[derive(Debug, Clone)]
/// Policy surface of the engine. Both supported modes are expressed through
/// these fields rather than separate code paths.
pub struct DispatchOptions {
    pub mode: DispatchMode,
    pub batch_size: usize,
    pub inter_send_delay_ms: u64,
    pub inter_batch_delay_ms: u64,
    /// `None` means unbounded retry until success (strict sequential mode);
    /// unbounded jobs also refresh tokens after every failure, not only
    /// auth-expiry ones.
    pub max_attempts: Option<usize>,
    pub backoff: BackoffPolicy,
    pub backoff_base_delay_ms: u64,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::batched_parallel()
    }
}

impl DispatchOptions {
    /// Bounded-retry parallel dispatch in fixed-size batches.
    pub fn batched_parallel() -> Self {
        Self {
            mode: DispatchMode::BatchedParallel,
            batch_size: DEFAULT_BATCH_SIZE,
            inter_send_delay_ms: DEFAULT_INTER_SEND_DELAY_MS,
            inter_batch_delay_ms: DEFAULT_INTER_BATCH_DELAY_MS,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            backoff: BackoffPolicy::Exponential,
            backoff_base_delay_ms: DEFAULT_BACKOFF_BASE_DELAY_MS,
        }
    }

    /// One job at a time, in input order, retrying each job until it lands.
    pub fn sequential_strict() -> Self {
        Self {
            mode: DispatchMode::Sequential,
            batch_size: 1,
            inter_send_delay_ms: DEFAULT_INTER_SEND_DELAY_MS,
            inter_batch_delay_ms: DEFAULT_INTER_BATCH_DELAY_MS,
            max_attempts: None,
            backoff: BackoffPolicy::Fixed,
            backoff_base_delay_ms: DEFAULT_BACKOFF_BASE_DELAY_MS,
        }
    }
}

/// Drives batches of send jobs against the provider while coordinating one
/// shared token pair across every job in the batch.
pub struct DispatchEngine {
    sender: Arc<dyn MessageSender>,
    refresher: Arc<dyn TokenRefresher>,
    sink: Arc<dyn ResultSink>,
}

impl DispatchEngine {
    pub fn new(sender: Arc<dyn MessageSender>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            sender,
            refresher,
            sink: Arc::new(NullResultSink),
        }
    }

    /// Replaces the per-job outcome sink; the default sink discards records.
    pub fn with_result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Processes `jobs` under `options` and returns outcomes in submission
    /// order together with the final shared token pair.
    pub async fn dispatch(
        &self,
        jobs: Vec<SendJob>,
        initial_tokens: TokenPair,
        options: &DispatchOptions,
    ) -> BatchResult {
        let token_manager = TokenManager::new(Arc::clone(&self.refresher), initial_tokens);
        let total = jobs.len();
        info!(total, mode = ?options.mode, "dispatch started");

        let outcomes = match options.mode {
            DispatchMode::Sequential => self.run_sequential(&jobs, &token_manager, options).await,
            DispatchMode::BatchedParallel => {
                self.run_batched_parallel(&jobs, &token_manager, options).await
            }
        };

        let successful = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_success())
            .count();
        let failed = total - successful;
        info!(total, successful, failed, "dispatch finished");

        BatchResult {
            total,
            successful,
            failed,
            outcomes,
            tokens: token_manager.final_tokens().await,
        }
    }

    async fn run_sequential(
        &self,
        jobs: &[SendJob],
        token_manager: &TokenManager,
        options: &DispatchOptions,
    ) -> Vec<(String, AttemptOutcome)> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for (index, job) in jobs.iter().enumerate() {
            let outcome = self.run_job_protocol(job, token_manager, options).await;
            self.record_outcome(job, &outcome).await;
            outcomes.push((job.recipient_id.clone(), outcome));
            let is_last = index + 1 == jobs.len();
            if !is_last && options.inter_send_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(options.inter_send_delay_ms)).await;
            }
        }
        outcomes
    }

    async fn run_batched_parallel(
        &self,
        jobs: &[SendJob],
        token_manager: &TokenManager,
        options: &DispatchOptions,
    ) -> Vec<(String, AttemptOutcome)> {
        let batch_size = options.batch_size.max(1);
        let mut outcomes = Vec::with_capacity(jobs.len());
        for (batch_index, batch) in jobs.chunks(batch_size).enumerate() {
            if batch_index > 0 && options.inter_batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(options.inter_batch_delay_ms)).await;
            }
            // Rendezvous barrier: all jobs in the batch settle before the
            // next batch starts, and join_all preserves submission order.
            let batch_outcomes = join_all(
                batch
                    .iter()
                    .map(|job| self.run_job_protocol(job, token_manager, options)),
            )
            .await;
            for (job, outcome) in batch.iter().zip(batch_outcomes) {
                self.record_outcome(job, &outcome).await;
                outcomes.push((job.recipient_id.clone(), outcome));
            }
        }
        outcomes
    }

    /// Shared per-job send protocol.
    ///
    /// Each attempt sends with the current shared access token. Auth-expiry
    /// failures trigger a coordinated refresh through the shared token cell;
    /// unbounded jobs refresh after any failure. A refresh failure is
    /// terminal for bounded jobs. The recorded failure reason is always the
    /// last send error, never the refresh's.
    async fn run_job_protocol(
        &self,
        job: &SendJob,
        token_manager: &TokenManager,
        options: &DispatchOptions,
    ) -> AttemptOutcome {
        let refresh_on_any_failure = options.max_attempts.is_none();
        let mut attempt = 0_usize;
        let mut refreshed = false;
        loop {
            attempt = attempt.saturating_add(1);
            let access_token = token_manager.current_access_token().await;
            let error = match self
                .sender
                .send_message(&job.recipient_id, &job.rendered_message, &access_token)
                .await
            {
                Ok(()) => {
                    info!(recipient = %job.recipient_id, attempt, "message sent");
                    return if refreshed {
                        AttemptOutcome::SuccessAfterRefresh
                    } else {
                        AttemptOutcome::Success
                    };
                }
                Err(error) => error,
            };

            let transient = match &error {
                ProviderError::Http(http_error) => is_retryable_transport_error(http_error),
                _ => false,
            };
            warn!(
                recipient = %job.recipient_id,
                attempt,
                transient,
                error = %error,
                "send failed"
            );
            let last_error = error.to_string();

            if error.is_auth_expired() || refresh_on_any_failure {
                match token_manager.refresh_after_auth_failure(&access_token).await {
                    Ok(_) => {
                        refreshed = true;
                    }
                    Err(refresh_error) => {
                        warn!(
                            recipient = %job.recipient_id,
                            error = %refresh_error,
                            "token refresh failed"
                        );
                        if options.max_attempts.is_some() {
                            return AttemptOutcome::Failed { error: last_error };
                        }
                    }
                }
            }

            if let Some(max_attempts) = options.max_attempts {
                if attempt >= max_attempts.max(1) {
                    return AttemptOutcome::Failed { error: last_error };
                }
            }
            apply_retry_delay(options.backoff, options.backoff_base_delay_ms, attempt).await;
        }
    }

    async fn record_outcome(&self, job: &SendJob, outcome: &AttemptOutcome) {
        if let Err(error) = self.sink.record_outcome(job, outcome).await {
            warn!(recipient = %job.recipient_id, error = %error, "result sink write failed");
        }
    }
}

//! External job-queue collaborators and the background poll loop.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    build_send_jobs, AttemptOutcome, DispatchEngine, DispatchOptions, DispatchStatus, SendJob,
    TokenPair,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One recipient entry from a queued dispatch.
pub struct Recipient {
    pub recipient_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub user_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// A pending dispatch fetched from the external job queue.
pub struct PendingDispatch {
    pub message_id: String,
    #[serde(default)]
    pub list_id: Option<String>,
    pub template: String,
    pub tokens: TokenPair,
    pub recipients: Vec<Recipient>,
}

#[async_trait]
/// Trait contract for fetching queued dispatch work.
pub trait JobSource: Send + Sync {
    async fn fetch_pending(&self) -> Result<Vec<PendingDispatch>>;
}

#[async_trait]
/// Trait contract for persisting per-recipient outcomes and batch accounting.
pub trait ResultSink: Send + Sync {
    async fn record_outcome(&self, job: &SendJob, outcome: &AttemptOutcome) -> Result<()>;
    async fn set_status(&self, message_id: &str, status: DispatchStatus) -> Result<()>;
    async fn add_dispatched(&self, message_id: &str, count: u64) -> Result<()>;
}

/// Sink that discards every record; used where no job-queue store is wired,
/// such as the HTTP façade path.
pub struct NullResultSink;

#[async_trait]
impl ResultSink for NullResultSink {
    async fn record_outcome(&self, _job: &SendJob, _outcome: &AttemptOutcome) -> Result<()> {
        Ok(())
    }

    async fn set_status(&self, _message_id: &str, _status: DispatchStatus) -> Result<()> {
        Ok(())
    }

    async fn add_dispatched(&self, _message_id: &str, _count: u64) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Poll loop settings.
pub struct JobPollerConfig {
    pub poll_interval: Duration,
    pub options: DispatchOptions,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
/// Summary of one fetch-and-dispatch cycle.
pub struct PollCycleReport {
    pub skipped: bool,
    pub fetched: usize,
    pub dispatched: usize,
}

/// Recurring fetch-and-dispatch task over an external job queue.
///
/// At most one cycle runs at a time: a tick that lands while a cycle is in
/// flight is skipped, not queued.
pub struct JobPoller {
    engine: Arc<DispatchEngine>,
    source: Arc<dyn JobSource>,
    sink: Arc<dyn ResultSink>,
    config: JobPollerConfig,
    in_flight: AtomicBool,
}

impl JobPoller {
    pub fn new(
        engine: Arc<DispatchEngine>,
        source: Arc<dyn JobSource>,
        sink: Arc<dyn ResultSink>,
        config: JobPollerConfig,
    ) -> Self {
        Self {
            engine,
            source,
            sink,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Spawns the recurring poll task. The task runs until the handle is
    /// aborted or the runtime shuts down.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_cycle().await {
                    Ok(report) if report.skipped => {
                        info!("poll cycle skipped; previous cycle still running");
                    }
                    Ok(report) => {
                        if report.fetched > 0 {
                            info!(
                                fetched = report.fetched,
                                dispatched = report.dispatched,
                                "poll cycle finished"
                            );
                        }
                    }
                    Err(error) => warn!(error = %error, "poll cycle failed"),
                }
            }
        })
    }

    /// Runs one fetch-and-dispatch cycle, honoring the in-flight guard.
    pub async fn run_cycle(&self) -> Result<PollCycleReport> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(PollCycleReport {
                skipped: true,
                ..PollCycleReport::default()
            });
        }
        let result = self.run_cycle_inner().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cycle_inner(&self) -> Result<PollCycleReport> {
        let pending = self.source.fetch_pending().await?;
        let mut report = PollCycleReport {
            skipped: false,
            fetched: pending.len(),
            dispatched: 0,
        };
        for dispatch in pending {
            let message_id = dispatch.message_id.clone();
            self.set_status(&message_id, DispatchStatus::Dispatching)
                .await;
            let jobs = build_send_jobs(&dispatch);
            let result = self
                .engine
                .dispatch(jobs, dispatch.tokens.clone(), &self.config.options)
                .await;
            let status = DispatchStatus::from_counts(result.successful, result.failed);
            self.set_status(&message_id, status).await;
            if result.successful > 0 {
                if let Err(error) = self
                    .sink
                    .add_dispatched(&message_id, result.successful as u64)
                    .await
                {
                    warn!(message_id = %message_id, error = %error, "dispatch count update failed");
                }
            }
            report.dispatched += 1;
        }
        Ok(report)
    }

    async fn set_status(&self, message_id: &str, status: DispatchStatus) {
        if let Err(error) = self.sink.set_status(message_id, status).await {
            warn!(
                message_id = %message_id,
                status = status.as_str(),
                error = %error,
                "status update failed"
            );
        }
    }
}

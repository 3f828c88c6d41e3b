//! Tests for dispatch engine protocol, token sharing, and poller behavior.

use std::{
    collections::HashMap,
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use courier_provider::{MessageSender, ProviderError, RefreshedTokens, TokenRefresher};

use super::{
    render_message, AttemptOutcome, BackoffPolicy, DispatchEngine, DispatchMode, DispatchOptions,
    DispatchStatus, JobPoller, JobPollerConfig, JobSource, PendingDispatch, PollCycleReport,
    Recipient, ResultSink, SendJob, TokenPair,
};

#[derive(Debug, Clone, Copy)]
enum ScriptedFailure {
    AuthExpired,
    Status(u16),
}

impl ScriptedFailure {
    fn into_error(self) -> ProviderError {
        match self {
            Self::AuthExpired => ProviderError::AuthExpired {
                detail: "token expired".to_string(),
            },
            Self::Status(status) => ProviderError::HttpStatus {
                status,
                body: "scripted failure".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct SendCallRecord {
    recipient: String,
    access_token: String,
}

#[derive(Default)]
struct ScriptedSender {
    failures: Mutex<HashMap<String, VecDeque<ScriptedFailure>>>,
    calls: Mutex<Vec<SendCallRecord>>,
    send_delay: Duration,
}

impl ScriptedSender {
    /// Makes every send yield before resolving so batched jobs genuinely
    /// overlap instead of completing within a single poll.
    fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    fn fail_next(&self, recipient: &str, failure: ScriptedFailure) {
        self.failures
            .lock()
            .expect("failures lock")
            .entry(recipient.to_string())
            .or_default()
            .push_back(failure);
    }

    fn calls(&self) -> Vec<SendCallRecord> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn calls_for(&self, recipient: &str) -> Vec<SendCallRecord> {
        self.calls()
            .into_iter()
            .filter(|record| record.recipient == recipient)
            .collect()
    }
}

#[async_trait]
impl MessageSender for ScriptedSender {
    async fn send_message(
        &self,
        recipient_id: &str,
        _message: &str,
        access_token: &str,
    ) -> Result<(), ProviderError> {
        self.calls.lock().expect("calls lock").push(SendCallRecord {
            recipient: recipient_id.to_string(),
            access_token: access_token.to_string(),
        });
        if self.send_delay > Duration::ZERO {
            tokio::time::sleep(self.send_delay).await;
        }
        let scripted = self
            .failures
            .lock()
            .expect("failures lock")
            .get_mut(recipient_id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

struct CountingRefresher {
    refresh_calls: AtomicUsize,
    fail: AtomicBool,
}

impl CountingRefresher {
    fn new() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    fn failing() -> Self {
        let refresher = Self::new();
        refresher.fail.store(true, Ordering::SeqCst);
        refresher
    }

    fn count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh_tokens(&self, _refresh_token: &str) -> Result<RefreshedTokens, ProviderError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::HttpStatus {
                status: 500,
                body: "refresh endpoint down".to_string(),
            });
        }
        Ok(RefreshedTokens {
            access_token: format!("at-{}", call + 1),
            refresh_token: Some(format!("rt-{}", call + 1)),
            expires_in_seconds: Some(3_600),
        })
    }
}

fn fast_parallel_options() -> DispatchOptions {
    DispatchOptions {
        mode: DispatchMode::BatchedParallel,
        batch_size: 5,
        inter_send_delay_ms: 0,
        inter_batch_delay_ms: 0,
        max_attempts: Some(3),
        backoff: BackoffPolicy::Fixed,
        backoff_base_delay_ms: 0,
    }
}

fn fast_sequential_strict_options() -> DispatchOptions {
    DispatchOptions {
        inter_send_delay_ms: 0,
        backoff_base_delay_ms: 0,
        ..DispatchOptions::sequential_strict()
    }
}

fn bare_jobs(recipients: &[&str]) -> Vec<SendJob> {
    recipients
        .iter()
        .map(|recipient| SendJob::bare(*recipient, "hello"))
        .collect()
}

fn initial_tokens() -> TokenPair {
    TokenPair::new("at-1", "rt-1")
}

#[tokio::test]
async fn stats_add_up_and_outcomes_preserve_submission_order() {
    let sender = Arc::new(ScriptedSender::default());
    for _ in 0..3 {
        sender.fail_next("u3", ScriptedFailure::Status(503));
    }
    let refresher = Arc::new(CountingRefresher::new());
    let engine = DispatchEngine::new(sender.clone(), refresher.clone());

    let recipients = ["u1", "u2", "u3", "u4", "u5", "u6", "u7"];
    let result = engine
        .dispatch(
            bare_jobs(&recipients),
            initial_tokens(),
            &fast_parallel_options(),
        )
        .await;

    assert_eq!(result.total, 7);
    assert_eq!(result.successful + result.failed, result.total);
    assert_eq!(result.failed, 1);
    let order: Vec<&str> = result
        .outcomes
        .iter()
        .map(|(recipient, _)| recipient.as_str())
        .collect();
    assert_eq!(order, recipients);
    match &result.outcomes[2].1 {
        AttemptOutcome::Failed { error } => assert!(error.contains("503"), "got {error}"),
        other => panic!("expected u3 failure, got {other:?}"),
    }
    // Non-auth failures never touch the refresh endpoint.
    assert_eq!(refresher.count(), 0);
}

#[tokio::test]
async fn seven_jobs_split_into_two_batches_with_one_inter_batch_delay() {
    let sender = Arc::new(ScriptedSender::default());
    let refresher = Arc::new(CountingRefresher::new());
    let engine = DispatchEngine::new(sender.clone(), refresher);

    let options = DispatchOptions {
        inter_batch_delay_ms: 120,
        ..fast_parallel_options()
    };
    let started = Instant::now();
    let result = engine
        .dispatch(
            bare_jobs(&["u1", "u2", "u3", "u4", "u5", "u6", "u7"]),
            initial_tokens(),
            &options,
        )
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result.successful, 7);
    assert_eq!(sender.calls().len(), 7);
    // One delay between the 5-job and 2-job batches, none within a batch.
    assert!(elapsed >= Duration::from_millis(120), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(240), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn auth_expiry_triggers_one_refresh_and_one_retry() {
    let sender = Arc::new(ScriptedSender::default());
    sender.fail_next("u1", ScriptedFailure::AuthExpired);
    let refresher = Arc::new(CountingRefresher::new());
    let engine = DispatchEngine::new(sender.clone(), refresher.clone());

    let result = engine
        .dispatch(bare_jobs(&["u1"]), initial_tokens(), &fast_parallel_options())
        .await;

    assert_eq!(result.outcomes[0].1, AttemptOutcome::SuccessAfterRefresh);
    assert_eq!(refresher.count(), 1);
    let calls = sender.calls_for("u1");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].access_token, "at-1");
    assert_eq!(calls[1].access_token, "at-2");
}

#[tokio::test]
async fn refreshed_tokens_are_visible_to_subsequent_sequential_sends() {
    let sender = Arc::new(ScriptedSender::default());
    sender.fail_next("u1", ScriptedFailure::AuthExpired);
    let refresher = Arc::new(CountingRefresher::new());
    let engine = DispatchEngine::new(sender.clone(), refresher.clone());

    let options = DispatchOptions {
        mode: DispatchMode::Sequential,
        ..fast_parallel_options()
    };
    let result = engine
        .dispatch(bare_jobs(&["u1", "u2"]), initial_tokens(), &options)
        .await;

    assert_eq!(result.successful, 2);
    let u2_calls = sender.calls_for("u2");
    assert_eq!(u2_calls.len(), 1);
    assert_eq!(u2_calls[0].access_token, "at-2");
    assert_eq!(result.tokens.access_token, "at-2");
    assert_eq!(result.tokens.refresh_token, "rt-2");
}

#[tokio::test]
async fn strict_sequential_retries_until_success_with_refresh_per_failure() {
    let sender = Arc::new(ScriptedSender::default());
    sender.fail_next("u1", ScriptedFailure::AuthExpired);
    sender.fail_next("u1", ScriptedFailure::AuthExpired);
    let refresher = Arc::new(CountingRefresher::new());
    let engine = DispatchEngine::new(sender.clone(), refresher.clone());

    let result = engine
        .dispatch(
            bare_jobs(&["u1"]),
            initial_tokens(),
            &fast_sequential_strict_options(),
        )
        .await;

    // Succeeds on the third send; exactly two refreshes happened before it.
    assert_eq!(result.outcomes[0].1, AttemptOutcome::SuccessAfterRefresh);
    assert_eq!(refresher.count(), 2);
    assert_eq!(sender.calls_for("u1").len(), 3);
}

#[tokio::test]
async fn strict_sequential_refreshes_on_non_auth_failures_too() {
    let sender = Arc::new(ScriptedSender::default());
    sender.fail_next("u1", ScriptedFailure::Status(500));
    let refresher = Arc::new(CountingRefresher::new());
    let engine = DispatchEngine::new(sender.clone(), refresher.clone());

    let result = engine
        .dispatch(
            bare_jobs(&["u1"]),
            initial_tokens(),
            &fast_sequential_strict_options(),
        )
        .await;

    assert_eq!(result.successful, 1);
    assert_eq!(refresher.count(), 1);
}

#[tokio::test]
async fn refresh_failure_is_terminal_for_bounded_jobs_and_batch_continues() {
    let sender = Arc::new(ScriptedSender::default());
    sender.fail_next("u1", ScriptedFailure::AuthExpired);
    let refresher = Arc::new(CountingRefresher::failing());
    let engine = DispatchEngine::new(sender.clone(), refresher.clone());

    let options = DispatchOptions {
        mode: DispatchMode::Sequential,
        ..fast_parallel_options()
    };
    let result = engine
        .dispatch(bare_jobs(&["u1", "u2"]), initial_tokens(), &options)
        .await;

    // The failed job reports the send error, not the refresh error.
    match &result.outcomes[0].1 {
        AttemptOutcome::Failed { error } => {
            assert!(error.contains("token expired"), "got {error}");
            assert!(!error.contains("refresh endpoint"), "got {error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(result.outcomes[1].1, AttemptOutcome::Success);
    assert_eq!(sender.calls_for("u1").len(), 1);
    assert_eq!(refresher.count(), 1);
}

#[tokio::test]
async fn concurrent_auth_failures_share_a_single_refresh() {
    let sender =
        Arc::new(ScriptedSender::default().with_send_delay(Duration::from_millis(10)));
    sender.fail_next("u1", ScriptedFailure::AuthExpired);
    sender.fail_next("u2", ScriptedFailure::AuthExpired);
    let refresher = Arc::new(CountingRefresher::new());
    let engine = DispatchEngine::new(sender.clone(), refresher.clone());

    let result = engine
        .dispatch(
            bare_jobs(&["u1", "u2"]),
            initial_tokens(),
            &fast_parallel_options(),
        )
        .await;

    assert_eq!(result.successful, 2);
    // Two jobs failed on the same stale token; the second observes the
    // winner's pair instead of issuing its own refresh.
    assert_eq!(refresher.count(), 1);
    assert_eq!(result.tokens.access_token, "at-2");
}

#[tokio::test]
async fn bounded_jobs_fail_after_exhausting_attempts() {
    let sender = Arc::new(ScriptedSender::default());
    for _ in 0..5 {
        sender.fail_next("u1", ScriptedFailure::Status(502));
    }
    let refresher = Arc::new(CountingRefresher::new());
    let engine = DispatchEngine::new(sender.clone(), refresher);

    let result = engine
        .dispatch(bare_jobs(&["u1"]), initial_tokens(), &fast_parallel_options())
        .await;

    assert_eq!(result.failed, 1);
    assert_eq!(sender.calls_for("u1").len(), 3);
}

#[test]
fn dispatch_status_resolution_from_counts() {
    assert_eq!(DispatchStatus::from_counts(3, 0), DispatchStatus::Completed);
    assert_eq!(DispatchStatus::from_counts(0, 3), DispatchStatus::Failed);
    assert_eq!(DispatchStatus::from_counts(2, 1), DispatchStatus::Incomplete);
    assert_eq!(DispatchStatus::from_counts(0, 0), DispatchStatus::Completed);
}

#[test]
fn render_message_substitutes_then_repairs_then_decodes() {
    let rendered = render_message(
        "Hi <fullname>, <kc_username>!",
        Some("Ada"),
        Some("ada99"),
    );
    assert_eq!(rendered, "Hi Ada, ada99!");

    let mojibake_template = "Caf\u{c3}\u{a9} news &amp; updates, <fullname>";
    let rendered = render_message(mojibake_template, Some("Ada"), None);
    assert_eq!(rendered, "Café news & updates, Ada");

    // Pure function: same inputs, same output.
    let again = render_message(mojibake_template, Some("Ada"), None);
    assert_eq!(rendered, again);
}

struct StaticJobSource {
    dispatches: Mutex<Vec<PendingDispatch>>,
    fetch_delay: Duration,
    fetches: AtomicUsize,
}

impl StaticJobSource {
    fn new(dispatches: Vec<PendingDispatch>) -> Self {
        Self {
            dispatches: Mutex::new(dispatches),
            fetch_delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }
}

#[async_trait]
impl JobSource for StaticJobSource {
    async fn fetch_pending(&self) -> Result<Vec<PendingDispatch>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fetch_delay > Duration::ZERO {
            tokio::time::sleep(self.fetch_delay).await;
        }
        Ok(std::mem::take(
            &mut *self.dispatches.lock().expect("dispatches lock"),
        ))
    }
}

#[derive(Default)]
struct RecordingSink {
    outcomes: Mutex<Vec<(String, String)>>,
    statuses: Mutex<Vec<(String, DispatchStatus)>>,
    dispatched: Mutex<Vec<(String, u64)>>,
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn record_outcome(&self, job: &SendJob, outcome: &AttemptOutcome) -> Result<()> {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .push((job.recipient_id.clone(), outcome.as_str().to_string()));
        Ok(())
    }

    async fn set_status(&self, message_id: &str, status: DispatchStatus) -> Result<()> {
        self.statuses
            .lock()
            .expect("statuses lock")
            .push((message_id.to_string(), status));
        Ok(())
    }

    async fn add_dispatched(&self, message_id: &str, count: u64) -> Result<()> {
        self.dispatched
            .lock()
            .expect("dispatched lock")
            .push((message_id.to_string(), count));
        Ok(())
    }
}

fn pending_dispatch() -> PendingDispatch {
    PendingDispatch {
        message_id: "m-1".to_string(),
        list_id: Some("l-1".to_string()),
        template: "Hi <fullname>!".to_string(),
        tokens: initial_tokens(),
        recipients: vec![
            Recipient {
                recipient_id: "u1".to_string(),
                full_name: Some("Ada".to_string()),
                username: Some("ada99".to_string()),
                user_ref: None,
            },
            Recipient {
                recipient_id: "u2".to_string(),
                full_name: None,
                username: None,
                user_ref: None,
            },
        ],
    }
}

fn poller_with(
    source: Arc<StaticJobSource>,
    sink: Arc<RecordingSink>,
    sender: Arc<ScriptedSender>,
) -> Arc<JobPoller> {
    let refresher = Arc::new(CountingRefresher::new());
    let engine = Arc::new(
        DispatchEngine::new(sender, refresher).with_result_sink(sink.clone()),
    );
    Arc::new(JobPoller::new(
        engine,
        source,
        sink,
        JobPollerConfig {
            poll_interval: Duration::from_millis(50),
            options: fast_parallel_options(),
        },
    ))
}

#[tokio::test]
async fn poll_cycle_renders_dispatches_and_records_accounting() {
    let sender = Arc::new(ScriptedSender::default());
    let source = Arc::new(StaticJobSource::new(vec![pending_dispatch()]));
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(source, sink.clone(), sender.clone());

    let report = poller.run_cycle().await.expect("cycle");
    assert_eq!(
        report,
        PollCycleReport {
            skipped: false,
            fetched: 1,
            dispatched: 1,
        }
    );

    let statuses = sink.statuses.lock().expect("statuses lock").clone();
    assert_eq!(
        statuses,
        vec![
            ("m-1".to_string(), DispatchStatus::Dispatching),
            ("m-1".to_string(), DispatchStatus::Completed),
        ]
    );
    let dispatched = sink.dispatched.lock().expect("dispatched lock").clone();
    assert_eq!(dispatched, vec![("m-1".to_string(), 2)]);
    let outcomes = sink.outcomes.lock().expect("outcomes lock").clone();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, status)| status == "success"));

    // Rendering happened before the sends: u2 has no fields, so its
    // placeholder substitutes to empty.
    let sent_to_u2 = sender.calls_for("u2");
    assert_eq!(sent_to_u2.len(), 1);
}

#[tokio::test]
async fn overlapping_poll_cycles_are_skipped_not_queued() {
    let sender = Arc::new(ScriptedSender::default());
    let source = Arc::new(
        StaticJobSource::new(Vec::new()).with_fetch_delay(Duration::from_millis(150)),
    );
    let sink = Arc::new(RecordingSink::default());
    let poller = poller_with(source.clone(), sink, sender);

    let background = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move { poller.run_cycle().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = poller.run_cycle().await.expect("cycle");
    assert!(report.skipped);

    let first = background.await.expect("join").expect("cycle");
    assert!(!first.skipped);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
}

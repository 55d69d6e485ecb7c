use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, info, warn};

use super::executor::CheckExecutor;
use super::history::History;
use super::types::{CheckKind, CheckOutcome, Interval, PublishAttempt, PublishMetric};
use crate::config::CheckConfig;
use crate::environments::{Environment, EnvironmentRegistry};
use crate::events::ContentEvent;
use crate::feeds::join_url;

/// Where the outcome of every scheduled task goes.
#[derive(Clone)]
pub struct MetricSink {
    history: Arc<History>,
    result_tx: mpsc::Sender<PublishMetric>,
}

impl MetricSink {
    pub fn new(history: Arc<History>, result_tx: mpsc::Sender<PublishMetric>) -> Self {
        Self { history, result_tx }
    }

    async fn emit(&self, metric: PublishMetric) {
        self.history.append(metric.clone()).await;
        if let Err(e) = self.result_tx.send(metric).await {
            warn!("Failed to send publish metric: {}", e);
        }
    }
}

/// Publish scheduler - runs one timed polling loop per (check, environment)
pub struct Scheduler {
    executor: Arc<CheckExecutor>,
    environments: Arc<EnvironmentRegistry>,
    checks: Arc<Vec<CheckConfig>>,
    threshold_seconds: u64,
    sink: MetricSink,
}

impl Scheduler {
    pub fn new(
        executor: Arc<CheckExecutor>,
        environments: Arc<EnvironmentRegistry>,
        checks: Vec<CheckConfig>,
        threshold_seconds: u64,
        sink: MetricSink,
    ) -> Self {
        Self { executor, environments, checks: Arc::new(checks), threshold_seconds, sink }
    }

    /// Fan a publish out to every matching check and environment.
    ///
    /// Results arrive on the metric sink. The returned handles are only
    /// needed by callers that want to wait for completion.
    pub async fn schedule(&self, event: &ContentEvent) -> Vec<tokio::task::JoinHandle<()>> {
        let checks: Vec<&CheckConfig> =
            self.checks.iter().filter(|check| check.applies_to(&event.content_type)).collect();
        if checks.is_empty() {
            debug!(uuid = %event.uuid, content_type = %event.content_type, "No checks configured for content type");
            return Vec::new();
        }

        let environments = self.environments.snapshot().await;
        if environments.is_empty() {
            if !self.environments.is_ready() {
                warn!("Environments are not loaded yet");
            }
            warn!(uuid = %event.uuid, tid = %event.transaction_id, "No environments configured, reporting publish as unmonitored");
            for check in checks {
                let attempt = attempt_for(event, check, &Environment::unmonitored(), String::new());
                self.sink.emit(attempt.fail()).await;
            }
            return Vec::new();
        }

        let mut handles = Vec::new();
        for check in checks {
            let check_interval = check_interval_secs(self.threshold_seconds, check.granularity);

            for environment in &environments {
                let Some(endpoint) = resolve_endpoint(check, environment, event) else {
                    debug!(
                        check = %check.alias,
                        environment = %environment.name,
                        "Environment has no endpoint for this check, skipping"
                    );
                    continue;
                };

                let attempt = attempt_for(event, check, environment, endpoint);
                handles.push(self.spawn_attempt(attempt, check_interval));
            }
        }

        info!(uuid = %event.uuid, tid = %event.transaction_id, tasks = handles.len(), "Scheduled publish checks");
        handles
    }

    fn spawn_attempt(&self, attempt: PublishAttempt, check_interval: u64) -> tokio::task::JoinHandle<()> {
        let executor = self.executor.clone();
        let sink = self.sink.clone();
        let threshold_seconds = self.threshold_seconds;

        tokio::spawn(async move {
            if let Some(metric) = run_attempt(&executor, attempt, check_interval, threshold_seconds).await {
                sink.emit(metric).await;
            }
        })
    }
}

/// Whole seconds between two polls.
pub fn check_interval_secs(threshold_seconds: u64, granularity: u32) -> u64 {
    (threshold_seconds / u64::from(granularity.max(1))).max(1)
}

fn attempt_for(event: &ContentEvent, check: &CheckConfig, environment: &Environment, endpoint: String) -> PublishAttempt {
    PublishAttempt {
        uuid: event.uuid,
        check: check.clone(),
        environment: environment.clone(),
        endpoint,
        transaction_id: event.transaction_id.clone(),
        publish_date: event.publish_date,
        deleted: event.deleted,
    }
}

/// URL a check polls in one environment, `None` when the environment lacks it.
pub fn resolve_endpoint(check: &CheckConfig, environment: &Environment, event: &ContentEvent) -> Option<String> {
    let base = match check.kind {
        CheckKind::Notifications => return Some(join_url(&environment.read_url, &check.endpoint)),
        CheckKind::Content | CheckKind::Identity => join_url(&environment.read_url, &check.endpoint),
        CheckKind::Storage => join_url(environment.storage_url.as_deref()?, &check.endpoint),
    };
    Some(format!("{}/{}", base.trim_end_matches('/'), event.uuid))
}

/// Poll one attempt until it finishes, is superseded or runs out of time.
///
/// Returns `None` when the attempt was ignored.
pub async fn run_attempt(
    executor: &CheckExecutor,
    attempt: PublishAttempt,
    check_interval: u64,
    threshold_seconds: u64,
) -> Option<PublishMetric> {
    let check_interval = check_interval.max(1);
    let now = Utc::now();
    let deadline_at = attempt.publish_date + chrono::Duration::seconds(threshold_seconds as i64);
    let deadline = sleep((deadline_at - now).to_std().unwrap_or(Duration::ZERO));
    tokio::pin!(deadline);

    // Seed from real elapsed time so a late start still reports the true slot.
    let elapsed_ms = (now - attempt.publish_date).num_milliseconds().max(0) as u64;
    let mut attempt_number = elapsed_ms / (check_interval * 1000) + 1;

    let cadence = Duration::from_secs(check_interval);
    let mut ticker = interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        match executor.execute_check(&attempt).await {
            CheckOutcome::Ignored => {
                info!(
                    uuid = %attempt.uuid,
                    tid = %attempt.transaction_id,
                    environment = %attempt.environment.name,
                    check = %attempt.check.alias,
                    "Publish superseded by a newer one, ignoring"
                );
                return None;
            }
            CheckOutcome::Finished => {
                let interval = Interval::for_attempt(attempt_number, check_interval);
                return Some(attempt.succeed(interval));
            }
            CheckOutcome::Pending => {}
        }

        attempt_number += 1;

        tokio::select! {
            biased;
            _ = &mut deadline => return Some(attempt.fail()),
            _ = ticker.tick() => {}
        }
    }
}

//! Logs every publish outcome, standing in for the downstream metric fan-out.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::monitoring::PublishMetric;

/// Drain the outcome channel until every sender is gone.
pub fn spawn_log_sink(mut results: mpsc::Receiver<PublishMetric>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut logged = 0;
        while let Some(metric) = results.recv().await {
            log_metric(&metric);
            logged += 1;
        }
        logged
    })
}

fn log_metric(metric: &PublishMetric) {
    let record = metric.record();
    let outcome = serde_json::to_string(&record).unwrap_or_default();

    match record.interval {
        Some(interval) if record.success => info!(
            uuid = %record.uuid,
            tid = %record.transaction_id,
            environment = %record.environment,
            check = %record.check,
            interval = %interval,
            outcome = %outcome,
            "Publish confirmed"
        ),
        _ => warn!(
            uuid = %record.uuid,
            tid = %record.transaction_id,
            environment = %record.environment,
            check = %record.check,
            endpoint = %record.endpoint,
            outcome = %outcome,
            "Publish not confirmed within the SLA"
        ),
    }
}

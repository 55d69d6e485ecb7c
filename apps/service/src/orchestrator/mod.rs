//! Orchestrator module - wires every component together
//!
//! The orchestrator is the composition root that:
//! - Owns the environment and feed registries
//! - Builds the check executor and the publish scheduler
//! - Feeds validated content events into the scheduler
//! - Drains publish outcomes into the log sink


use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::environments::{Environment, EnvironmentChanges, EnvironmentRegistry};
use crate::events::ContentEvent;
use crate::feeds::FeedRegistry;
use crate::http::{HttpCaller, ReqwestCaller};
use crate::monitoring::{CheckExecutor, History, MetricSink, PublishMetric, Scheduler};
use crate::sink::spawn_log_sink;
use crate::validation::validate_config;

/// Capacity of the outcome channel between scheduled tasks and the sink.
const RESULT_CHANNEL_CAPACITY: usize = 256;

/// Main orchestrator for the publish monitor
pub struct Orchestrator {
    config: Arc<Config>,
    environments: Arc<EnvironmentRegistry>,
    feeds: Arc<FeedRegistry>,
    scheduler: Scheduler,
    history: Arc<History>,
    result_rx: Option<mpsc::Receiver<PublishMetric>>,
}

impl Orchestrator {
    /// Create an orchestrator that talks to the network through reqwest
    pub fn new(config: Config) -> Result<Self> {
        let caller = ReqwestCaller::new(config.http.timeout_seconds, config.http.retries, &config.http.user_agent)?;
        Self::with_caller(config, Arc::new(caller))
    }

    /// Create an orchestrator on top of any HTTP capability
    pub fn with_caller(config: Config, caller: Arc<dyn HttpCaller>) -> Result<Self> {
        validate_config(&config)?;

        let environments = Arc::new(EnvironmentRegistry::new());
        let feeds = Arc::new(FeedRegistry::new(&config.checks, config.feed_settings(), caller.clone()));
        let executor = Arc::new(CheckExecutor::new(caller, feeds.clone()));

        let history = Arc::new(History::new());
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let scheduler = Scheduler::new(
            executor,
            environments.clone(),
            config.checks.clone(),
            config.threshold_seconds,
            MetricSink::new(history.clone(), result_tx),
        );

        info!(
            threshold = config.threshold_seconds,
            checks = config.checks.len(),
            environments = config.environments.len(),
            "Orchestrator initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            environments,
            feeds,
            scheduler,
            history,
            result_rx: Some(result_rx),
        })
    }

    /// Replace the environment set and bring the feeds in line with it
    pub async fn apply_environments(&self, environments: Vec<Environment>) -> EnvironmentChanges {
        let changes = self.environments.replace(environments).await;
        if changes.is_empty() {
            debug!("Environment set unchanged");
            return changes;
        }

        info!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            updated = changes.updated.len(),
            "Applying environment changes"
        );
        self.feeds.sync(&changes).await;
        changes
    }

    /// Schedule every check that applies to a publish
    pub async fn schedule(&self, event: &ContentEvent) -> Vec<JoinHandle<()>> {
        debug!(uuid = %event.uuid, tid = %event.transaction_id, content_type = %event.content_type, "Scheduling publish checks");
        self.scheduler.schedule(event).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn history(&self) -> Arc<History> {
        self.history.clone()
    }

    pub fn feeds(&self) -> Arc<FeedRegistry> {
        self.feeds.clone()
    }

    pub fn environments(&self) -> Arc<EnvironmentRegistry> {
        self.environments.clone()
    }

    /// Take the outcome receiver so the caller drains it instead of the log sink
    pub fn take_results(&mut self) -> Option<mpsc::Receiver<PublishMetric>> {
        self.result_rx.take()
    }

    /// Run until the event source closes or Ctrl+C is pressed
    ///
    /// A closed source waits for the checks already in flight. Ctrl+C
    /// abandons them.
    pub async fn run(mut self, mut events: mpsc::Receiver<ContentEvent>) -> Result<()> {
        let configured = self.config.environments.clone();
        self.apply_environments(configured).await;

        let sink = self.result_rx.take().map(spawn_log_sink);
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!("Orchestrator started - waiting for content events");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        in_flight.retain(|handle| !handle.is_finished());
                        in_flight.extend(self.schedule(&event).await);
                    }
                    None => {
                        info!(in_flight = in_flight.len(), "Event source closed, waiting for running checks");
                        futures::future::join_all(in_flight.drain(..)).await;
                        break;
                    }
                },
                _ = &mut ctrl_c => {
                    info!("Ctrl+C received, shutting down");
                    for handle in in_flight.drain(..) {
                        handle.abort();
                    }
                    break;
                }
            }
        }

        self.shutdown(sink).await
    }

    async fn shutdown(self, sink: Option<JoinHandle<usize>>) -> Result<()> {
        self.feeds.stop_all().await;

        let failures = self.history.failures().await;
        if failures > 0 {
            warn!(failures, "Recent publishes were not confirmed");
        }

        // The sink ends once the scheduler's sender is gone.
        drop(self.scheduler);
        if let Some(sink) = sink {
            let logged = sink.await?;
            info!(logged, "Publish outcomes logged");
        }

        info!("Orchestrator stopped");
        Ok(())
    }
}

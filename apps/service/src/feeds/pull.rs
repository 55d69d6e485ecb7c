//! Polling transport that walks a feed's "next" links.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::FeedCache;
use super::notification::{NotificationPage, NotificationRecord};
use super::{FeedKind, FeedSettings, FeedSpec, NotificationFeed};
use crate::environments::Credentials;
use crate::http::{CallRequest, HttpCaller};

#[derive(Debug)]
struct PullState {
    cursor: String,
    credentials: Credentials,
    connected: bool,
}

struct PullInner {
    spec: FeedSpec,
    settings: FeedSettings,
    caller: Arc<dyn HttpCaller>,
    cache: FeedCache,
    state: Mutex<PullState>,
}

impl PullInner {
    async fn poll(&self) {
        let (cursor, credentials) = {
            let state = self.state.lock().await;
            (state.cursor.clone(), state.credentials.clone())
        };

        let request = CallRequest::get(&cursor)
            .with_credentials(&credentials)
            .with_api_key(self.spec.api_key.as_deref());

        match self.fetch_page(&request).await {
            Some(page) => {
                let received = page.notifications.len();
                let next = page.next_link().map(str::to_string);
                let stored = self.cache.store(page.notifications).await;

                let mut state = self.state.lock().await;
                state.connected = true;
                if let Some(next) = next {
                    state.cursor = next;
                }
                debug!(
                    feed = %self.spec.name,
                    environment = %self.spec.environment,
                    received,
                    stored,
                    "Polled notifications page"
                );
            }
            None => {
                self.state.lock().await.connected = false;
            }
        }

        self.cache.purge(Utc::now()).await;
    }

    async fn fetch_page(&self, request: &CallRequest) -> Option<NotificationPage> {
        let response = match self.caller.do_call(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(feed = %self.spec.name, environment = %self.spec.environment, "Feed poll failed: {}", e);
                return None;
            }
        };

        if !response.is_ok() {
            warn!(
                feed = %self.spec.name,
                environment = %self.spec.environment,
                status = response.status,
                url = %request.url,
                "Feed poll returned unexpected status"
            );
            return None;
        }

        match response.json::<NotificationPage>() {
            Ok(page) => Some(page),
            Err(e) => {
                warn!(feed = %self.spec.name, environment = %self.spec.environment, "Malformed feed page: {}", e);
                None
            }
        }
    }
}

/// Feed that polls `url?since=<startup>` and follows the returned next link.
pub struct PullFeed {
    inner: Arc<PullInner>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PullFeed {
    pub fn new(spec: FeedSpec, settings: FeedSettings, caller: Arc<dyn HttpCaller>) -> Self {
        Self::starting_from(spec, settings, caller, Utc::now())
    }

    /// Build a feed whose first request asks for notifications since `since`.
    pub fn starting_from(
        spec: FeedSpec,
        settings: FeedSettings,
        caller: Arc<dyn HttpCaller>,
        since: DateTime<Utc>,
    ) -> Self {
        let cursor = initial_cursor(&spec.url, since);
        let state = PullState { cursor, credentials: spec.credentials.clone(), connected: false };
        let (stop_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(PullInner {
                cache: FeedCache::new(settings.expiry),
                spec,
                settings,
                caller,
                state: Mutex::new(state),
            }),
            stop_tx,
            task: Mutex::new(None),
        }
    }

    /// Run a single poll cycle: fetch, store, advance the cursor, purge.
    pub async fn poll_once(&self) {
        self.inner.poll().await;
    }

    /// URL the next poll will request.
    pub async fn cursor(&self) -> String {
        self.inner.state.lock().await.cursor.clone()
    }

    pub fn cache(&self) -> &FeedCache {
        &self.inner.cache
    }
}

fn initial_cursor(url: &str, since: DateTime<Utc>) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}since={}", since.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[async_trait]
impl NotificationFeed for PullFeed {
    fn feed_name(&self) -> &str {
        &self.inner.spec.name
    }

    fn environment(&self) -> &str {
        &self.inner.spec.environment
    }

    fn kind(&self) -> FeedKind {
        FeedKind::Pull
    }

    fn url(&self) -> &str {
        &self.inner.spec.url
    }

    async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        info!(feed = %inner.spec.name, environment = %inner.spec.environment, "Starting pull feed");

        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(inner.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => inner.poll().await,
                }
            }

            debug!(feed = %inner.spec.name, environment = %inner.spec.environment, "Pull feed stopped");
        }));
    }

    async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(feed = %self.inner.spec.name, "Pull feed task ended abnormally: {}", e);
            }
        }
    }

    async fn set_credentials(&self, credentials: Credentials) {
        self.inner.state.lock().await.credentials = credentials;
    }

    async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.connected
    }

    async fn notifications_for(&self, uuid: &Uuid) -> Vec<NotificationRecord> {
        self.inner.cache.notifications_for(uuid).await
    }
}

//! Streaming transport that keeps one long-lived connection open and
//! reconnects whenever it drops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::FeedCache;
use super::notification::{NotificationRecord, decode_push_frame};
use super::{FeedKind, FeedSettings, FeedSpec, NotificationFeed};
use crate::environments::Credentials;
use crate::http::{CallRequest, HttpCaller};

/// Mutable per-feed fields, all guarded by the one lock.
#[derive(Debug)]
struct PushState {
    consuming: bool,
    connected: bool,
    credentials: Credentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    /// A 200 connection was established and later ended.
    Ended,
    /// Connecting failed or the status was not 200.
    Refused,
    Stopped,
}

struct PushInner {
    spec: FeedSpec,
    settings: FeedSettings,
    caller: Arc<dyn HttpCaller>,
    cache: FeedCache,
    state: Mutex<PushState>,
}

impl PushInner {
    async fn consuming(&self) -> bool {
        self.state.lock().await.consuming
    }

    async fn set_connected(&self, connected: bool) {
        self.state.lock().await.connected = connected;
    }

    async fn run(&self, mut stop_rx: watch::Receiver<bool>) {
        let mut delay = self.settings.reconnect_delay;

        while self.consuming().await {
            let session = self.consume(&mut stop_rx).await;

            match session {
                Session::Stopped => break,
                Session::Ended => delay = self.settings.reconnect_delay,
                Session::Refused => {}
            }

            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if session == Session::Refused {
                delay = next_delay(delay, self.settings.max_reconnect_delay);
            }
        }

        self.set_connected(false).await;
    }

    async fn consume(&self, stop_rx: &mut watch::Receiver<bool>) -> Session {
        let credentials = self.state.lock().await.credentials.clone();
        let request = CallRequest::get(&self.spec.url)
            .with_credentials(&credentials)
            .with_api_key(self.spec.api_key.as_deref());

        let mut stream = match self.caller.open_stream(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(feed = %self.spec.name, environment = %self.spec.environment, "Failed to connect to push feed: {}", e);
                return Session::Refused;
            }
        };

        if stream.status != 200 {
            warn!(
                feed = %self.spec.name,
                environment = %self.spec.environment,
                status = stream.status,
                "Push feed refused the connection"
            );
            return Session::Refused;
        }

        self.set_connected(true).await;
        info!(feed = %self.spec.name, environment = %self.spec.environment, "Connected to push feed");

        let session = loop {
            if !self.consuming().await {
                break Session::Stopped;
            }
            self.cache.purge(Utc::now()).await;

            let line = tokio::select! {
                biased;
                _ = stop_rx.changed() => break Session::Stopped,
                line = stream.lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => self.handle_frame(&line).await,
                Ok(None) => {
                    info!(feed = %self.spec.name, environment = %self.spec.environment, "Push feed closed the stream");
                    break Session::Ended;
                }
                Err(e) => {
                    warn!(feed = %self.spec.name, environment = %self.spec.environment, "Push feed read failed: {}", e);
                    break Session::Ended;
                }
            }
        };

        self.set_connected(false).await;
        session
    }

    async fn handle_frame(&self, line: &str) {
        match decode_push_frame(line) {
            Ok(records) if records.is_empty() => {}
            Ok(records) => {
                let stored = self.cache.store(records).await;
                debug!(feed = %self.spec.name, environment = %self.spec.environment, stored, "Stored pushed notifications");
            }
            Err(e) => {
                warn!(feed = %self.spec.name, environment = %self.spec.environment, "Malformed push frame: {}", e);
            }
        }
    }
}

fn next_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Feed that listens on a streaming endpoint for `data: [...]` frames.
pub struct PushFeed {
    inner: Arc<PushInner>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushFeed {
    pub fn new(spec: FeedSpec, settings: FeedSettings, caller: Arc<dyn HttpCaller>) -> Self {
        let state = PushState { consuming: false, connected: false, credentials: spec.credentials.clone() };
        let (stop_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(PushInner {
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

    pub fn cache(&self) -> &FeedCache {
        &self.inner.cache
    }
}

#[async_trait]
impl NotificationFeed for PushFeed {
    fn feed_name(&self) -> &str {
        &self.inner.spec.name
    }

    fn environment(&self) -> &str {
        &self.inner.spec.environment
    }

    fn kind(&self) -> FeedKind {
        FeedKind::Push
    }

    fn url(&self) -> &str {
        &self.inner.spec.url
    }

    async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        self.inner.state.lock().await.consuming = true;
        let inner = self.inner.clone();
        let stop_rx = self.stop_tx.subscribe();
        info!(feed = %inner.spec.name, environment = %inner.spec.environment, "Starting push feed");

        *task = Some(tokio::spawn(async move {
            inner.run(stop_rx).await;
            debug!(feed = %inner.spec.name, environment = %inner.spec.environment, "Push feed stopped");
        }));
    }

    async fn stop(&self) {
        self.inner.state.lock().await.consuming = false;
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(feed = %self.inner.spec.name, "Push feed task ended abnormally: {}", e);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{ScriptedCaller, ScriptedStream};

    const FEED_URL: &str = "http://eu.example.com/content/notifications-push";
    const UUID: &str = "5d6e7f80-91a2-4b3c-8d4e-5f6a7b8c9d0e";

    fn spec() -> FeedSpec {
        FeedSpec {
            kind: FeedKind::Push,
            name: "notifications-push".to_string(),
            environment: "eu".to_string(),
            url: FEED_URL.to_string(),
            api_key: Some("push-key".to_string()),
            credentials: Credentials::default(),
        }
    }

    fn settings() -> FeedSettings {
        FeedSettings {
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(40),
            ..FeedSettings::default()
        }
    }

    fn frame(tid: &str) -> String {
        format!(
            r#"data: [{{"id":"http://www.example.com/thing/{UUID}","publishReference":"{tid}","lastModified":"{}"}}]"#,
            Utc::now().to_rfc3339()
        )
    }

    async fn wait_for<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_next_delay_is_capped() {
        let max = Duration::from_millis(40);
        assert_eq!(next_delay(Duration::from_millis(10), max), Duration::from_millis(20));
        assert_eq!(next_delay(Duration::from_millis(30), max), max);
        assert_eq!(next_delay(max, max), max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_frames_are_cached() {
        let caller = ScriptedCaller::new();
        let first = frame("tid_1");
        let second = frame("tid_2");
        caller.stream(FEED_URL, ScriptedStream::ok(&["", "data: []", first.as_str(), "", second.as_str()]).held_open());
        let feed = &PushFeed::new(spec(), settings(), Arc::new(caller.clone()));

        feed.start().await;
        let uuid = Uuid::parse_str(UUID).unwrap();
        wait_for(|| async move { feed.notifications_for(&uuid).await.len() == 2 }).await;
        assert!(feed.is_connected().await);

        let tids: Vec<String> =
            feed.notifications_for(&uuid).await.into_iter().map(|r| r.publish_reference).collect();
        assert_eq!(tids, vec!["tid_1".to_string(), "tid_2".to_string()]);
        assert!(caller.requests()[0].headers.contains(&(crate::http::API_KEY_HEADER.to_string(), "push-key".to_string())));

        feed.stop().await;
        assert!(!feed.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_refusal_and_eof() {
        let caller = ScriptedCaller::new();
        caller.stream(FEED_URL, ScriptedStream::status(503));
        caller.stream(FEED_URL, ScriptedStream::ok(&[frame("tid_1").as_str()]));
        caller.stream(FEED_URL, ScriptedStream::ok(&[frame("tid_2").as_str()]).held_open());
        let feed = &PushFeed::new(spec(), settings(), Arc::new(caller.clone()));

        feed.start().await;
        let uuid = Uuid::parse_str(UUID).unwrap();
        wait_for(|| async move { feed.notifications_for(&uuid).await.len() == 2 }).await;

        assert_eq!(caller.count(FEED_URL), 3);
        feed.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_does_not_drop_connection() {
        let caller = ScriptedCaller::new();
        caller.stream(FEED_URL, ScriptedStream::ok(&["data: {oops", frame("tid_1").as_str()]).held_open());
        let feed = &PushFeed::new(spec(), settings(), Arc::new(caller.clone()));

        feed.start().await;
        let uuid = Uuid::parse_str(UUID).unwrap();
        wait_for(|| async move { feed.notifications_for(&uuid).await.len() == 1 }).await;

        assert_eq!(caller.count(FEED_URL), 1);
        feed.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_record_does_not_drop_its_frame() {
        let caller = ScriptedCaller::new();
        let mixed = format!(
            r#"data: [{{"id":"http://www.example.com/thing/{UUID}","publishReference":"tid_1","lastModified":null}},{{"id":7}}]"#
        );
        caller.stream(FEED_URL, ScriptedStream::ok(&[mixed.as_str()]).held_open());
        let feed = &PushFeed::new(spec(), settings(), Arc::new(caller.clone()));

        feed.start().await;
        let uuid = Uuid::parse_str(UUID).unwrap();
        wait_for(|| async move { feed.notifications_for(&uuid).await.len() == 1 }).await;

        let cached = feed.notifications_for(&uuid).await;
        assert_eq!(cached[0].publish_reference, "tid_1");
        assert!(cached[0].last_modified().is_none());
        feed.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_idle_stream() {
        let caller = ScriptedCaller::new();
        caller.stream(FEED_URL, ScriptedStream::ok(&[]).held_open());
        let feed = &PushFeed::new(spec(), settings(), Arc::new(caller.clone()));

        feed.start().await;
        wait_for(|| async move { feed.is_connected().await }).await;

        tokio::time::timeout(Duration::from_secs(1), feed.stop()).await.unwrap();
        assert!(!feed.is_connected().await);
        assert_eq!(caller.count(FEED_URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_credentials_used_on_reconnect() {
        let caller = ScriptedCaller::new();
        caller.stream(FEED_URL, ScriptedStream::status(401));
        caller.stream(FEED_URL, ScriptedStream::ok(&[]).held_open());
        let feed = &PushFeed::new(spec(), settings(), Arc::new(caller.clone()));

        feed.set_credentials(Credentials::new("user", "rotated")).await;
        feed.start().await;
        wait_for(|| async move { feed.is_connected().await }).await;

        let requests = caller.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].credentials, Some(Credentials::new("user", "rotated")));
        feed.stop().await;
    }
}

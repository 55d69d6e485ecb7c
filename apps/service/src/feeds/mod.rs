//! Notification feeds: the cache and the two transports that keep it warm.
//!
//! A feed is identified by the alias of the notification check it serves and
//! the environment it reads from. Pull feeds page through a cursor, push
//! feeds hold a long-lived stream open.

pub mod cache;
pub mod notification;
pub mod pull;
pub mod push;
pub mod registry;

pub use cache::FeedCache;
pub use notification::{NotificationPage, NotificationRecord};
pub use pull::PullFeed;
pub use push::PushFeed;
pub use registry::FeedRegistry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::environments::{Credentials, Environment};
use crate::http::HttpCaller;

/// Transport style of a notification feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    #[default]
    Pull,
    Push,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Pull => write!(f, "pull"),
            FeedKind::Push => write!(f, "push"),
        }
    }
}

/// Timing knobs shared by every feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    pub poll_interval: Duration,
    pub expiry: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            expiry: Duration::from_secs(240),
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Everything needed to build one feed instance.
#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub kind: FeedKind,
    pub name: String,
    pub environment: String,
    pub url: String,
    pub api_key: Option<String>,
    pub credentials: Credentials,
}

impl FeedSpec {
    /// Feed for the check `name` reading `endpoint` on `environment`.
    pub fn for_environment(
        kind: FeedKind,
        name: &str,
        endpoint: &str,
        api_key: Option<&str>,
        environment: &Environment,
    ) -> Self {
        Self {
            kind,
            name: name.to_string(),
            environment: environment.name.clone(),
            url: join_url(&environment.read_url, endpoint),
            api_key: api_key.map(str::to_string),
            credentials: environment.credentials(),
        }
    }
}

/// Join a base URL and an endpoint path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Common surface of pull and push feeds.
#[async_trait]
pub trait NotificationFeed: Send + Sync {
    fn feed_name(&self) -> &str;

    fn environment(&self) -> &str;

    fn kind(&self) -> FeedKind;

    /// Base URL of the feed endpoint.
    fn url(&self) -> &str;

    /// Spawn the background transport. Starting twice is a no-op.
    async fn start(&self);

    /// Stop the transport and wait for its task to exit.
    async fn stop(&self);

    async fn set_credentials(&self, credentials: Credentials);

    async fn is_connected(&self) -> bool;

    async fn notifications_for(&self, uuid: &Uuid) -> Vec<NotificationRecord>;
}

/// Resolve a feed spec to its transport.
pub fn create_feed(
    spec: FeedSpec,
    settings: FeedSettings,
    caller: Arc<dyn HttpCaller>,
) -> Arc<dyn NotificationFeed> {
    match spec.kind {
        FeedKind::Pull => Arc::new(PullFeed::new(spec, settings, caller)),
        FeedKind::Push => Arc::new(PushFeed::new(spec, settings, caller)),
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::info;

use super::{FeedSettings, FeedSpec, NotificationFeed, create_feed};
use crate::config::CheckConfig;
use crate::environments::{Environment, EnvironmentChanges};
use crate::http::HttpCaller;
use crate::monitoring::types::CheckKind;

/// Feeds are addressed by check alias and environment name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey {
    pub name: String,
    pub environment: String,
}

impl FeedKey {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self { name: name.into(), environment: environment.into() }
    }
}

/// Owns one feed per (notification check, environment) pair.
pub struct FeedRegistry {
    feeds: RwLock<HashMap<FeedKey, Arc<dyn NotificationFeed>>>,
    checks: Vec<CheckConfig>,
    settings: FeedSettings,
    caller: Arc<dyn HttpCaller>,
}

impl FeedRegistry {
    /// Only notification checks get feeds, the others are ignored.
    pub fn new(checks: &[CheckConfig], settings: FeedSettings, caller: Arc<dyn HttpCaller>) -> Self {
        let checks = checks.iter().filter(|check| check.kind == CheckKind::Notifications).cloned().collect();
        Self { feeds: RwLock::new(HashMap::new()), checks, settings, caller }
    }

    fn specs_for(&self, environment: &Environment) -> Vec<FeedSpec> {
        self.checks
            .iter()
            .map(|check| {
                FeedSpec::for_environment(
                    check.feed_kind(),
                    &check.alias,
                    &check.endpoint,
                    check.api_key.as_deref(),
                    environment,
                )
            })
            .collect()
    }

    async fn launch(&self, spec: FeedSpec) {
        let key = FeedKey::new(spec.name.clone(), spec.environment.clone());
        info!(feed = %spec.name, environment = %spec.environment, kind = %spec.kind, url = %spec.url, "Creating feed");

        let feed = create_feed(spec, self.settings, self.caller.clone());
        feed.start().await;

        let previous = self.feeds.write().await.insert(key, feed);
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    /// Bring the feeds in line with an environment change.
    pub async fn sync(&self, changes: &EnvironmentChanges) {
        for environment in &changes.removed {
            let removed: Vec<Arc<dyn NotificationFeed>> = {
                let mut feeds = self.feeds.write().await;
                self.checks
                    .iter()
                    .filter_map(|check| feeds.remove(&FeedKey::new(check.alias.clone(), environment.name.clone())))
                    .collect()
            };
            for feed in removed {
                info!(feed = %feed.feed_name(), environment = %feed.environment(), "Stopping feed");
                feed.stop().await;
            }
        }

        for environment in &changes.added {
            for spec in self.specs_for(environment) {
                self.launch(spec).await;
            }
        }

        for environment in &changes.updated {
            for spec in self.specs_for(environment) {
                let existing = self.feed(&spec.name, &spec.environment).await;
                match existing {
                    Some(feed) if feed.url() == spec.url => feed.set_credentials(spec.credentials.clone()).await,
                    _ => self.launch(spec).await,
                }
            }
        }
    }

    /// Register an already built feed without starting it.
    pub async fn insert(&self, feed: Arc<dyn NotificationFeed>) {
        let key = FeedKey::new(feed.feed_name(), feed.environment());
        self.feeds.write().await.insert(key, feed);
    }

    pub async fn feed(&self, name: &str, environment: &str) -> Option<Arc<dyn NotificationFeed>> {
        self.feeds.read().await.get(&FeedKey::new(name, environment)).cloned()
    }

    /// Connection state of every feed, ordered by key.
    pub async fn connectivity(&self) -> Vec<(FeedKey, bool)> {
        let feeds: Vec<(FeedKey, Arc<dyn NotificationFeed>)> =
            self.feeds.read().await.iter().map(|(key, feed)| (key.clone(), feed.clone())).collect();

        let mut states = Vec::with_capacity(feeds.len());
        for (key, feed) in feeds {
            states.push((key, feed.is_connected().await));
        }
        states.sort();
        states
    }

    pub async fn len(&self) -> usize {
        self.feeds.read().await.len()
    }

    pub async fn stop_all(&self) {
        let feeds: Vec<Arc<dyn NotificationFeed>> = self.feeds.write().await.drain().map(|(_, feed)| feed).collect();
        join_all(feeds.iter().map(|feed| feed.stop())).await;
    }
}

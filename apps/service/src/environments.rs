//! Delivery environments the monitor polls.
//!
//! The set of environments is owned by the composition root. Schedulers and
//! checks only ever read cloned snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Basic-auth credentials for one environment.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Empty usernames mean the environment needs no authentication.
    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One read endpoint family (a region or delivery cluster).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub read_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Environment {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    /// Placeholder used for the failure metric emitted when nothing is configured.
    pub fn unmonitored() -> Self {
        Self {
            name: "none".to_string(),
            read_url: String::new(),
            storage_url: None,
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Outcome of replacing the environment set, used to keep the feeds in step.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnvironmentChanges {
    pub added: Vec<Environment>,
    pub removed: Vec<Environment>,
    pub updated: Vec<Environment>,
}

impl EnvironmentChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Registry of the currently configured environments.
#[derive(Debug, Default)]
pub struct EnvironmentRegistry {
    environments: RwLock<BTreeMap<String, Environment>>,
    ready: AtomicBool,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set and report what changed.
    pub async fn replace(&self, environments: Vec<Environment>) -> EnvironmentChanges {
        let mut next: BTreeMap<String, Environment> = BTreeMap::new();
        for environment in environments {
            next.insert(environment.name.clone(), environment);
        }

        let mut guard = self.environments.write().await;
        let mut changes = EnvironmentChanges::default();

        for (name, previous) in guard.iter() {
            match next.get(name) {
                None => changes.removed.push(previous.clone()),
                Some(current) if current != previous => changes.updated.push(current.clone()),
                Some(_) => {}
            }
        }
        for (name, current) in next.iter() {
            if !guard.contains_key(name) {
                changes.added.push(current.clone());
            }
        }

        *guard = next;
        self.ready.store(true, Ordering::Release);
        changes
    }

    /// Snapshot of every environment, ordered by name.
    pub async fn snapshot(&self) -> Vec<Environment> {
        self.environments.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.environments.read().await.len()
    }

    /// True once the environment set has been loaded at least once.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

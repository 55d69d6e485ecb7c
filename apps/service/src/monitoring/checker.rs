use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::rule::same_publish_event;
use super::types::{CheckOutcome, PublishAttempt};
use crate::feeds::FeedRegistry;
use crate::feeds::notification::lenient_text;
use crate::http::{CallRequest, CallResponse, HttpCaller};

/// Checker trait for the different endpoint families
#[async_trait]
pub trait Checker: Send + Sync {
    /// Poll once and decide whether the publish is visible yet.
    async fn check(&self, attempt: &PublishAttempt) -> CheckOutcome;
}

fn request_for(attempt: &PublishAttempt, url: &str) -> CallRequest {
    CallRequest::get(url)
        .with_credentials(&attempt.environment.credentials())
        .with_api_key(attempt.check.api_key.as_deref())
}

async fn fetch(caller: &dyn HttpCaller, attempt: &PublishAttempt, url: &str) -> Option<CallResponse> {
    match caller.do_call(&request_for(attempt, url)).await {
        Ok(response) => Some(response),
        Err(e) => {
            warn!(
                uuid = %attempt.uuid,
                tid = %attempt.transaction_id,
                environment = %attempt.environment.name,
                check = %attempt.check.alias,
                "Check request failed: {}",
                e
            );
            None
        }
    }
}

/// Deleted content is visible once the endpoint answers 404. Live content
/// needs a 200 before the body is looked at.
fn gate(attempt: &PublishAttempt, response: &CallResponse) -> Option<CheckOutcome> {
    if attempt.deleted {
        return Some(if response.status == 404 { CheckOutcome::Finished } else { CheckOutcome::Pending });
    }
    if !response.is_ok() {
        debug!(uuid = %attempt.uuid, check = %attempt.check.alias, status = response.status, "Content not available yet");
        return Some(CheckOutcome::Pending);
    }
    None
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishedContent {
    #[serde(default, deserialize_with = "lenient_text")]
    publish_reference: String,
    #[serde(default, deserialize_with = "lenient_text")]
    last_modified: String,
}

/// Fetches `endpoint + uuid` and applies the same-publish-event rule to the body.
pub struct ContentChecker {
    caller: Arc<dyn HttpCaller>,
}

impl ContentChecker {
    pub fn new(caller: Arc<dyn HttpCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl Checker for ContentChecker {
    async fn check(&self, attempt: &PublishAttempt) -> CheckOutcome {
        let Some(response) = fetch(self.caller.as_ref(), attempt, &attempt.endpoint).await else {
            return CheckOutcome::Pending;
        };
        if let Some(outcome) = gate(attempt, &response) {
            return outcome;
        }

        match response.json::<PublishedContent>() {
            Ok(content) => same_publish_event(
                &content.publish_reference,
                &content.last_modified,
                &attempt.transaction_id,
                attempt.publish_date,
            ),
            Err(e) => {
                warn!(uuid = %attempt.uuid, check = %attempt.check.alias, "Malformed content body: {}", e);
                CheckOutcome::Pending
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentifiedContent {
    uuid: String,
}

/// Fetches `endpoint + uuid` and only checks the returned UUID, for stores
/// without a reliable lastModified.
pub struct IdentityChecker {
    caller: Arc<dyn HttpCaller>,
}

impl IdentityChecker {
    pub fn new(caller: Arc<dyn HttpCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl Checker for IdentityChecker {
    async fn check(&self, attempt: &PublishAttempt) -> CheckOutcome {
        let Some(response) = fetch(self.caller.as_ref(), attempt, &attempt.endpoint).await else {
            return CheckOutcome::Pending;
        };
        if let Some(outcome) = gate(attempt, &response) {
            return outcome;
        }

        match response.json::<IdentifiedContent>() {
            Ok(content) if Uuid::parse_str(&content.uuid).ok() == Some(attempt.uuid) => CheckOutcome::Finished,
            Ok(_) => CheckOutcome::Pending,
            Err(e) => {
                warn!(uuid = %attempt.uuid, check = %attempt.check.alias, "Malformed content body: {}", e);
                CheckOutcome::Pending
            }
        }
    }
}

/// Fetches the binary from the environment's storage URL, a 200 is enough.
pub struct StorageChecker {
    caller: Arc<dyn HttpCaller>,
}

impl StorageChecker {
    pub fn new(caller: Arc<dyn HttpCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl Checker for StorageChecker {
    async fn check(&self, attempt: &PublishAttempt) -> CheckOutcome {
        let Some(response) = fetch(self.caller.as_ref(), attempt, &attempt.endpoint).await else {
            return CheckOutcome::Pending;
        };
        gate(attempt, &response).unwrap_or(CheckOutcome::Finished)
    }
}

/// Direct feed lookup, only the number of entries matters.
#[derive(Debug, Deserialize)]
struct NotificationLookup {
    #[serde(default)]
    notifications: Vec<serde_json::Value>,
}

/// Reads the cached notifications of the environment's feed.
pub struct NotificationsChecker {
    caller: Arc<dyn HttpCaller>,
    feeds: Arc<FeedRegistry>,
}

impl NotificationsChecker {
    pub fn new(caller: Arc<dyn HttpCaller>, feeds: Arc<FeedRegistry>) -> Self {
        Self { caller, feeds }
    }

    /// URL asking the feed endpoint directly for notifications of one UUID.
    pub fn lookup_url(attempt: &PublishAttempt) -> String {
        let separator = if attempt.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}id={}", attempt.endpoint, separator, attempt.uuid)
    }

    /// A deleted item the feed has never notified has nothing to wait for.
    async fn never_notified(&self, attempt: &PublishAttempt) -> bool {
        let url = Self::lookup_url(attempt);
        let Some(response) = fetch(self.caller.as_ref(), attempt, &url).await else {
            return false;
        };
        if !response.is_ok() {
            return false;
        }

        match response.json::<NotificationLookup>() {
            Ok(lookup) => lookup.notifications.is_empty(),
            Err(e) => {
                warn!(uuid = %attempt.uuid, check = %attempt.check.alias, "Malformed notifications body: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Checker for NotificationsChecker {
    async fn check(&self, attempt: &PublishAttempt) -> CheckOutcome {
        let Some(feed) = self.feeds.feed(&attempt.check.alias, &attempt.environment.name).await else {
            warn!(
                check = %attempt.check.alias,
                environment = %attempt.environment.name,
                "No feed registered for notification check"
            );
            return CheckOutcome::Pending;
        };

        for record in feed.notifications_for(&attempt.uuid).await {
            let outcome = same_publish_event(
                &record.publish_reference,
                &record.last_modified,
                &attempt.transaction_id,
                attempt.publish_date,
            );
            if outcome != CheckOutcome::Pending {
                return outcome;
            }
        }

        if attempt.deleted && self.never_notified(attempt).await {
            debug!(uuid = %attempt.uuid, environment = %attempt.environment.name, "Deleted content was never notified");
            return CheckOutcome::Ignored;
        }

        CheckOutcome::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckConfig, Config};
    use crate::environments::{Credentials, Environment};
    use crate::feeds::{FeedKind, FeedSettings, FeedSpec, NotificationRecord, PullFeed};
    use crate::http::testing::ScriptedCaller;
    use crate::monitoring::types::CheckKind;
    use chrono::{DateTime, TimeZone, Utc};

    const UUID: &str = "3a4b5c6d-7e8f-4a0b-9c1d-2e3f4a5b6c7d";
    const CONTENT_URL: &str = "http://eu.example.com/content/3a4b5c6d-7e8f-4a0b-9c1d-2e3f4a5b6c7d";
    const FEED_URL: &str = "http://eu.example.com/content/notifications";

    fn published() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    fn environment() -> Environment {
        Environment {
            name: "eu".to_string(),
            read_url: "http://eu.example.com".to_string(),
            storage_url: None,
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    fn attempt(kind: CheckKind, endpoint: &str, deleted: bool) -> PublishAttempt {
        let mut check: CheckConfig = Config::default().checks[0].clone();
        check.kind = kind;
        check.alias = kind.to_string();
        PublishAttempt {
            uuid: Uuid::parse_str(UUID).unwrap(),
            check,
            environment: environment(),
            endpoint: endpoint.to_string(),
            transaction_id: "tid_expected".to_string(),
            publish_date: published(),
            deleted,
        }
    }

    #[tokio::test]
    async fn test_content_matching_reference_finishes() {
        let caller = ScriptedCaller::new();
        caller.respond(CONTENT_URL, 200, r#"{"publishReference":"tid_expected","lastModified":""}"#);
        let checker = ContentChecker::new(Arc::new(caller.clone()));

        assert_eq!(checker.check(&attempt(CheckKind::Content, CONTENT_URL, false)).await, CheckOutcome::Finished);
        assert_eq!(caller.requests()[0].credentials, Some(Credentials::new("user", "pass")));
    }

    #[tokio::test]
    async fn test_content_unusable_last_modified_falls_back_to_reference() {
        let caller = ScriptedCaller::new();
        caller.respond(CONTENT_URL, 200, r#"{"publishReference":"tid_expected","lastModified":null}"#);
        caller.respond(CONTENT_URL, 200, r#"{"publishReference":"tid_expected","lastModified":1700000000}"#);
        caller.respond(CONTENT_URL, 200, r#"{"publishReference":null,"lastModified":null}"#);
        let checker = ContentChecker::new(Arc::new(caller));
        let attempt = attempt(CheckKind::Content, CONTENT_URL, false);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Finished);
        assert_eq!(checker.check(&attempt).await, CheckOutcome::Finished);
        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
    }

    #[tokio::test]
    async fn test_content_newer_publish_is_ignored() {
        let caller = ScriptedCaller::new();
        caller.respond(CONTENT_URL, 200, r#"{"publishReference":"tid_newer","lastModified":"2026-03-01T10:00:05Z"}"#);
        let checker = ContentChecker::new(Arc::new(caller));

        assert_eq!(checker.check(&attempt(CheckKind::Content, CONTENT_URL, false)).await, CheckOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_content_not_found_or_broken_is_pending() {
        let caller = ScriptedCaller::new();
        caller.respond(CONTENT_URL, 404, "");
        caller.respond(CONTENT_URL, 200, "<html>");
        caller.fail(CONTENT_URL, "timeout");
        let checker = ContentChecker::new(Arc::new(caller));
        let attempt = attempt(CheckKind::Content, CONTENT_URL, false);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
    }

    #[tokio::test]
    async fn test_deleted_content_finishes_on_404_regardless_of_body() {
        let caller = ScriptedCaller::new();
        caller.respond(CONTENT_URL, 200, r#"{"publishReference":"tid_expected"}"#);
        caller.respond(CONTENT_URL, 404, r#"{"publishReference":"anything"}"#);
        let checker = ContentChecker::new(Arc::new(caller));
        let attempt = attempt(CheckKind::Content, CONTENT_URL, true);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
        assert_eq!(checker.check(&attempt).await, CheckOutcome::Finished);
    }

    #[tokio::test]
    async fn test_identity_matches_uuid_only() {
        let caller = ScriptedCaller::new();
        caller.respond(CONTENT_URL, 200, r#"{"uuid":"00000000-0000-4000-8000-000000000000"}"#);
        caller.respond(CONTENT_URL, 200, &format!(r#"{{"uuid":"{UUID}","publishReference":"tid_other"}}"#));
        let checker = IdentityChecker::new(Arc::new(caller));
        let attempt = attempt(CheckKind::Identity, CONTENT_URL, false);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
        assert_eq!(checker.check(&attempt).await, CheckOutcome::Finished);
    }

    #[tokio::test]
    async fn test_storage_needs_200() {
        let url = format!("http://images.example.com/{UUID}");
        let caller = ScriptedCaller::new();
        caller.respond(&url, 403, "");
        caller.respond(&url, 200, "binary");
        let checker = StorageChecker::new(Arc::new(caller));
        let attempt = attempt(CheckKind::Storage, &url, false);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
        assert_eq!(checker.check(&attempt).await, CheckOutcome::Finished);
    }

    async fn feeds_with(records: Vec<NotificationRecord>, caller: &ScriptedCaller) -> Arc<FeedRegistry> {
        let settings = FeedSettings::default();
        let registry = Arc::new(FeedRegistry::new(&[], settings, Arc::new(caller.clone())));
        let feed = PullFeed::new(
            FeedSpec::for_environment(FeedKind::Pull, "notifications", "/content/notifications", None, &environment()),
            settings,
            Arc::new(caller.clone()),
        );
        feed.cache().store(records).await;
        registry.insert(Arc::new(feed)).await;
        registry
    }

    fn notification(tid: &str, last_modified: &str) -> NotificationRecord {
        NotificationRecord::new(format!("http://www.example.com/thing/{UUID}"), tid, last_modified)
    }

    #[tokio::test]
    async fn test_notifications_finish_on_cached_match() {
        let caller = ScriptedCaller::new();
        let feeds = feeds_with(
            vec![notification("tid_old", "2026-03-01T09:59:00Z"), notification("tid_expected", "2026-03-01T10:00:00Z")],
            &caller,
        )
        .await;
        let checker = NotificationsChecker::new(Arc::new(caller.clone()), feeds);

        assert_eq!(checker.check(&attempt(CheckKind::Notifications, FEED_URL, false)).await, CheckOutcome::Finished);
        assert!(caller.requests().is_empty());
    }

    #[tokio::test]
    async fn test_notifications_superseded_is_ignored() {
        let caller = ScriptedCaller::new();
        let feeds = feeds_with(vec![notification("tid_newer", "2026-03-01T10:01:00Z")], &caller).await;
        let checker = NotificationsChecker::new(Arc::new(caller), feeds);

        assert_eq!(checker.check(&attempt(CheckKind::Notifications, FEED_URL, false)).await, CheckOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_notifications_missing_feed_is_pending() {
        let caller = ScriptedCaller::new();
        let feeds = Arc::new(FeedRegistry::new(&[], FeedSettings::default(), Arc::new(caller.clone())));
        let checker = NotificationsChecker::new(Arc::new(caller), feeds);

        assert_eq!(checker.check(&attempt(CheckKind::Notifications, FEED_URL, true)).await, CheckOutcome::Pending);
    }

    #[tokio::test]
    async fn test_live_content_never_queries_feed_directly() {
        let caller = ScriptedCaller::new();
        let feeds = feeds_with(Vec::new(), &caller).await;
        let checker = NotificationsChecker::new(Arc::new(caller.clone()), feeds);

        assert_eq!(checker.check(&attempt(CheckKind::Notifications, FEED_URL, false)).await, CheckOutcome::Pending);
        assert!(caller.requests().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_and_never_notified_is_ignored() {
        let caller = ScriptedCaller::new();
        let attempt = attempt(CheckKind::Notifications, FEED_URL, true);
        caller.respond(&NotificationsChecker::lookup_url(&attempt), 200, r#"{"notifications":[],"links":[]}"#);
        let feeds = feeds_with(Vec::new(), &caller).await;
        let checker = NotificationsChecker::new(Arc::new(caller.clone()), feeds);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Ignored);
        assert_eq!(caller.requested_urls(), vec![format!("{FEED_URL}?id={UUID}")]);
    }

    #[tokio::test]
    async fn test_deleted_but_previously_notified_keeps_waiting() {
        let caller = ScriptedCaller::new();
        let attempt = attempt(CheckKind::Notifications, FEED_URL, true);
        let earlier = format!(
            r#"{{"notifications":[{{"id":"http://www.example.com/thing/{UUID}","publishReference":"tid_create","lastModified":"2026-03-01T09:00:00Z"}}]}}"#
        );
        caller.respond(&NotificationsChecker::lookup_url(&attempt), 200, &earlier);
        let feeds = feeds_with(Vec::new(), &caller).await;
        let checker = NotificationsChecker::new(Arc::new(caller), feeds);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
    }

    #[tokio::test]
    async fn test_deleted_with_malformed_notified_entry_keeps_waiting() {
        let caller = ScriptedCaller::new();
        let attempt = attempt(CheckKind::Notifications, FEED_URL, true);
        caller.respond(&NotificationsChecker::lookup_url(&attempt), 200, r#"{"notifications":[{"id":null}]}"#);
        let feeds = feeds_with(Vec::new(), &caller).await;
        let checker = NotificationsChecker::new(Arc::new(caller), feeds);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
    }

    #[tokio::test]
    async fn test_deleted_with_failing_lookup_keeps_waiting() {
        let caller = ScriptedCaller::new();
        let attempt = attempt(CheckKind::Notifications, FEED_URL, true);
        caller.respond(&NotificationsChecker::lookup_url(&attempt), 500, "");
        let feeds = feeds_with(Vec::new(), &caller).await;
        let checker = NotificationsChecker::new(Arc::new(caller), feeds);

        assert_eq!(checker.check(&attempt).await, CheckOutcome::Pending);
    }
}

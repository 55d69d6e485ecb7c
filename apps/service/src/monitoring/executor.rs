use std::sync::Arc;

use tracing::debug;

use super::checker::{Checker, ContentChecker, IdentityChecker, NotificationsChecker, StorageChecker};
use super::types::{CheckKind, CheckOutcome, PublishAttempt};
use crate::feeds::FeedRegistry;
use crate::http::HttpCaller;

/// Check executor - dispatches each attempt to the checker of its kind
pub struct CheckExecutor {
    content_checker: Arc<ContentChecker>,
    identity_checker: Arc<IdentityChecker>,
    notifications_checker: Arc<NotificationsChecker>,
    storage_checker: Arc<StorageChecker>,
}

impl CheckExecutor {
    /// Build every checker once, sharing the caller and the feeds.
    pub fn new(caller: Arc<dyn HttpCaller>, feeds: Arc<FeedRegistry>) -> Self {
        Self {
            content_checker: Arc::new(ContentChecker::new(caller.clone())),
            identity_checker: Arc::new(IdentityChecker::new(caller.clone())),
            notifications_checker: Arc::new(NotificationsChecker::new(caller.clone(), feeds)),
            storage_checker: Arc::new(StorageChecker::new(caller)),
        }
    }

    pub fn checker_for(&self, kind: CheckKind) -> &dyn Checker {
        match kind {
            CheckKind::Content => self.content_checker.as_ref(),
            CheckKind::Identity => self.identity_checker.as_ref(),
            CheckKind::Notifications => self.notifications_checker.as_ref(),
            CheckKind::Storage => self.storage_checker.as_ref(),
        }
    }

    /// Run one poll for the attempt
    pub async fn execute_check(&self, attempt: &PublishAttempt) -> CheckOutcome {
        let outcome = self.checker_for(attempt.check.kind).check(attempt).await;
        debug!(
            uuid = %attempt.uuid,
            environment = %attempt.environment.name,
            check = %attempt.check.alias,
            ?outcome,
            "Poll completed"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::environments::Environment;
    use crate::feeds::FeedSettings;
    use crate::http::testing::ScriptedCaller;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let caller = ScriptedCaller::new();
        caller.respond("http://storage.example.com/item", 200, "");
        caller.respond("http://read.example.com/item", 200, "{}");
        let shared: Arc<dyn HttpCaller> = Arc::new(caller.clone());
        let feeds = Arc::new(FeedRegistry::new(&[], FeedSettings::default(), shared.clone()));
        let executor = CheckExecutor::new(shared, feeds);

        let mut check = Config::default().checks[0].clone();
        check.kind = CheckKind::Storage;
        let mut attempt = PublishAttempt {
            uuid: Uuid::new_v4(),
            check,
            environment: Environment::unmonitored(),
            endpoint: "http://storage.example.com/item".to_string(),
            transaction_id: "tid".to_string(),
            publish_date: Utc::now(),
            deleted: false,
        };
        // A bare 200 is enough for storage, but not for an identity match.
        assert_eq!(executor.execute_check(&attempt).await, CheckOutcome::Finished);

        attempt.check.kind = CheckKind::Identity;
        attempt.endpoint = "http://read.example.com/item".to_string();
        assert_eq!(executor.execute_check(&attempt).await, CheckOutcome::Pending);
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CheckConfig;
use crate::environments::Environment;

/// Check variant backing an endpoint family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// Fetch the content and match publish reference or lastModified.
    Content,
    /// Fetch the content and match its UUID only.
    Identity,
    /// Look the publish up in the environment's notification feed.
    Notifications,
    /// Fetch the binary from the environment's storage URL.
    Storage,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Content => write!(f, "content"),
            CheckKind::Identity => write!(f, "identity"),
            CheckKind::Notifications => write!(f, "notifications"),
            CheckKind::Storage => write!(f, "storage"),
        }
    }
}

/// Verdict of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Finished,
    /// A newer publish superseded this one, stop without reporting.
    Ignored,
    Pending,
}

/// Second bounds within the SLA window in which availability was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: u64,
    pub upper: u64,
}

impl Interval {
    /// Bounds of the `attempt`-th cadence slot (1-based).
    pub fn for_attempt(attempt: u64, check_interval_secs: u64) -> Self {
        let attempt = attempt.max(1);
        Self {
            lower: (attempt - 1) * check_interval_secs,
            upper: attempt * check_interval_secs,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.lower, self.upper)
    }
}

/// One polling target: a publish checked by one check in one environment.
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    pub uuid: Uuid,
    pub check: CheckConfig,
    pub environment: Environment,
    /// Resolved URL the check polls (the feed URL for notification checks).
    pub endpoint: String,
    pub transaction_id: String,
    pub publish_date: DateTime<Utc>,
    pub deleted: bool,
}

impl PublishAttempt {
    pub fn succeed(self, interval: Interval) -> PublishMetric {
        PublishMetric { attempt: self, success: true, interval: Some(interval), completed_at: Utc::now() }
    }

    pub fn fail(self) -> PublishMetric {
        PublishMetric { attempt: self, success: false, interval: None, completed_at: Utc::now() }
    }
}

/// A completed attempt, as emitted to the sinks and kept in history.
#[derive(Debug, Clone)]
pub struct PublishMetric {
    pub attempt: PublishAttempt,
    pub success: bool,
    /// Set only on success.
    pub interval: Option<Interval>,
    pub completed_at: DateTime<Utc>,
}

impl PublishMetric {
    pub fn record(&self) -> OutcomeRecord {
        OutcomeRecord {
            uuid: self.attempt.uuid,
            transaction_id: self.attempt.transaction_id.clone(),
            environment: self.attempt.environment.name.clone(),
            check: self.attempt.check.alias.clone(),
            endpoint: self.attempt.endpoint.clone(),
            publish_date: self.attempt.publish_date,
            success: self.success,
            interval: self.interval,
        }
    }
}

/// Serializable outcome handed to downstream metric consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub uuid: Uuid,
    pub transaction_id: String,
    pub environment: String,
    pub check: String,
    pub endpoint: String,
    pub publish_date: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_bounds() {
        assert_eq!(Interval::for_attempt(1, 5), Interval { lower: 0, upper: 5 });
        assert_eq!(Interval::for_attempt(2, 5), Interval { lower: 5, upper: 10 });
        assert_eq!(Interval::for_attempt(0, 5), Interval { lower: 0, upper: 5 });
        assert_eq!(Interval::for_attempt(3, 4).to_string(), "[8,12]");
    }

    #[test]
    fn test_failed_record_has_no_interval() {
        let attempt = PublishAttempt {
            uuid: Uuid::new_v4(),
            check: crate::config::Config::default().checks[0].clone(),
            environment: Environment::unmonitored(),
            endpoint: String::new(),
            transaction_id: "tid_1".to_string(),
            publish_date: Utc::now(),
            deleted: false,
        };

        let record = attempt.fail().record();
        assert!(!record.success);
        assert!(record.interval.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("interval").is_none());
        assert_eq!(json["transactionId"], "tid_1");
        assert_eq!(json["environment"], "none");
    }
}

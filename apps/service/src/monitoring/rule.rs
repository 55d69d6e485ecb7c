//! Decides whether an observed record belongs to the publish being checked.
//!
//! Content is often republished several times inside one SLA window. A record
//! carrying the expected transaction id confirms the publish. Otherwise its
//! `lastModified` tells whether the platform is still behind (keep polling),
//! exactly on this publish (done) or already past it (a later publish
//! superseded this one, stop without reporting a failure).

use chrono::{DateTime, Utc};

use super::types::CheckOutcome;
use crate::feeds::notification::parse_timestamp;

pub fn same_publish_event(
    publish_reference: &str,
    last_modified: &str,
    transaction_id: &str,
    publish_date: DateTime<Utc>,
) -> CheckOutcome {
    if publish_reference == transaction_id {
        return CheckOutcome::Finished;
    }

    match parse_timestamp(last_modified) {
        Some(modified) if modified > publish_date => CheckOutcome::Ignored,
        Some(modified) if modified == publish_date => CheckOutcome::Finished,
        _ => CheckOutcome::Pending,
    }
}

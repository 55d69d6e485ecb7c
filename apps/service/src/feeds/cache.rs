//! Time-bounded store of recently observed notifications.
//!
//! Each feed owns one cache and is its only writer. Any number of notification
//! checks read it concurrently.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::notification::NotificationRecord;

#[derive(Debug, Clone)]
struct CachedNotification {
    /// `lastModified`, or arrival time when the record carries no parseable timestamp.
    retained_from: DateTime<Utc>,
    record: NotificationRecord,
}

#[derive(Debug)]
pub struct FeedCache {
    entries: RwLock<HashMap<Uuid, Vec<CachedNotification>>>,
    expiry: Duration,
}

impl FeedCache {
    pub fn new(expiry: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), expiry }
    }

    /// Records for `uuid` in arrival order, empty when none are cached.
    pub async fn notifications_for(&self, uuid: &Uuid) -> Vec<NotificationRecord> {
        self.entries
            .read()
            .await
            .get(uuid)
            .map(|cached| cached.iter().map(|entry| entry.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Append records under their content UUID and return how many were kept.
    pub async fn store(&self, records: Vec<NotificationRecord>) -> usize {
        self.store_at(records, Utc::now()).await
    }

    pub async fn store_at(&self, records: Vec<NotificationRecord>, now: DateTime<Utc>) -> usize {
        let mut stored = 0;
        let mut entries = self.entries.write().await;

        for record in records {
            let Some(uuid) = record.uuid() else {
                warn!(id = %record.id, "Skipping notification without a content UUID");
                continue;
            };

            let retained_from = record.last_modified().unwrap_or(now);
            entries.entry(uuid).or_default().push(CachedNotification { retained_from, record });
            stored += 1;
        }

        stored
    }

    /// Drop every record older than `now - expiry` and any UUID left empty.
    pub async fn purge(&self, now: DateTime<Utc>) -> usize {
        let Ok(expiry) = chrono::Duration::from_std(self.expiry) else {
            return 0;
        };
        let cutoff = now - expiry;

        let mut removed = 0;
        let mut entries = self.entries.write().await;
        entries.retain(|_, cached| {
            let before = cached.len();
            cached.retain(|entry| entry.retained_from >= cutoff);
            removed += before - cached.len();
            !cached.is_empty()
        });

        if removed > 0 {
            debug!(removed, "Purged expired notifications");
        }
        removed
    }

    /// Number of UUIDs currently cached.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "0b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d";
    const OTHER: &str = "1b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d";

    fn record(uuid: &str, tid: &str, last_modified: DateTime<Utc>) -> NotificationRecord {
        NotificationRecord::new(format!("http://www.example.com/thing/{uuid}"), tid, last_modified.to_rfc3339())
    }

    #[tokio::test]
    async fn test_store_keeps_arrival_order() {
        let cache = FeedCache::new(Duration::from_secs(60));
        let now = Utc::now();
        let stored = cache
            .store_at(vec![record(UUID, "tid_1", now), record(OTHER, "tid_2", now), record(UUID, "tid_3", now)], now)
            .await;
        assert_eq!(stored, 3);

        let uuid = Uuid::parse_str(UUID).unwrap();
        let tids: Vec<String> =
            cache.notifications_for(&uuid).await.into_iter().map(|r| r.publish_reference).collect();
        assert_eq!(tids, vec!["tid_1".to_string(), "tid_3".to_string()]);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_store_skips_records_without_uuid() {
        let cache = FeedCache::new(Duration::from_secs(60));
        let stored = cache.store(vec![NotificationRecord::new("http://x/thing/garbage", "tid", "")]).await;
        assert_eq!(stored, 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_drops_expired_records() {
        let expiry = Duration::from_secs(60);
        let cache = FeedCache::new(expiry);
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(120);

        cache.store_at(vec![record(UUID, "old", old), record(UUID, "new", now)], now).await;
        assert_eq!(cache.purge(now).await, 1);

        let uuid = Uuid::parse_str(UUID).unwrap();
        let remaining = cache.notifications_for(&uuid).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].publish_reference, "new");
    }

    #[tokio::test]
    async fn test_purge_removes_empty_uuid_entries() {
        let cache = FeedCache::new(Duration::from_secs(60));
        let now = Utc::now();
        cache.store_at(vec![record(UUID, "old", now - chrono::Duration::seconds(120))], now).await;

        cache.purge(now).await;
        assert!(cache.is_empty().await);
        assert!(cache.notifications_for(&Uuid::parse_str(UUID).unwrap()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_expires_from_arrival() {
        let cache = FeedCache::new(Duration::from_secs(60));
        let arrival = Utc::now();
        cache
            .store_at(
                vec![NotificationRecord::new(format!("http://x/thing/{UUID}"), "tid", "not a date")],
                arrival,
            )
            .await;

        assert_eq!(cache.purge(arrival + chrono::Duration::seconds(30)).await, 0);
        assert_eq!(cache.purge(arrival + chrono::Duration::seconds(61)).await, 1);
        assert!(cache.is_empty().await);
    }
}

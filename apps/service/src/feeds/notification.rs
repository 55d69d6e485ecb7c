use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// One platform change event as published on a notification feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Canonical id, the content UUID is its last path segment.
    pub id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub publish_reference: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub last_modified: String,
}

impl NotificationRecord {
    pub fn new(
        id: impl Into<String>,
        publish_reference: impl Into<String>,
        last_modified: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            publish_reference: publish_reference.into(),
            last_modified: last_modified.into(),
        }
    }

    pub fn uuid(&self) -> Option<Uuid> {
        let segment = self.id.trim_end_matches('/').rsplit('/').next()?;
        Uuid::parse_str(segment).ok()
    }

    /// Parsed `lastModified`, `None` when missing or malformed.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_modified)
    }
}

/// Read a text field, `null` and non-string values read as empty.
pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        _ => String::new(),
    })
}

/// Decode records one by one, logging and dropping the malformed ones.
fn decode_records(values: Vec<Value>) -> Vec<NotificationRecord> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<NotificationRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed notification record: {}", e);
                None
            }
        })
        .collect()
}

fn lenient_records<'de, D>(deserializer: D) -> Result<Vec<NotificationRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(decode_records(values.unwrap_or_default()))
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim()).ok().map(|parsed| parsed.with_timezone(&Utc))
}

/// Link object of a pull page.
#[derive(Debug, Clone, Deserialize)]
pub struct PageLink {
    pub href: String,
}

/// Envelope returned by pull feeds and by direct notification lookups.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPage {
    #[serde(default, deserialize_with = "lenient_records")]
    pub notifications: Vec<NotificationRecord>,
    #[serde(default)]
    pub links: Vec<PageLink>,
}

impl NotificationPage {
    pub fn next_link(&self) -> Option<&str> {
        self.links.first().map(|link| link.href.as_str())
    }
}

/// Prefix framing every record batch on a push stream.
pub const PUSH_FRAME_PREFIX: &str = "data:";

/// Decode one non-blank push-stream line into its record batch.
///
/// Only a frame that is not a JSON array fails, malformed records inside it
/// are skipped.
pub fn decode_push_frame(line: &str) -> Result<Vec<NotificationRecord>, serde_json::Error> {
    let payload = line.trim().strip_prefix(PUSH_FRAME_PREFIX).unwrap_or(line).trim();
    let values: Vec<Value> = serde_json::from_str(payload)?;
    Ok(decode_records(values))
}

//! Validated publish events and the line-delimited source the binary reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// A publish that already passed content-type validation upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEvent {
    pub uuid: Uuid,
    pub content_type: String,
    pub publish_date: DateTime<Utc>,
    pub transaction_id: String,
    #[serde(default, alias = "isMarkedDeleted")]
    pub deleted: bool,
}

pub fn parse_event(line: &str) -> Result<ContentEvent, serde_json::Error> {
    serde_json::from_str(line)
}

/// Forward every well-formed line of `reader` to `events` and return how many
/// were sent. Blank lines are skipped, malformed ones logged and skipped.
pub async fn forward_events<R>(reader: R, events: mpsc::Sender<ContentEvent>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match parse_event(&line) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Err(e) => warn!("Skipping malformed content event: {}", e),
        }
    }

    Ok(forwarded)
}

use std::collections::VecDeque;

use tokio::sync::Mutex;

use super::types::PublishMetric;

/// How many completed attempts are kept for health reporting.
pub const HISTORY_CAPACITY: usize = 10;

/// Bounded ring of the most recently completed attempts, oldest first.
#[derive(Debug)]
pub struct History {
    entries: Mutex<VecDeque<PublishMetric>>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(capacity)), capacity: capacity.max(1) }
    }

    /// Append and evict the oldest entries beyond capacity, in one step.
    pub async fn append(&self, metric: PublishMetric) {
        let mut entries = self.entries.lock().await;
        entries.push_back(metric);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub async fn snapshot(&self) -> Vec<PublishMetric> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Failed attempts among the retained ones.
    pub async fn failures(&self) -> usize {
        self.entries.lock().await.iter().filter(|metric| !metric.success).count()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

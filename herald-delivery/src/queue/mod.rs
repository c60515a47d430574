//! In-memory retry queue

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{CircuitState, Payload};

/// Identifier of a single scheduling of a notification
///
/// Every reschedule gets a fresh id, so an id names one attempt window rather
/// than the notification itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RetryId {
    id: ulid::Ulid,
}

impl RetryId {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }
}

impl std::fmt::Display for RetryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for RetryId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for RetryId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// A notification waiting for its next delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedNotification {
    pub id: RetryId,
    pub notification_id: String,
    pub payload: Payload,
    /// Error from the most recent failed attempt
    pub error: String,
    /// When the notification first failed
    pub original_timestamp: DateTime<Utc>,
    pub last_attempt_timestamp: DateTime<Utc>,
    /// Retry attempts already made
    pub attempt_count: u32,
    pub next_retry_at: DateTime<Utc>,
    /// Breaker state when this entry was scheduled
    pub circuit_breaker_state: CircuitState,
    pub base_delay_ms: u64,
    pub total_delay_ms: u64,
    /// Insertion order, used to break ties between equally due entries
    pub(crate) sequence: u64,
}

impl FailedNotification {
    /// Whether the entry may be attempted at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }
}

/// Concurrent map of scheduled retries keyed by [`RetryId`]
#[derive(Debug, Clone, Default)]
pub struct RetryQueue {
    entries: Arc<DashMap<RetryId, FailedNotification>>,
    sequence: Arc<AtomicU64>,
}

impl RetryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, stamping it with the next insertion sequence number
    pub fn insert(&self, mut entry: FailedNotification) -> RetryId {
        entry.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = entry.id;
        self.entries.insert(id, entry);
        id
    }

    pub fn get(&self, id: &RetryId) -> Option<FailedNotification> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &RetryId) -> Option<FailedNotification> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    /// Entries due at `now`, earliest first, ties broken by insertion order
    pub fn due(&self, now: DateTime<Utc>) -> Vec<FailedNotification> {
        let mut due: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect();

        due.sort_by(|a, b| {
            a.next_retry_at
                .cmp(&b.next_retry_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        due
    }

    /// Every entry scheduled for `notification_id`, in insertion order
    pub fn for_notification(&self, notification_id: &str) -> Vec<FailedNotification> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.value().notification_id == notification_id)
            .map(|entry| entry.value().clone())
            .collect();

        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    /// Drop every entry for `notification_id`, returning how many went
    pub fn remove_notification(&self, notification_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.notification_id != notification_id);
        before.saturating_sub(self.entries.len())
    }

    /// Drop everything, returning how many entries went
    pub fn clear(&self) -> usize {
        let before = self.entries.len();
        self.entries.clear();
        before
    }

    /// Snapshot of every entry, in insertion order
    pub fn entries(&self) -> Vec<FailedNotification> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn entry(notification_id: &str, next_retry_at: DateTime<Utc>) -> FailedNotification {
        FailedNotification {
            id: RetryId::generate(),
            notification_id: notification_id.to_string(),
            payload: Payload::new(["u1"], "title", "body"),
            error: "provider unavailable".to_string(),
            original_timestamp: next_retry_at,
            last_attempt_timestamp: next_retry_at,
            attempt_count: 0,
            next_retry_at,
            circuit_breaker_state: CircuitState::Closed,
            base_delay_ms: 1000,
            total_delay_ms: 1000,
            sequence: 0,
        }
    }

    #[test]
    fn test_due_orders_by_time_then_insertion() {
        let queue = RetryQueue::new();
        let now = Utc::now();

        queue.insert(entry("late", now - TimeDelta::seconds(1)));
        queue.insert(entry("tie-first", now - TimeDelta::seconds(5)));
        queue.insert(entry("tie-second", now - TimeDelta::seconds(5)));
        queue.insert(entry("future", now + TimeDelta::seconds(5)));

        let due: Vec<_> = queue
            .due(now)
            .into_iter()
            .map(|entry| entry.notification_id)
            .collect();
        assert_eq!(due, ["tie-first", "tie-second", "late"]);
    }

    #[test]
    fn test_remove_notification_and_clear() {
        let queue = RetryQueue::new();
        let now = Utc::now();

        queue.insert(entry("a", now));
        queue.insert(entry("a", now));
        queue.insert(entry("b", now));

        assert_eq!(queue.for_notification("a").len(), 2);
        assert_eq!(queue.remove_notification("a"), 2);
        assert_eq!(queue.remove_notification("a"), 0);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }
}

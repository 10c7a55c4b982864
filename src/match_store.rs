use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shard::ShardedMap;

/// Per-device consecutive-match streak against a single track. Destroyed
/// on any out-of-threshold fix; a device has at most one at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCounter {
    pub device_id: String,
    pub track_id: String,
    pub consecutive_matches: u32,
    pub last_matched_index: usize,
    pub updated_at: DateTime<Utc>,
}

/// Sharded by `device_id`, mirroring the teacher's per-node sequence
/// tracker: one entry per device, replaced wholesale on every update.
pub struct MatchStateStore {
    counters: ShardedMap<String, MatchCounter>,
}

impl MatchStateStore {
    pub fn new() -> Self {
        Self { counters: ShardedMap::new() }
    }

    pub async fn restore(&self, counters: Vec<MatchCounter>) {
        for counter in counters {
            self.counters.insert(counter.device_id.clone(), counter).await;
        }
    }

    pub async fn get(&self, device_id: &str) -> Option<MatchCounter> {
        self.counters.get(&device_id.to_string()).await
    }

    /// Applies the Matcher's counter-update policy for one in-threshold
    /// (matched) fix and returns the resulting streak length.
    pub async fn record_match(&self, device_id: &str, track_id: &str, matched_index: usize) -> u32 {
        let key = device_id.to_string();
        self.counters
            .with_entry(&key, |map| {
                let consecutive = match map.get(device_id) {
                    Some(existing) if existing.track_id == track_id => {
                        existing.consecutive_matches + 1
                    }
                    _ => 1,
                };
                map.insert(
                    device_id.to_string(),
                    MatchCounter {
                        device_id: device_id.to_string(),
                        track_id: track_id.to_string(),
                        consecutive_matches: consecutive,
                        last_matched_index: matched_index,
                        updated_at: Utc::now(),
                    },
                );
                consecutive
            })
            .await
    }

    /// Hard reset: one unmatched fix destroys the streak entirely.
    pub async fn reset(&self, device_id: &str) {
        self.counters.remove(&device_id.to_string()).await;
    }

    pub async fn snapshot(&self) -> Vec<MatchCounter> {
        self.counters.snapshot().await
    }
}

impl Default for MatchStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_match_starts_streak_at_one() {
        let store = MatchStateStore::new();
        let n = store.record_match("D1", "X", 3).await;
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn consecutive_matches_on_same_track_increment() {
        let store = MatchStateStore::new();
        store.record_match("D1", "X", 0).await;
        store.record_match("D1", "X", 1).await;
        let n = store.record_match("D1", "X", 2).await;
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn match_on_a_different_track_restarts_streak() {
        let store = MatchStateStore::new();
        store.record_match("D1", "X", 0).await;
        store.record_match("D1", "X", 1).await;
        let n = store.record_match("D1", "Y", 0).await;
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn reset_deletes_the_counter() {
        let store = MatchStateStore::new();
        store.record_match("D1", "X", 0).await;
        store.reset("D1").await;
        assert!(store.get("D1").await.is_none());

        let n = store.record_match("D1", "X", 0).await;
        assert_eq!(n, 1);
    }
}

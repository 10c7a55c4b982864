use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shard::ShardedMap;

/// An exclusive (or, during a collision window, co-held) claim on a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackLock {
    pub track_id: String,
    pub train_id: String,
    pub device_id: String,
    pub locked_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquireOutcome {
    pub granted: bool,
    pub already_held_by_other: bool,
}

/// Keyed by `track_id`, one shard per track, so the acquire-holders-scan
/// critical section (`spec.md` §5) runs under that single track's lock:
/// two concurrent acquires on the same track cannot both observe an empty
/// holder set and both grant. Each entry holds every lock row currently
/// recorded for that track — normally one, briefly two during a
/// collision window.
pub struct Arbiter {
    by_track: ShardedMap<String, Vec<TrackLock>>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self { by_track: ShardedMap::new() }
    }

    pub async fn restore(&self, locks: Vec<TrackLock>) {
        for lock in locks {
            let key = lock.track_id.clone();
            self.by_track
                .with_entry(&key, |map| {
                    map.entry(key.clone()).or_default().push(lock);
                })
                .await;
        }
    }

    /// Grants when no record exists for `(track_id, train_id)` and no
    /// record exists for `(track_id, other_train)`. A repeat call by the
    /// train that already holds it is idempotent and refreshes
    /// `updated_at`. A call by a different train while the track is held
    /// fails with `already_held_by_other = true`; per the permissive
    /// collision-recording policy the caller may still invoke
    /// `record_co_claim` to surface the second holder.
    pub async fn acquire(&self, train_id: &str, device_id: &str, track_id: &str) -> AcquireOutcome {
        let key = track_id.to_string();
        self.by_track
            .with_entry(&key, |map| {
                let rows = map.entry(key.clone()).or_default();
                let held_by_other = rows.iter().any(|r| r.train_id != train_id);
                if held_by_other {
                    return AcquireOutcome { granted: false, already_held_by_other: true };
                }
                upsert_claim(rows, train_id, device_id, track_id);
                AcquireOutcome { granted: true, already_held_by_other: false }
            })
            .await
    }

    /// Unconditionally records this train's claim on the track, allowing
    /// a second train's lock row to coexist alongside the first's so the
    /// Collision Detector can observe both holders.
    pub async fn record_co_claim(&self, train_id: &str, device_id: &str, track_id: &str) {
        let key = track_id.to_string();
        self.by_track
            .with_entry(&key, |map| {
                let rows = map.entry(key.clone()).or_default();
                upsert_claim(rows, train_id, device_id, track_id);
            })
            .await;
    }

    pub async fn release(&self, train_id: &str, track_id: &str) {
        let key = track_id.to_string();
        self.by_track
            .with_entry(&key, |map| {
                if let Some(rows) = map.get_mut(&key) {
                    rows.retain(|r| r.train_id != train_id);
                }
            })
            .await;
    }

    pub async fn holders(&self, track_id: &str) -> Vec<TrackLock> {
        self.by_track.get(&track_id.to_string()).await.unwrap_or_default()
    }

    pub async fn snapshot(&self) -> Vec<TrackLock> {
        self.by_track.snapshot().await.into_iter().flatten().collect()
    }
}

fn upsert_claim(rows: &mut Vec<TrackLock>, train_id: &str, device_id: &str, track_id: &str) {
    let now = Utc::now();
    if let Some(existing) = rows.iter_mut().find(|r| r.train_id == train_id) {
        existing.device_id = device_id.to_string();
        existing.updated_at = now;
        return;
    }
    rows.push(TrackLock {
        track_id: track_id.to_string(),
        train_id: train_id.to_string(),
        device_id: device_id.to_string(),
        locked_at: now,
        updated_at: now,
    });
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_grants_when_track_is_free() {
        let arbiter = Arbiter::new();
        let outcome = arbiter.acquire("T1", "D1", "X").await;
        assert!(outcome.granted);
        assert!(!outcome.already_held_by_other);
    }

    #[tokio::test]
    async fn repeat_acquire_by_same_train_is_idempotent() {
        let arbiter = Arbiter::new();
        arbiter.acquire("T1", "D1", "X").await;
        let outcome = arbiter.acquire("T1", "D1", "X").await;
        assert!(outcome.granted);
        assert_eq!(arbiter.holders("X").await.len(), 1);
    }

    #[tokio::test]
    async fn acquire_by_another_train_fails_but_does_not_evict_the_holder() {
        let arbiter = Arbiter::new();
        arbiter.acquire("T1", "D1", "X").await;
        let outcome = arbiter.acquire("T2", "D2", "X").await;
        assert!(!outcome.granted);
        assert!(outcome.already_held_by_other);
        assert_eq!(arbiter.holders("X").await.len(), 1);
    }

    #[tokio::test]
    async fn record_co_claim_allows_two_holders_on_the_same_track() {
        let arbiter = Arbiter::new();
        arbiter.acquire("T1", "D1", "X").await;
        arbiter.record_co_claim("T2", "D2", "X").await;
        let holders = arbiter.holders("X").await;
        assert_eq!(holders.len(), 2);
    }

    #[tokio::test]
    async fn release_is_a_no_op_when_absent() {
        let arbiter = Arbiter::new();
        arbiter.release("T1", "X").await;
        assert_eq!(arbiter.holders("X").await.len(), 0);
    }

    #[tokio::test]
    async fn release_removes_only_the_named_train() {
        let arbiter = Arbiter::new();
        arbiter.acquire("T1", "D1", "X").await;
        arbiter.record_co_claim("T2", "D2", "X").await;
        arbiter.release("T1", "X").await;
        let holders = arbiter.holders("X").await;
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].train_id, "T2");
    }

    #[tokio::test]
    async fn unrelated_tracks_do_not_contend() {
        let arbiter = Arbiter::new();
        arbiter.acquire("T1", "D1", "X").await;
        let outcome = arbiter.acquire("T2", "D2", "Y").await;
        assert!(outcome.granted);
    }
}

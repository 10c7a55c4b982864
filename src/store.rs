//! Persistence seam. The real document store is an external collaborator;
//! this module only defines the contract (`Store`) and a process-local
//! implementation good enough for tests and for running the core without
//! a backing database, mirroring `persistence.rs`'s `load_state`/
//! `save_state` pair in the teacher repo, generalized from a single JSON
//! blob into the four logical collections the external interface names.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::Track;
use crate::error::CoreError;
use crate::lock::TrackLock;
use crate::match_store::MatchCounter;
use crate::train::Train;

#[async_trait]
pub trait Store: Send + Sync {
    async fn load_tracks(&self) -> Result<Vec<Track>, CoreError>;
    async fn load_trains(&self) -> Result<Vec<Train>, CoreError>;
    async fn load_match_counters(&self) -> Result<Vec<MatchCounter>, CoreError>;
    async fn load_locks(&self) -> Result<Vec<TrackLock>, CoreError>;

    async fn save_tracks(&self, tracks: Vec<Track>) -> Result<(), CoreError>;
    async fn save_trains(&self, trains: Vec<Train>) -> Result<(), CoreError>;
    async fn save_match_counters(&self, counters: Vec<MatchCounter>) -> Result<(), CoreError>;
    async fn save_locks(&self, locks: Vec<TrackLock>) -> Result<(), CoreError>;
}

/// A process-local `Store`. Useful for tests and for operating the core
/// without a document-store backend; state does not survive a process
/// restart since nothing is written to disk.
#[derive(Default)]
pub struct InMemoryStore {
    tracks: RwLock<Vec<Track>>,
    trains: RwLock<Vec<Train>>,
    match_counters: RwLock<Vec<MatchCounter>>,
    locks: RwLock<Vec<TrackLock>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_tracks(&self) -> Result<Vec<Track>, CoreError> {
        Ok(self.tracks.read().await.clone())
    }

    async fn load_trains(&self) -> Result<Vec<Train>, CoreError> {
        Ok(self.trains.read().await.clone())
    }

    async fn load_match_counters(&self) -> Result<Vec<MatchCounter>, CoreError> {
        Ok(self.match_counters.read().await.clone())
    }

    async fn load_locks(&self) -> Result<Vec<TrackLock>, CoreError> {
        Ok(self.locks.read().await.clone())
    }

    async fn save_tracks(&self, tracks: Vec<Track>) -> Result<(), CoreError> {
        *self.tracks.write().await = tracks;
        Ok(())
    }

    async fn save_trains(&self, trains: Vec<Train>) -> Result<(), CoreError> {
        *self.trains.write().await = trains;
        Ok(())
    }

    async fn save_match_counters(&self, counters: Vec<MatchCounter>) -> Result<(), CoreError> {
        *self.match_counters.write().await = counters;
        Ok(())
    }

    async fn save_locks(&self, locks: Vec<TrackLock>) -> Result<(), CoreError> {
        *self.locks.write().await = locks;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn round_trips_tracks() {
        let store = InMemoryStore::new();
        let track = Track {
            track_id: "X".to_string(),
            name: "Test".to_string(),
            start_station: None,
            end_station: None,
            vertices: vec![(0.0, 0.0), (0.1, 0.1)],
            is_active: false,
            created_at: Utc::now(),
        };
        store.save_tracks(vec![track.clone()]).await.unwrap();
        let loaded = store.load_tracks().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].track_id, "X");
    }

    #[tokio::test]
    async fn starts_empty() {
        let store = InMemoryStore::new();
        assert!(store.load_trains().await.unwrap().is_empty());
        assert!(store.load_locks().await.unwrap().is_empty());
        assert!(store.load_match_counters().await.unwrap().is_empty());
    }
}

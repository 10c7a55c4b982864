use std::sync::Arc;

use tokio::time::{timeout, Duration};
use tracing::{error, warn};

use crate::catalog::{Catalog, Track};
use crate::config::Config;
use crate::error::CoreError;
use crate::fix::Fix;
use crate::lock::Arbiter;
use crate::match_store::MatchStateStore;
use crate::matcher::Matcher;
use crate::store::Store;
use crate::train::{Registry, Train, TrainSelector};
use crate::trip::{IngestOutcome, TripController};

const FIX_TIMEOUT: Duration = Duration::from_secs(5);

/// The process-wide composition root: owns the four singletons (Catalog,
/// Match State Store, Arbiter, Registry) plus configuration, and exposes
/// the external interface from the spec's §6 as plain async methods. A
/// thin transport layer calls these verbatim.
pub struct Engine {
    config: Config,
    store: Arc<dyn Store>,
    catalog: Catalog,
    match_state: MatchStateStore,
    arbiter: Arbiter,
    registry: Registry,
}

impl Engine {
    /// Builds a fresh engine reading tuning knobs from the environment.
    /// A `Store` whose methods always fail degrades the engine to
    /// read-only, exactly as described in the error-handling design: every
    /// mutation then surfaces `StoreUnavailable`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, Config::from_env())
    }

    pub fn with_config(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            config,
            store,
            catalog: Catalog::new(),
            match_state: MatchStateStore::new(),
            arbiter: Arbiter::new(),
            registry: Registry::new(),
        }
    }

    /// Reloads the four persisted collections into the in-memory indices.
    /// Called once at startup.
    pub async fn init(&self) -> Result<(), CoreError> {
        let tracks = self.store.load_tracks().await?;
        let trains = self.store.load_trains().await?;
        let counters = self.store.load_match_counters().await?;
        let locks = self.store.load_locks().await?;

        self.catalog.restore(tracks).await;
        self.registry.restore(trains).await;
        self.match_state.restore(counters).await;
        self.arbiter.restore(locks).await;
        Ok(())
    }

    /// Persists the current in-memory state of all four collections.
    pub async fn checkpoint(&self) -> Result<(), CoreError> {
        self.store.save_tracks(self.catalog.list().await).await?;
        self.store.save_trains(self.registry.list().await).await?;
        self.store
            .save_match_counters(self.match_state.snapshot().await)
            .await?;
        self.store.save_locks(self.arbiter.snapshot().await).await?;
        Ok(())
    }

    /// Binds a device to a train identity, registering it if new. A real
    /// deployment's device-provisioning flow would call this once up
    /// front; tests and the trip-start path call it lazily.
    pub async fn bind_train(&self, train_id: &str, device_id: &str) -> Train {
        self.registry.bind(train_id, device_id).await
    }

    pub async fn submit_fix(&self, fix: Fix) -> Result<IngestOutcome, CoreError> {
        let matcher = Matcher::new(&self.config, &self.match_state);
        let trip = TripController::new(&self.catalog, &self.registry, &self.arbiter);
        let device_id = fix.device_id.clone();

        match timeout(FIX_TIMEOUT, trip.submit_fix(&matcher, &device_id, &fix)).await {
            Ok(result) => result,
            Err(_) => {
                error!(device_id = %device_id, "fix ingest exceeded soft timeout, dropping");
                Err(CoreError::StoreUnavailable("fix ingest timed out".to_string()))
            }
        }
    }

    /// Pins an already-registered train to a track for a real-testing
    /// trip. Fails `UnknownTrain` if `train_id` was never bound via
    /// [`Engine::bind_train`], `UnknownTrack` if the track was never
    /// uploaded, `TrackBusy` if another train already holds it.
    pub async fn start_trip(&self, train_id: &str, track_id: &str) -> Result<(), CoreError> {
        let trip = TripController::new(&self.catalog, &self.registry, &self.arbiter);
        trip.start(train_id, track_id).await
    }

    pub async fn stop_trip(&self, train_id: &str, track_id: Option<&str>) -> Result<(), CoreError> {
        let trip = TripController::new(&self.catalog, &self.registry, &self.arbiter);
        trip.stop(train_id, track_id).await
    }

    /// Current lock holders of a track, per `spec.md` §4.4's
    /// `holders(track_id) -> [{train_id, device_id}]`.
    pub async fn track_holders(&self, track_id: &str) -> Vec<(String, String)> {
        self.arbiter
            .holders(track_id)
            .await
            .into_iter()
            .map(|lock| (lock.train_id, lock.device_id))
            .collect()
    }

    pub async fn get_train(&self, selector: TrainSelector<'_>) -> Result<Train, CoreError> {
        self.registry.get(selector).await
    }

    pub async fn upload_track(
        &self,
        track_id: &str,
        vertices: Vec<(f64, f64)>,
        name: &str,
        start_station: Option<String>,
        end_station: Option<String>,
    ) -> Result<Track, CoreError> {
        self.catalog.load(track_id, vertices, name, start_station, end_station).await
    }

    pub async fn upload_track_csv(
        &self,
        track_id: &str,
        csv_text: &str,
        name: &str,
        start_station: Option<String>,
        end_station: Option<String>,
    ) -> Result<Track, CoreError> {
        let vertices = crate::csv::parse_track_csv(csv_text);
        if vertices.is_empty() {
            warn!(track_id, "CSV upload produced no well-formed vertices");
        }
        self.upload_track(track_id, vertices, name, start_station, end_station).await
    }

    pub async fn list_tracks(&self) -> Vec<Track> {
        self.catalog.list().await
    }

    pub async fn delete_track(&self, track_id: &str) -> Result<(), CoreError> {
        self.catalog
            .delete(track_id)
            .await
            .map(|_| ())
            .ok_or_else(|| CoreError::UnknownTrack(track_id.to_string()))
    }

    pub async fn set_active_track(&self, track_id: &str) -> Result<(), CoreError> {
        self.catalog.set_active(track_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn fix_at(device_id: &str, lat: f64, lon: f64) -> Fix {
        Fix {
            latitude: lat,
            longitude: lon,
            satellites: None,
            hdop: None,
            accuracy: None,
            timestamp: None,
            device_id: device_id.to_string(),
        }
    }

    async fn engine() -> Engine {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let engine = Engine::with_config(store, Config::default());
        engine.init().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn init_on_an_empty_store_starts_with_no_tracks_or_trains() {
        let engine = engine().await;
        assert!(engine.list_tracks().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_fix_is_rejected_before_touching_any_state() {
        let engine = engine().await;
        let mut bad = fix_at("D1", 999.0, 0.0);
        bad.latitude = 999.0;
        let result = engine.submit_fix(bad).await;
        assert!(matches!(result, Err(CoreError::InvalidFix(_))));
    }

    #[tokio::test]
    async fn fix_with_no_bound_train_is_dropped_not_errored() {
        let engine = engine().await;
        let outcome = engine.submit_fix(fix_at("unknown-device", 0.0, 0.0)).await.unwrap();
        assert!(!outcome.saved);
    }

    #[tokio::test]
    async fn end_to_end_trip_lock_and_checkpoint_round_trip() {
        let engine = engine().await;
        engine
            .upload_track(
                "X",
                vec![(0.0, 0.0), (0.0001, 0.0), (0.0002, 0.0), (0.0003, 0.0), (0.0004, 0.0)],
                "Test Track",
                None,
                None,
            )
            .await
            .unwrap();

        engine.bind_train("T1", "D1").await;
        engine.start_trip("T1", "X").await.unwrap();

        for &(lat, lon) in &[(0.0, 0.0), (0.0001, 0.0), (0.0002, 0.0), (0.0003, 0.0), (0.0004, 0.0)] {
            engine.submit_fix(fix_at("D1", lat, lon)).await.unwrap();
        }

        let train = engine.get_train(TrainSelector::TrainId("T1")).await.unwrap();
        assert_eq!(train.current_track.as_deref(), Some("X"));

        engine.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn delete_unknown_track_fails() {
        let engine = engine().await;
        assert!(matches!(engine.delete_track("ghost").await, Err(CoreError::UnknownTrack(_))));
    }

    #[tokio::test]
    async fn track_busy_when_another_train_holds_the_lock() {
        let engine = engine().await;
        engine
            .upload_track("X", vec![(0.0, 0.0), (0.0001, 0.0)], "Test Track", None, None)
            .await
            .unwrap();
        engine.bind_train("T1", "D1").await;
        engine.bind_train("T2", "D2").await;
        engine.start_trip("T1", "X").await.unwrap();
        let result = engine.start_trip("T2", "X").await;
        assert!(matches!(result, Err(CoreError::TrackBusy { .. })));
    }

    #[tokio::test]
    async fn start_trip_fails_unknown_train_when_never_bound() {
        let engine = engine().await;
        engine
            .upload_track("X", vec![(0.0, 0.0), (0.0001, 0.0)], "Test Track", None, None)
            .await
            .unwrap();
        let result = engine.start_trip("ghost", "X").await;
        assert!(matches!(result, Err(CoreError::UnknownTrain(_))));
    }

    #[tokio::test]
    async fn engine_level_collision_via_denied_start_and_matching_fixes() {
        let engine = engine().await;
        engine
            .upload_track(
                "X",
                vec![(0.0, 0.0), (0.0001, 0.0), (0.0002, 0.0), (0.0003, 0.0), (0.0004, 0.0)],
                "Test Track",
                None,
                None,
            )
            .await
            .unwrap();
        engine.bind_train("T1", "D1").await;
        engine.bind_train("T2", "D2").await;

        engine.start_trip("T1", "X").await.unwrap();
        let busy = engine.start_trip("T2", "X").await;
        assert!(matches!(busy, Err(CoreError::TrackBusy { .. })));

        let vertices = [(0.0, 0.0), (0.0001, 0.0), (0.0002, 0.0), (0.0003, 0.0), (0.0004, 0.0)];
        for &(lat, lon) in &vertices {
            engine.submit_fix(fix_at("D1", lat, lon)).await.unwrap();
        }
        for &(lat, lon) in &vertices {
            engine.submit_fix(fix_at("D2", lat, lon)).await.unwrap();
        }

        let holders = engine.track_holders("X").await;
        assert_eq!(holders.len(), 2);

        let t1 = engine.get_train(TrainSelector::TrainId("T1")).await.unwrap();
        let t2 = engine.get_train(TrainSelector::TrainId("T2")).await.unwrap();
        assert!(t1.collision_detected && t2.collision_detected);
        assert!(t1.collision_with.contains("T2"));
        assert!(t2.collision_with.contains("T1"));
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoreError;
use crate::geodesy::LatLon;
use crate::shard::ShardedMap;

/// A stored polyline. The vertex sequence is immutable after `load`;
/// `is_active` is a display/selection hint only and never affects
/// arbitration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub track_id: String,
    pub name: String,
    #[serde(default)]
    pub start_station: Option<String>,
    #[serde(default)]
    pub end_station: Option<String>,
    pub vertices: Vec<(f64, f64)>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Track {
    pub fn vertex(&self, index: usize) -> Option<LatLon> {
        self.vertices.get(index).map(|&(lat, lon)| LatLon::new(lat, lon))
    }
}

/// In-memory index of loaded polylines keyed by `track_id`.
pub struct Catalog {
    tracks: ShardedMap<String, Track>,
}

impl Catalog {
    pub fn new() -> Self {
        Self { tracks: ShardedMap::new() }
    }

    /// Rehydrates the catalog from previously persisted tracks, e.g. at
    /// startup. Does not re-validate vertex counts — the store is trusted
    /// to have only ever persisted valid tracks.
    pub async fn restore(&self, tracks: Vec<Track>) {
        for track in tracks {
            self.tracks.insert(track.track_id.clone(), track).await;
        }
    }

    /// Loads a polyline. Malformed vertices (non-finite lat/lon) are
    /// skipped silently; at least two well-formed vertices must survive
    /// or the load fails with `InvalidTrack` (modeled here as `InvalidFix`'s
    /// sibling condition, surfaced as `CoreError::InvalidFix` since the
    /// spec's error taxonomy has no dedicated `InvalidTrack` variant at the
    /// external-interface layer — callers see the same "malformed input"
    /// class either way).
    pub async fn load(
        &self,
        track_id: impl Into<String>,
        vertices: Vec<(f64, f64)>,
        name: impl Into<String>,
        start_station: Option<String>,
        end_station: Option<String>,
    ) -> Result<Track, CoreError> {
        let track_id = track_id.into();
        let well_formed: Vec<(f64, f64)> = vertices
            .into_iter()
            .filter(|&(lat, lon)| {
                let ok = lat.is_finite()
                    && lon.is_finite()
                    && (-90.0..=90.0).contains(&lat)
                    && (-180.0..=180.0).contains(&lon);
                if !ok {
                    warn!(track_id = %track_id, lat, lon, "skipping malformed vertex");
                }
                ok
            })
            .collect();

        if well_formed.len() < 2 {
            return Err(CoreError::InvalidFix(format!(
                "track {track_id} needs at least 2 well-formed vertices"
            )));
        }

        let track = Track {
            track_id: track_id.clone(),
            name: name.into(),
            start_station,
            end_station,
            vertices: well_formed,
            is_active: false,
            created_at: Utc::now(),
        };
        self.tracks.insert(track_id, track.clone()).await;
        Ok(track)
    }

    pub async fn get(&self, track_id: &str) -> Result<Track, CoreError> {
        self.tracks
            .get(&track_id.to_string())
            .await
            .ok_or_else(|| CoreError::UnknownTrack(track_id.to_string()))
    }

    pub async fn list(&self) -> Vec<Track> {
        self.tracks.snapshot().await
    }

    pub async fn delete(&self, track_id: &str) -> Option<Track> {
        self.tracks.remove(&track_id.to_string()).await
    }

    /// Clears `is_active` on every track, then sets it on the named one.
    pub async fn set_active(&self, track_id: &str) -> Result<(), CoreError> {
        for track in self.tracks.snapshot().await {
            if track.track_id != track_id && track.is_active {
                let mut cleared = track;
                cleared.is_active = false;
                self.tracks.insert(cleared.track_id.clone(), cleared).await;
            }
        }
        let mut target = self.get(track_id).await?;
        target.is_active = true;
        self.tracks.insert(target.track_id.clone(), target).await;
        Ok(())
    }

    /// The track currently flagged `is_active`, if any — the fallback
    /// match target for telemetry with no trip open.
    pub async fn active_track(&self) -> Option<Track> {
        self.tracks.snapshot().await.into_iter().find(|t| t.is_active)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedCatalog = Arc<Catalog>;

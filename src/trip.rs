use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::collision::{CollisionDetector, CollisionReport};
use crate::error::CoreError;
use crate::lock::Arbiter;
use crate::matcher::{MatchResult, Matcher};
use crate::train::{Registry, TrainSelector};

/// Starts and stops real-testing trips, and hosts the one externally
/// observable fix-ingest composition: the safety boundary that keeps
/// unsolicited telemetry from forging a collision.
pub struct TripController<'a> {
    catalog: &'a Catalog,
    registry: &'a Registry,
    arbiter: &'a Arbiter,
}

/// Outcome of `submit_fix`, mirroring the external interface's
/// `{saved, track_match, collision}` response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub saved: bool,
    pub track_match: Option<MatchResult>,
    pub collision: Option<CollisionReport>,
}

impl IngestOutcome {
    pub fn no_session() -> Self {
        Self { saved: false, track_match: None, collision: None }
    }
}

impl<'a> TripController<'a> {
    pub fn new(catalog: &'a Catalog, registry: &'a Registry, arbiter: &'a Arbiter) -> Self {
        Self { catalog, registry, arbiter }
    }

    /// Validates the track exists and the train is already registered
    /// (fails `UnknownTrain` otherwise — a trip pins an existing train,
    /// it does not provision one), then claims the track exclusively for
    /// `train_id`. Fails `TrackBusy` if another train already holds it.
    ///
    /// Either way `selected_track_id`/`current_track` are pinned to
    /// `track_id` for this train: a train whose claim lost the exclusivity
    /// race still needs to be routed against the track it asked for, so
    /// that its subsequent matching fixes can reach `submit_fix`'s
    /// co-claim path and the Collision Detector can see both trains, per
    /// `spec.md` §4.4/§8 S2 ("instead, record 5 matching fixes from D2 …
    /// against X"). `TrackBusy` is still returned to the caller — only the
    /// exclusive lock was denied, not the routing.
    pub async fn start(&self, train_id: &str, track_id: &str) -> Result<(), CoreError> {
        self.catalog.get(track_id).await?;
        let train = self.registry.get(TrainSelector::TrainId(train_id)).await?;

        let outcome = self.arbiter.acquire(train_id, &train.device_id, track_id).await;

        self.registry
            .set_selected_track(train_id, Some(track_id.to_string()))
            .await?;
        self.registry
            .set_current_track(train_id, Some(track_id.to_string()))
            .await?;

        if !outcome.granted {
            warn!(train_id, track_id, "trip start denied, track already held by another train");
            return Err(CoreError::TrackBusy { track_id: track_id.to_string() });
        }

        info!(train_id, track_id, "trip started");
        Ok(())
    }

    /// Resolves `track_id` from the train's current state when omitted,
    /// releases the lock, and clears every trip-scoped field. Idempotent
    /// on an already-stopped trip.
    pub async fn stop(&self, train_id: &str, track_id: Option<&str>) -> Result<(), CoreError> {
        let train = self.registry.get(TrainSelector::TrainId(train_id)).await?;

        let resolved = track_id
            .map(|s| s.to_string())
            .or_else(|| train.selected_track_id.clone())
            .or_else(|| train.current_track.clone());

        if let Some(track_id) = &resolved {
            self.arbiter.release(train_id, track_id).await;
        }

        self.registry.clear_trip_fields(train_id).await?;

        // Releasing a lock can resolve a collision for the remaining
        // holder(s); rescan so their alarm state reflects the new holder
        // set rather than staying pinned to the pre-release collision.
        if let Some(track_id) = &resolved {
            let report = CollisionDetector::scan(self.arbiter, track_id).await;
            if report.collision {
                self.apply_collision(&report).await?;
            } else {
                for holder_train in &report.trains {
                    self.registry.clear(holder_train).await?;
                }
            }
        }

        info!(train_id, "trip stopped");
        Ok(())
    }

    /// The fix-ingest composition from the external interface: resolve
    /// train, route to the selected track if a trip is open or the
    /// catalog's fallback `is_active` track otherwise, match, and only
    /// acquire a lock when the match is a locked candidate *and* a trip
    /// is active *and* the matched track is the trip's selected track.
    /// Fallback matches (no trip open) never reach the lock-acquire
    /// branch — that is the boundary that keeps unsolicited telemetry
    /// from forging a collision.
    pub async fn submit_fix(
        &self,
        matcher: &Matcher<'_>,
        device_id: &str,
        fix: &crate::fix::Fix,
    ) -> Result<IngestOutcome, CoreError> {
        if !fix.is_valid() {
            return Err(CoreError::InvalidFix("latitude/longitude missing or out of range".to_string()));
        }

        let train_id = match self.registry.train_id_for_device(device_id).await {
            Some(id) => id,
            None => {
                debug!(device_id, "no train bound to device, dropping fix");
                return Ok(IngestOutcome::no_session());
            }
        };

        let train = self.registry.get(TrainSelector::TrainId(&train_id)).await?;

        let target_track_id = match &train.selected_track_id {
            Some(track_id) => Some(track_id.clone()),
            None => self.catalog.active_track().await.map(|t| t.track_id),
        };

        let Some(track_id) = target_track_id else {
            let reason = CoreError::MissingSession { train_id: train_id.clone() };
            debug!(device_id, %reason, "dropping fix");
            return Ok(IngestOutcome::no_session());
        };

        let track = match self.catalog.get(&track_id).await {
            Ok(track) => track,
            Err(err) => {
                warn!(device_id, track_id, "matcher target track missing: {err}");
                return Ok(IngestOutcome { saved: true, track_match: None, collision: None });
            }
        };

        let track_match = matcher.match_fix(fix, &track).await;

        let trip_active_on_this_track =
            train.selected_track_id.as_deref() == Some(track_id.as_str());

        let collision = if track_match.locked_candidate && trip_active_on_this_track {
            let outcome = self.arbiter.acquire(&train_id, device_id, &track_id).await;
            if outcome.already_held_by_other {
                self.arbiter.record_co_claim(&train_id, device_id, &track_id).await;
            }
            self.registry
                .set_current_track(&train_id, Some(track_id.clone()))
                .await?;

            let report = CollisionDetector::scan(self.arbiter, &track_id).await;
            self.apply_collision(&report).await?;
            Some(report)
        } else {
            None
        };

        Ok(IngestOutcome { saved: true, track_match: Some(track_match), collision })
    }

    async fn apply_collision(&self, report: &CollisionReport) -> Result<(), CoreError> {
        if !report.collision {
            return Ok(());
        }
        let entries: Vec<(String, std::collections::BTreeSet<String>)> = report
            .trains
            .iter()
            .map(|t| {
                let peers = report
                    .trains
                    .iter()
                    .filter(|&other| other != t)
                    .cloned()
                    .collect();
                (t.clone(), peers)
            })
            .collect();
        self.registry.set_collision(entries).await;
        Ok(())
    }
}

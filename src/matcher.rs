use serde::{Deserialize, Serialize};

use crate::catalog::Track;
use crate::config::Config;
use crate::fix::Fix;
use crate::geodesy::distance;
use crate::match_store::MatchStateStore;

/// Result of matching one fix against one polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub distance_m: f64,
    pub track_index: Option<usize>,
    pub consecutive: u32,
    pub locked_candidate: bool,
    pub reason: Option<String>,
}

impl MatchResult {
    fn unmatched(distance_m: f64, reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            distance_m,
            track_index: None,
            consecutive: 0,
            locked_candidate: false,
            reason: Some(reason.into()),
        }
    }
}

pub struct Matcher<'a> {
    config: &'a Config,
    state: &'a MatchStateStore,
}

impl<'a> Matcher<'a> {
    pub fn new(config: &'a Config, state: &'a MatchStateStore) -> Self {
        Self { config, state }
    }

    /// Finds the nearest vertex on `track` to `fix`, then applies the
    /// counter-update policy for the device. Ties between vertices at an
    /// equal distance are broken by lowest index by scanning in order and
    /// only replacing the best-so-far on a strictly smaller distance.
    pub async fn match_fix(&self, fix: &Fix, track: &Track) -> MatchResult {
        if track.vertices.is_empty() {
            return MatchResult::unmatched(f64::INFINITY, "track has no vertices");
        }

        let point = fix.point();

        let mut best_index = 0usize;
        let mut best_distance = f64::INFINITY;
        for (i, &(lat, lon)) in track.vertices.iter().enumerate() {
            let d = distance(point, crate::geodesy::LatLon::new(lat, lon));
            if d < best_distance {
                best_distance = d;
                best_index = i;
            }
        }

        if best_distance > self.config.match_threshold_meters {
            self.state.reset(&fix.device_id).await;
            return MatchResult::unmatched(best_distance, "outside match threshold");
        }

        let consecutive = self
            .state
            .record_match(&fix.device_id, &track.track_id, best_index)
            .await;

        MatchResult {
            matched: true,
            distance_m: best_distance,
            track_index: Some(best_index),
            consecutive,
            locked_candidate: consecutive >= self.config.required_consecutive_matches,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn track(vertices: Vec<(f64, f64)>) -> Track {
        Track {
            track_id: "X".to_string(),
            name: "Test Track".to_string(),
            start_station: None,
            end_station: None,
            vertices,
            is_active: false,
            created_at: Utc::now(),
        }
    }

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

    #[tokio::test]
    async fn exact_vertex_hit_matches_with_zero_distance() {
        let config = Config::default();
        let state = MatchStateStore::new();
        let matcher = Matcher::new(&config, &state);
        let t = track(vec![(0.0, 0.0), (0.0001, 0.0)]);

        let result = matcher.match_fix(&fix_at("D1", 0.0, 0.0), &t).await;
        assert!(result.matched);
        assert_eq!(result.track_index, Some(0));
        assert_eq!(result.consecutive, 1);
    }

    #[tokio::test]
    async fn distance_exactly_at_threshold_matches() {
        let mut config = Config::default();
        config.match_threshold_meters = 0.0;
        let state = MatchStateStore::new();
        let matcher = Matcher::new(&config, &state);
        let t = track(vec![(0.0, 0.0), (1.0, 1.0)]);

        let result = matcher.match_fix(&fix_at("D1", 0.0, 0.0), &t).await;
        assert!(result.matched, "distance 0 should match a 0 m threshold");
    }

    #[tokio::test]
    async fn streak_reaches_locked_candidate_at_k() {
        let mut config = Config::default();
        config.required_consecutive_matches = 5;
        let state = MatchStateStore::new();
        let matcher = Matcher::new(&config, &state);
        let t = track(vec![(0.0, 0.0), (0.0001, 0.0)]);

        let mut last = matcher.match_fix(&fix_at("D1", 0.0, 0.0), &t).await;
        for _ in 0..3 {
            last = matcher.match_fix(&fix_at("D1", 0.0, 0.0), &t).await;
        }
        assert_eq!(last.consecutive, 4);
        assert!(!last.locked_candidate);

        last = matcher.match_fix(&fix_at("D1", 0.0, 0.0), &t).await;
        assert_eq!(last.consecutive, 5);
        assert!(last.locked_candidate);
    }

    #[tokio::test]
    async fn one_unmatched_fix_resets_the_streak() {
        let config = Config::default();
        let state = MatchStateStore::new();
        let matcher = Matcher::new(&config, &state);
        let t = track(vec![(0.0, 0.0), (0.0001, 0.0)]);

        matcher.match_fix(&fix_at("D1", 0.0, 0.0), &t).await;
        matcher.match_fix(&fix_at("D1", 0.0, 0.0), &t).await;

        let far = matcher.match_fix(&fix_at("D1", 10.0, 10.0), &t).await;
        assert!(!far.matched);

        let restarted = matcher.match_fix(&fix_at("D1", 0.0, 0.0), &t).await;
        assert_eq!(restarted.consecutive, 1);
    }

    #[tokio::test]
    async fn two_vertex_polyline_only_ever_returns_index_zero_or_one() {
        let config = Config::default();
        let state = MatchStateStore::new();
        let matcher = Matcher::new(&config, &state);
        let t = track(vec![(0.0, 0.0), (0.0005, 0.0)]);

        for &(lat, lon) in &[(0.0, 0.0), (0.0001, 0.0), (0.0003, 0.0), (0.0005, 0.0)] {
            let result = matcher.match_fix(&fix_at("D1", lat, lon), &t).await;
            if let Some(idx) = result.track_index {
                assert!(idx == 0 || idx == 1);
            }
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::lock::Arbiter;

/// `collision` is true iff two or more distinct trains hold the named
/// track. Invoked only after a successful lock operation on that track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionReport {
    pub collision: bool,
    pub trains: Vec<String>,
    pub devices: Vec<String>,
}

pub struct CollisionDetector;

impl CollisionDetector {
    pub async fn scan(arbiter: &Arbiter, track_id: &str) -> CollisionReport {
        let holders = arbiter.holders(track_id).await;
        let trains: Vec<String> = holders.iter().map(|h| h.train_id.clone()).collect();
        let devices: Vec<String> = holders.iter().map(|h| h.device_id.clone()).collect();
        CollisionReport {
            collision: trains.len() >= 2,
            trains,
            devices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_holder_is_not_a_collision() {
        let arbiter = Arbiter::new();
        arbiter.acquire("T1", "D1", "X").await;
        let report = CollisionDetector::scan(&arbiter, "X").await;
        assert!(!report.collision);
    }

    #[tokio::test]
    async fn two_holders_is_a_collision() {
        let arbiter = Arbiter::new();
        arbiter.acquire("T1", "D1", "X").await;
        arbiter.record_co_claim("T2", "D2", "X").await;
        let report = CollisionDetector::scan(&arbiter, "X").await;
        assert!(report.collision);
        assert_eq!(report.trains.len(), 2);
    }

    #[tokio::test]
    async fn empty_track_is_not_a_collision() {
        let arbiter = Arbiter::new();
        let report = CollisionDetector::scan(&arbiter, "X").await;
        assert!(!report.collision);
        assert!(report.trains.is_empty());
    }
}

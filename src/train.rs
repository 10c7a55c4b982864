use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::shard::ShardedMap;

/// A train's mutable state tuple. `active` MUST equal `collision_detected`
/// at every observable moment — the alarm is a strict function of
/// collision, never of mere track occupancy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Train {
    pub train_id: String,
    pub device_id: String,
    pub active: bool,
    pub collision_detected: bool,
    pub current_track: Option<String>,
    pub selected_track_id: Option<String>,
    pub collision_with: BTreeSet<String>,
}

impl Train {
    fn new(train_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            train_id: train_id.into(),
            device_id: device_id.into(),
            active: false,
            collision_detected: false,
            current_track: None,
            selected_track_id: None,
            collision_with: BTreeSet::new(),
        }
    }
}

/// Maps device ↔ train identity and holds each train's alarm state.
/// Sharded by `train_id`; the `device_id -> train_id` binding is a
/// small side index rebuilt from the same shards on restore.
pub struct Registry {
    trains: ShardedMap<String, Train>,
    device_index: ShardedMap<String, String>,
}

/// Looks up a train either by its own identity or by the device bound to it.
pub enum TrainSelector<'a> {
    TrainId(&'a str),
    DeviceId(&'a str),
}

impl Registry {
    pub fn new() -> Self {
        Self {
            trains: ShardedMap::new(),
            device_index: ShardedMap::new(),
        }
    }

    pub async fn restore(&self, trains: Vec<Train>) {
        for train in trains {
            self.device_index
                .insert(train.device_id.clone(), train.train_id.clone())
                .await;
            self.trains.insert(train.train_id.clone(), train).await;
        }
    }

    /// Registers a new train bound to `device_id`, or returns the existing
    /// one if `train_id` is already known.
    pub async fn bind(&self, train_id: &str, device_id: &str) -> Train {
        if let Some(existing) = self.trains.get(&train_id.to_string()).await {
            return existing;
        }
        let train = Train::new(train_id, device_id);
        self.device_index
            .insert(device_id.to_string(), train_id.to_string())
            .await;
        self.trains.insert(train_id.to_string(), train.clone()).await;
        train
    }

    pub async fn get(&self, selector: TrainSelector<'_>) -> Result<Train, CoreError> {
        let train_id = match selector {
            TrainSelector::TrainId(id) => id.to_string(),
            TrainSelector::DeviceId(device_id) => self
                .device_index
                .get(&device_id.to_string())
                .await
                .ok_or_else(|| CoreError::UnknownTrain(format!("no train bound to device {device_id}")))?,
        };
        self.trains
            .get(&train_id)
            .await
            .ok_or(CoreError::UnknownTrain(train_id))
    }

    pub async fn train_id_for_device(&self, device_id: &str) -> Option<String> {
        self.device_index.get(&device_id.to_string()).await
    }

    pub async fn list(&self) -> Vec<Train> {
        self.trains.snapshot().await
    }

    pub async fn set_selected_track(&self, train_id: &str, track_id: Option<String>) -> Result<(), CoreError> {
        self.mutate(train_id, |t| t.selected_track_id = track_id).await
    }

    pub async fn set_current_track(&self, train_id: &str, track_id: Option<String>) -> Result<(), CoreError> {
        self.mutate(train_id, |t| t.current_track = track_id).await
    }

    /// Sets the alarm for every train named in `trains_with_peers`,
    /// deterministically sorted by `train_id` to avoid lock-order
    /// inversion against a concurrent multi-train update.
    pub async fn set_collision(&self, trains_with_peers: Vec<(String, BTreeSet<String>)>) {
        let mut ordered = trains_with_peers;
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        for (train_id, peers) in ordered {
            let _ = self
                .mutate(&train_id, |t| {
                    t.active = true;
                    t.collision_detected = true;
                    t.collision_with = peers;
                })
                .await;
        }
    }

    /// Fully clears a train's alarm and trip-scoped fields — used both by
    /// `stop_trip` and by a solo-survivor's implicit clear once it's the
    /// only holder left.
    pub async fn clear(&self, train_id: &str) -> Result<(), CoreError> {
        self.mutate(train_id, |t| {
            t.active = false;
            t.collision_detected = false;
            t.collision_with.clear();
        })
        .await
    }

    pub async fn clear_trip_fields(&self, train_id: &str) -> Result<(), CoreError> {
        self.mutate(train_id, |t| {
            t.active = false;
            t.collision_detected = false;
            t.collision_with.clear();
            t.current_track = None;
            t.selected_track_id = None;
        })
        .await
    }

    async fn mutate(&self, train_id: &str, f: impl FnOnce(&mut Train)) -> Result<(), CoreError> {
        let key = train_id.to_string();
        self.trains
            .with_entry(&key, |map| match map.get_mut(train_id) {
                Some(train) => {
                    f(train);
                    Ok(())
                }
                None => Err(CoreError::UnknownTrain(train_id.to_string())),
            })
            .await
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

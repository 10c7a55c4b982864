use thiserror::Error;

/// Stable, matchable error tags surfaced to callers of [`crate::engine::Engine`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid fix: {0}")]
    InvalidFix(String),

    #[error("no recording trip is open for train {train_id}")]
    MissingSession { train_id: String },

    #[error("unknown train: {0}")]
    UnknownTrain(String),

    #[error("unknown track: {0}")]
    UnknownTrack(String),

    #[error("track {track_id} is already held by another train")]
    TrackBusy { track_id: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

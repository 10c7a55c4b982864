//! Map-matching and collision-arbitration engine for railway-safety
//! tracking devices: ingests GPS fixes, matches them against stored track
//! polylines, arbitrates exclusive track ownership, and raises a
//! collision alarm whenever two or more trains hold the same track.
//!
//! The HTTP surface, document store backend, CSV upload parsing, and
//! recording-session bookkeeping are external collaborators — see
//! [`Engine`] for the interface they call.

pub mod catalog;
pub mod collision;
pub mod config;
pub mod csv;
pub mod engine;
pub mod error;
pub mod fix;
pub mod geodesy;
pub mod lock;
pub mod match_store;
pub mod matcher;
mod shard;
pub mod store;
pub mod train;
pub mod trip;

pub use config::Config;
pub use engine::Engine;
pub use error::CoreError;
pub use fix::Fix;
pub use train::{Train, TrainSelector};

//! Streaming: spatial grid, chunk ownership and per-player entity streaming.
//!
//! The client protocol caps how many entities one client may have spawned, so
//! the [`Streamer`] keeps, for every player, the subset of world entities that
//! matters to it and only issues create/destroy calls for what changed.
//!
//! # Invariants
//! - Every tracked entity belongs to exactly one [`Chunk`].
//! - Empty grid chunks are collected as soon as they empty.
//! - Shared actors (vehicles, global objects) are spawned while their
//!   visibility score is positive; per-player objects are capped per player.

mod backend;
mod chunk;
mod config;
mod context;
mod entity;
mod error;
mod grid;
mod select;
mod streamer;
mod throttle;

#[cfg(test)]
mod scenarios;

pub use backend::{BackendCall, RecordingBackend, StreamBackend};
pub use chunk::Chunk;
pub use config::StreamConfig;
pub use context::ServerContext;
pub use entity::{
    ActorState, CheckpointKind, CheckpointState, CheckpointWrapper, EntityKey, GlobalObjectKind,
    GlobalObjectWrapper, Kind, PersonalObjectKind, PersonalObjectWrapper, PersonalState,
    PlayerKind, PlayerState, PlayerWrapper, SharedActor, StreamedEntity, UniversalObjectKind,
    UniversalObjectWrapper, VehicleKind, VehicleWrapper, ZoneRules,
};
pub use error::{ConfigError, StreamError};
pub use grid::{CellCoord, ChunkSlot, SpatialGrid};
pub use select::{Candidate, SpawnDiff, select_nearest};
pub use streamer::Streamer;
pub use throttle::{PassHistory, UpdateStats, UpdateThrottle};

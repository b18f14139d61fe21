//! World Kernel: the server's entity pools and the notifications they emit.
//!
//! # Invariants
//! - Every join, leave and script-driven move is recorded as a [`WorldEvent`].
//! - Client-driven movement (players, vehicles) is silent; observers poll it.
//! - Pools iterate in id order.

pub mod entity;
pub mod world;

pub use entity::{Checkpoint, MapObject, Player, Vehicle};
pub use world::{World, WorldEvent};

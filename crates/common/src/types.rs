use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! pool_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $tag, self.0)
            }
        }
    };
}

pool_id!(
    /// Slot of a connected player in the player pool.
    PlayerId,
    "player"
);
pool_id!(
    /// Slot of a vehicle (static or dynamic) in the vehicle pool.
    VehicleId,
    "vehicle"
);
pool_id!(
    /// Slot of a map object. Global, personal and universal objects share this id space.
    ObjectId,
    "object"
);
pool_id!(
    /// Slot of a per-player checkpoint.
    CheckpointId,
    "checkpoint"
);

/// Where an entity logically is for visibility purposes.
///
/// Two placements only "see" each other when the world and interior rules of
/// the observed entity admit the observer; see [`crate::VisibilityRules`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub location: Vec3,
    pub world: i32,
    pub interior: i32,
}

impl Placement {
    pub fn new(location: Vec3, world: i32, interior: i32) -> Self {
        Self {
            location,
            world,
            interior,
        }
    }

    /// A placement in world 0, interior 0.
    pub fn at(location: Vec3) -> Self {
        Self::new(location, 0, 0)
    }

    /// Squared distance between the two locations. World and interior are ignored.
    pub fn distance_squared(&self, other: &Placement) -> f32 {
        self.location.distance_squared(other.location)
    }

    pub fn with_location(self, location: Vec3) -> Self {
        Self { location, ..self }
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// How a map object is streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectScope {
    /// Shared world actor, spawned once for everyone while any player looks at it.
    Global,
    /// Streamed only to its owner, counted against the per-player object cap.
    Personal { owner: PlayerId },
    /// Streamed to every player in range, counted against each player's cap.
    Universal,
}

/// A shared world actor whose client-side presence is gated by its visibility score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActorRef {
    Vehicle(VehicleId),
    Object(ObjectId),
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vehicle(id) => id.fmt(f),
            Self::Object(id) => id.fmt(f),
        }
    }
}

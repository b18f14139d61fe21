//! Shared value types: pool ids, placements and visibility rules.

mod rules;
mod types;

pub use rules::{VisibilityRules, ZoneFilter};
pub use types::{ActorRef, CheckpointId, ObjectId, ObjectScope, Placement, PlayerId, VehicleId};

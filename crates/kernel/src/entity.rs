use gamestream_common::{
    CheckpointId, ObjectId, ObjectScope, Placement, PlayerId, VehicleId, VisibilityRules,
};
use serde::{Deserialize, Serialize};

/// A connected player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub placement: Placement,
}

/// A vehicle. Static vehicles are placed at startup and respawn in place,
/// but stream exactly like dynamic ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub model: u16,
    pub placement: Placement,
    pub is_static: bool,
    pub rules: VisibilityRules,
}

/// A map decoration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapObject {
    pub id: ObjectId,
    pub model: i32,
    pub scope: ObjectScope,
    pub placement: Placement,
    pub rules: VisibilityRules,
}

/// A race or mission checkpoint shown to a single player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub owner: PlayerId,
    pub placement: Placement,
    pub size: f32,
}

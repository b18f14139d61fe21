use gamestream_common::{
    CheckpointId, ObjectId, ObjectScope, Placement, PlayerId, VehicleId, VisibilityRules,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entity::{Checkpoint, MapObject, Player, Vehicle};

/// A notification produced by a pool mutation.
///
/// The server adapter drains these and forwards them to the streamer in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    PlayerConnected {
        id: PlayerId,
        placement: Placement,
    },
    PlayerDisconnected {
        id: PlayerId,
    },
    VehicleCreated {
        id: VehicleId,
        placement: Placement,
        rules: VisibilityRules,
    },
    VehicleDestroyed {
        id: VehicleId,
    },
    ObjectCreated {
        id: ObjectId,
        scope: ObjectScope,
        placement: Placement,
        rules: VisibilityRules,
    },
    ObjectMoved {
        id: ObjectId,
        scope: ObjectScope,
        placement: Placement,
    },
    ObjectDestroyed {
        id: ObjectId,
        scope: ObjectScope,
    },
    CheckpointCreated {
        id: CheckpointId,
        owner: PlayerId,
        placement: Placement,
    },
    CheckpointMoved {
        id: CheckpointId,
        placement: Placement,
    },
    CheckpointDestroyed {
        id: CheckpointId,
    },
    /// The server advanced one tick.
    Stepped {
        tick: u64,
    },
}

/// The server's entity pools.
///
/// Ids are handed out sequentially per pool and never reused within a session.
#[derive(Debug, Clone, Default)]
pub struct World {
    players: BTreeMap<PlayerId, Player>,
    vehicles: BTreeMap<VehicleId, Vehicle>,
    objects: BTreeMap<ObjectId, MapObject>,
    checkpoints: BTreeMap<CheckpointId, Checkpoint>,
    next_player: u32,
    next_vehicle: u32,
    next_object: u32,
    next_checkpoint: u32,
    tick: u64,
    event_log: Vec<WorldEvent>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current server tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance the server by one tick.
    pub fn step(&mut self) {
        self.tick += 1;
        self.event_log.push(WorldEvent::Stepped { tick: self.tick });
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Read-only access to the pending events.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    // --- Players ---

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn connect_player(&mut self, name: impl Into<String>, placement: Placement) -> PlayerId {
        let id = PlayerId(self.next_player);
        self.next_player += 1;
        self.players.insert(
            id,
            Player {
                id,
                name: name.into(),
                placement,
            },
        );
        tracing::debug!(%id, "player connected");
        self.event_log
            .push(WorldEvent::PlayerConnected { id, placement });
        id
    }

    /// Disconnect a player. Their personal objects and checkpoints are destroyed
    /// first, so observers see those leave while the owner is still present.
    pub fn disconnect_player(&mut self, id: PlayerId) -> Option<Player> {
        if !self.players.contains_key(&id) {
            return None;
        }
        let owned: Vec<ObjectId> = self
            .objects
            .values()
            .filter(|o| o.scope == ObjectScope::Personal { owner: id })
            .map(|o| o.id)
            .collect();
        for object in owned {
            self.destroy_object(object);
        }
        let checkpoints: Vec<CheckpointId> = self
            .checkpoints
            .values()
            .filter(|c| c.owner == id)
            .map(|c| c.id)
            .collect();
        for checkpoint in checkpoints {
            self.destroy_checkpoint(checkpoint);
        }

        let player = self.players.remove(&id);
        tracing::debug!(%id, "player disconnected");
        self.event_log.push(WorldEvent::PlayerDisconnected { id });
        player
    }

    /// Client-driven movement. Emits no event.
    pub fn set_player_placement(&mut self, id: PlayerId, placement: Placement) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.placement = placement;
                true
            }
            None => false,
        }
    }

    // --- Vehicles ---

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn create_vehicle(&mut self, model: u16, placement: Placement, is_static: bool) -> VehicleId {
        let id = VehicleId(self.next_vehicle);
        self.next_vehicle += 1;
        let rules = VisibilityRules::vehicle();
        self.vehicles.insert(
            id,
            Vehicle {
                id,
                model,
                placement,
                is_static,
                rules: rules.clone(),
            },
        );
        self.event_log.push(WorldEvent::VehicleCreated {
            id,
            placement,
            rules,
        });
        id
    }

    pub fn destroy_vehicle(&mut self, id: VehicleId) -> Option<Vehicle> {
        let vehicle = self.vehicles.remove(&id);
        if vehicle.is_some() {
            self.event_log.push(WorldEvent::VehicleDestroyed { id });
        }
        vehicle
    }

    /// Client-driven movement. Emits no event.
    pub fn set_vehicle_placement(&mut self, id: VehicleId, placement: Placement) -> bool {
        match self.vehicles.get_mut(&id) {
            Some(vehicle) => {
                vehicle.placement = placement;
                true
            }
            None => false,
        }
    }

    // --- Objects ---

    pub fn objects(&self) -> impl Iterator<Item = &MapObject> {
        self.objects.values()
    }

    pub fn object(&self, id: ObjectId) -> Option<&MapObject> {
        self.objects.get(&id)
    }

    /// Create an object with the default object rules (same world, same interior).
    pub fn create_object(&mut self, model: i32, scope: ObjectScope, placement: Placement) -> ObjectId {
        self.create_object_with_rules(model, scope, placement, VisibilityRules::object())
    }

    pub fn create_object_with_rules(
        &mut self,
        model: i32,
        scope: ObjectScope,
        placement: Placement,
        rules: VisibilityRules,
    ) -> ObjectId {
        let id = ObjectId(self.next_object);
        self.next_object += 1;
        self.objects.insert(
            id,
            MapObject {
                id,
                model,
                scope,
                placement,
                rules: rules.clone(),
            },
        );
        self.event_log.push(WorldEvent::ObjectCreated {
            id,
            scope,
            placement,
            rules,
        });
        id
    }

    /// Script-driven movement. Emits [`WorldEvent::ObjectMoved`].
    pub fn move_object(&mut self, id: ObjectId, placement: Placement) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) => {
                object.placement = placement;
                self.event_log.push(WorldEvent::ObjectMoved {
                    id,
                    scope: object.scope,
                    placement,
                });
                true
            }
            None => false,
        }
    }

    pub fn destroy_object(&mut self, id: ObjectId) -> Option<MapObject> {
        let object = self.objects.remove(&id);
        if let Some(ref o) = object {
            self.event_log.push(WorldEvent::ObjectDestroyed { id, scope: o.scope });
        }
        object
    }

    // --- Checkpoints ---

    pub fn checkpoints(&self) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.values()
    }

    /// Show a checkpoint to `owner`. Returns `None` if the owner is not connected.
    pub fn create_checkpoint(
        &mut self,
        owner: PlayerId,
        placement: Placement,
        size: f32,
    ) -> Option<CheckpointId> {
        if !self.players.contains_key(&owner) {
            return None;
        }
        let id = CheckpointId(self.next_checkpoint);
        self.next_checkpoint += 1;
        self.checkpoints.insert(
            id,
            Checkpoint {
                id,
                owner,
                placement,
                size,
            },
        );
        self.event_log.push(WorldEvent::CheckpointCreated {
            id,
            owner,
            placement,
        });
        Some(id)
    }

    pub fn move_checkpoint(&mut self, id: CheckpointId, placement: Placement) -> bool {
        match self.checkpoints.get_mut(&id) {
            Some(checkpoint) => {
                checkpoint.placement = placement;
                self.event_log
                    .push(WorldEvent::CheckpointMoved { id, placement });
                true
            }
            None => false,
        }
    }

    pub fn destroy_checkpoint(&mut self, id: CheckpointId) -> Option<Checkpoint> {
        let checkpoint = self.checkpoints.remove(&id);
        if checkpoint.is_some() {
            self.event_log.push(WorldEvent::CheckpointDestroyed { id });
        }
        checkpoint
    }
}

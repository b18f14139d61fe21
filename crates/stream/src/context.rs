use gamestream_common::ObjectScope;
use gamestream_kernel::{World, WorldEvent};
use std::time::Instant;

use crate::backend::StreamBackend;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::streamer::Streamer;
use crate::throttle::UpdateStats;

/// Top-level server state: the entity pools, the streamer and the client backend.
///
/// This is the adapter between pool notifications and the streamer. Events are
/// forwarded in the order the pools produced them.
#[derive(Debug)]
pub struct ServerContext<B: StreamBackend> {
    world: World,
    streamer: Streamer,
    backend: B,
}

impl<B: StreamBackend> ServerContext<B> {
    pub fn new(config: StreamConfig, backend: B) -> Self {
        Self {
            world: World::new(),
            streamer: Streamer::new(config),
            backend,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable pools. Changes reach the streamer on the next [`Self::pump`] or [`Self::tick`].
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn streamer(&self) -> &Streamer {
        &self.streamer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_parts(self) -> (World, Streamer, B) {
        (self.world, self.streamer, self.backend)
    }

    /// Forward every pending pool event. Returns how many were handled.
    pub fn pump(&mut self) -> Result<usize, StreamError> {
        let events = self.world.drain_events();
        let count = events.len();
        for event in events {
            self.dispatch(event)?;
        }
        Ok(count)
    }

    /// One server tick: advance the pools, forward events, then run the
    /// (throttled) periodic streaming pass.
    pub fn tick(&mut self, now: Instant) -> Result<Option<UpdateStats>, StreamError> {
        self.world.step();
        self.pump()?;
        self.streamer.update(now, &self.world, &mut self.backend)
    }

    pub fn dispatch(&mut self, event: WorldEvent) -> Result<(), StreamError> {
        let backend = &mut self.backend;
        let streamer = &mut self.streamer;
        match event {
            WorldEvent::PlayerConnected { id, placement } => {
                streamer.player_joined(id, placement, backend)
            }
            WorldEvent::PlayerDisconnected { id } => streamer.player_left(id, backend),
            WorldEvent::VehicleCreated {
                id,
                placement,
                rules,
            } => streamer.vehicle_joined(id, placement, rules, backend),
            WorldEvent::VehicleDestroyed { id } => streamer.vehicle_left(id, backend),
            WorldEvent::ObjectCreated {
                id,
                scope,
                placement,
                rules,
            } => match scope {
                ObjectScope::Global => streamer.global_object_joined(id, placement, rules, backend),
                ObjectScope::Personal { owner } => {
                    streamer.personal_object_joined(id, owner, placement, rules)
                }
                ObjectScope::Universal => streamer.universal_object_joined(id, placement, rules),
            },
            WorldEvent::ObjectMoved {
                id,
                scope,
                placement,
            } => match scope {
                ObjectScope::Global => streamer.global_object_moved(id, placement, backend),
                ObjectScope::Personal { .. } => streamer.personal_object_moved(id, placement),
                ObjectScope::Universal => streamer.universal_object_moved(id, placement),
            },
            WorldEvent::ObjectDestroyed { id, scope } => match scope {
                ObjectScope::Global => streamer.global_object_left(id, backend),
                ObjectScope::Personal { .. } => streamer.personal_object_left(id, backend),
                ObjectScope::Universal => streamer.universal_object_left(id, backend),
            },
            WorldEvent::CheckpointCreated {
                id,
                owner,
                placement,
            } => streamer.checkpoint_joined(id, owner, placement),
            WorldEvent::CheckpointMoved { id, placement } => {
                streamer.checkpoint_moved(id, placement)
            }
            WorldEvent::CheckpointDestroyed { id } => streamer.checkpoint_left(id),
            WorldEvent::Stepped { .. } => Ok(()),
        }
    }
}

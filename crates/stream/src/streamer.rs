//! The streaming orchestrator.
//!
//! # Invariants
//! - Every tracked entity is in exactly one chunk: a grid cell, or the world
//!   chunk when its location is outside the grid.
//! - No empty grid cell survives a join, leave or relocation.
//! - A player's spawned-object set never exceeds `max_objects`.
//! - A shared actor's score equals the number of tracked players whose last
//!   placement lies in its visibility zone. Player moves maintain it
//!   incrementally, actor moves recount it; both read tracked placements only,
//!   so the two stay consistent.

use gamestream_common::{
    CheckpointId, ObjectId, Placement, PlayerId, VehicleId, VisibilityRules,
};
use gamestream_kernel::World;
use glam::Vec3;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::backend::StreamBackend;
use crate::chunk::Chunk;
use crate::config::StreamConfig;
use crate::entity::{
    ActorState, CheckpointKind, CheckpointState, EntityKey, GlobalObjectKind, Kind,
    PersonalObjectKind, PersonalState, PlayerKind, PlayerState, SharedActor, StreamedEntity,
    UniversalObjectKind, VehicleKind,
};
use crate::error::StreamError;
use crate::grid::{ChunkSlot, SpatialGrid};
use crate::select::{Candidate, SpawnDiff, select_nearest};
use crate::throttle::{PassHistory, UpdateStats, UpdateThrottle};

const HISTORY_CAPACITY: usize = 64;

/// Owns the spatial grid and decides what every player should see.
#[derive(Debug)]
pub struct Streamer {
    config: StreamConfig,
    grid: SpatialGrid,
    world_chunk: Chunk,
    trackers: HashMap<EntityKey, ChunkSlot>,
    /// Players whose object set must be recomputed at the next pass even if
    /// they did not move.
    stale_players: BTreeSet<PlayerId>,
    throttle: UpdateThrottle,
    history: PassHistory,
}

impl Default for Streamer {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl Streamer {
    /// Create a streamer. `config` should have passed [`StreamConfig::validate`];
    /// a non-positive cell size or grid extent panics.
    pub fn new(config: StreamConfig) -> Self {
        Self {
            grid: SpatialGrid::new(config.cell_size, config.grid_half_extent),
            world_chunk: Chunk::new(ChunkSlot::World),
            trackers: HashMap::new(),
            stale_players: BTreeSet::new(),
            throttle: UpdateThrottle::new(config.update_interval()),
            history: PassHistory::new(HISTORY_CAPACITY),
            config,
        }
    }

    /// Settings the streamer was built with.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The spatial grid of allocated cell chunks.
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// The fallback chunk holding everything outside the grid.
    pub fn world_chunk(&self) -> &Chunk {
        &self.world_chunk
    }

    /// Statistics of the most recent periodic passes.
    pub fn history(&self) -> &PassHistory {
        &self.history
    }

    /// Every live chunk: allocated grid cells, then the world chunk.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.grid
            .chunks()
            .map(|(_, chunk)| chunk)
            .chain(std::iter::once(&self.world_chunk))
    }

    pub fn chunk(&self, slot: ChunkSlot) -> Option<&Chunk> {
        match slot {
            ChunkSlot::Cell(coord) => self.grid.cell(coord),
            ChunkSlot::World => Some(&self.world_chunk),
        }
    }

    fn chunk_mut(&mut self, slot: ChunkSlot) -> Option<&mut Chunk> {
        match slot {
            ChunkSlot::Cell(coord) => self.grid.cell_mut(coord),
            ChunkSlot::World => Some(&mut self.world_chunk),
        }
    }

    fn require_chunk(&mut self, slot: ChunkSlot) -> &mut Chunk {
        match slot {
            ChunkSlot::Cell(coord) => self.grid.require_cell(coord),
            ChunkSlot::World => &mut self.world_chunk,
        }
    }

    /// Drop `slot`'s chunk if it no longer holds anything. The world chunk stays.
    fn collect_if_empty(&mut self, slot: ChunkSlot) {
        if let ChunkSlot::Cell(coord) = slot {
            if self.grid.cell(coord).is_some_and(Chunk::is_empty) {
                self.grid.remove_cell(coord);
            }
        }
    }

    /// The chunk an entity at `location` belongs to.
    pub fn slot_for(&self, location: Vec3) -> ChunkSlot {
        if self.grid.contains_point(location) {
            ChunkSlot::Cell(self.grid.cell_of(location))
        } else {
            ChunkSlot::World
        }
    }

    pub fn is_tracked(&self, key: EntityKey) -> bool {
        self.trackers.contains_key(&key)
    }

    pub fn tracked_slot(&self, key: EntityKey) -> Option<ChunkSlot> {
        self.trackers.get(&key).copied()
    }

    /// Every tracked entity with the chunk it was last assigned to.
    pub fn tracked(&self) -> impl Iterator<Item = (EntityKey, ChunkSlot)> + '_ {
        self.trackers.iter().map(|(k, s)| (*k, *s))
    }

    pub fn tracked_count(&self) -> usize {
        self.trackers.len()
    }

    /// The wrapper attached to `id`. Fails if the entity never joined.
    pub fn wrapper<K: Kind>(&self, id: K::Id) -> Result<&StreamedEntity<K>, StreamError> {
        let key = K::key(id);
        let slot = self.tracked_slot(key).ok_or(StreamError::Untracked(key))?;
        self.chunk(slot)
            .and_then(|chunk| chunk.find::<K>(id))
            .ok_or(StreamError::NotInChunk { key, slot })
    }

    fn wrapper_mut<K: Kind>(&mut self, id: K::Id) -> Result<&mut StreamedEntity<K>, StreamError> {
        let key = K::key(id);
        let slot = self.tracked_slot(key).ok_or(StreamError::Untracked(key))?;
        self.chunk_mut(slot)
            .and_then(|chunk| chunk.find_mut::<K>(id))
            .ok_or(StreamError::NotInChunk { key, slot })
    }

    /// Chunks that may hold entities within `radius` of `location`.
    ///
    /// Uses the axis-aligned cube around `location` rather than the sphere, so
    /// it can return a few chunks with nothing actually in range. The world
    /// chunk is appended whenever the cube leaves the grid.
    pub fn chunks_in_radius(&self, location: Vec3, radius: f32) -> Vec<ChunkSlot> {
        let mut slots: Vec<ChunkSlot> = self
            .grid
            .cells_overlapping(location, radius)
            .into_iter()
            .map(ChunkSlot::Cell)
            .collect();
        if self.grid.cube_exceeds_bounds(location, radius) {
            slots.push(ChunkSlot::World);
        }
        slots
    }

    fn visible_chunks(&self, location: Vec3) -> Vec<ChunkSlot> {
        self.chunks_in_radius(location, self.config.visibility_distance)
    }

    // --- Generic lifecycle ---

    fn attach<K: Kind>(&mut self, wrapper: StreamedEntity<K>) -> Result<ChunkSlot, StreamError> {
        let key = wrapper.key();
        if self.trackers.contains_key(&key) {
            return Err(StreamError::AlreadyTracked(key));
        }
        let slot = self.slot_for(wrapper.placement().location);
        self.require_chunk(slot).intercept(wrapper);
        self.trackers.insert(key, slot);
        tracing::debug!(%key, %slot, "tracking");
        Ok(slot)
    }

    fn detach<K: Kind>(&mut self, id: K::Id) -> Result<StreamedEntity<K>, StreamError> {
        let key = K::key(id);
        let slot = self.trackers.remove(&key).ok_or(StreamError::Untracked(key))?;
        let wrapper = self
            .chunk_mut(slot)
            .and_then(|chunk| chunk.release::<K>(id))
            .ok_or(StreamError::NotInChunk { key, slot })?;
        self.collect_if_empty(slot);
        tracing::debug!(%key, %slot, "untracking");
        Ok(wrapper)
    }

    /// Record `placement` and move the wrapper if it crossed a chunk boundary.
    fn relocate<K: Kind>(&mut self, id: K::Id, placement: Placement) -> Result<(), StreamError> {
        let key = K::key(id);
        let from = self.tracked_slot(key).ok_or(StreamError::Untracked(key))?;
        let to = self.slot_for(placement.location);
        if from == to {
            self.wrapper_mut::<K>(id)?.set_placement(placement);
            return Ok(());
        }

        let mut wrapper = self
            .chunk_mut(from)
            .and_then(|chunk| chunk.release::<K>(id))
            .ok_or(StreamError::NotInChunk { key, slot: from })?;
        wrapper.set_placement(placement);
        self.require_chunk(to).intercept(wrapper);
        self.trackers.insert(key, to);
        self.collect_if_empty(from);
        tracing::trace!(%key, %from, %to, "crossed chunk boundary");
        Ok(())
    }

    fn apply_visibility_in(&mut self, slots: &[ChunkSlot], backend: &mut dyn StreamBackend) {
        for &slot in slots {
            if let Some(chunk) = self.chunk_mut(slot) {
                chunk.apply_global_actors_visibility(backend);
            }
        }
    }

    // --- Players ---

    pub fn player_joined(
        &mut self,
        id: PlayerId,
        placement: Placement,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.attach(StreamedEntity::<PlayerKind>::new(
            id,
            placement,
            PlayerState::default(),
        ))?;

        // Nothing precedes a join, so this is the only place a new player is
        // counted by the actors around it.
        let radius_sq = self.config.visibility_distance_squared();
        let around = self.visible_chunks(placement.location);
        for &slot in &around {
            if let Some(chunk) = self.chunk_mut(slot) {
                chunk.add_score_around_player(&placement, radius_sq, backend);
            }
        }
        self.apply_visibility_in(&around, backend);
        self.refresh_player_objects(id, backend)?;
        tracing::debug!(%id, chunks = around.len(), "player joined");
        Ok(())
    }

    pub fn player_left(
        &mut self,
        id: PlayerId,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        let placement = *self.wrapper::<PlayerKind>(id)?.placement();
        let radius_sq = self.config.visibility_distance_squared();
        let around = self.visible_chunks(placement.location);
        for &slot in &around {
            if let Some(chunk) = self.chunk_mut(slot) {
                chunk.subtract_score_around_player(&placement, radius_sq, backend);
            }
        }
        self.apply_visibility_in(&around, backend);

        let spawned = std::mem::take(&mut self.wrapper_mut::<PlayerKind>(id)?.state.spawned_objects);
        for object in spawned {
            backend.despawn_for(id, object);
        }
        self.detach::<PlayerKind>(id)?;
        self.stale_players.remove(&id);
        tracing::debug!(%id, "player left");
        Ok(())
    }

    /// The hot path: re-score the actors around both placements, move the
    /// wrapper, then reselect the player's objects.
    pub fn player_moved(
        &mut self,
        id: PlayerId,
        placement: Placement,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        let previous = *self.wrapper::<PlayerKind>(id)?.placement();
        let radius_sq = self.config.visibility_distance_squared();
        let previous_chunks = self.visible_chunks(previous.location);
        let current_chunks = self.visible_chunks(placement.location);

        // Add before subtract: an actor visible from both placements must not
        // pass through zero and flicker.
        for &slot in &current_chunks {
            if let Some(chunk) = self.chunk_mut(slot) {
                chunk.add_score_around_player(&placement, radius_sq, backend);
            }
        }
        for &slot in &previous_chunks {
            if let Some(chunk) = self.chunk_mut(slot) {
                chunk.subtract_score_around_player(&previous, radius_sq, backend);
            }
        }

        let mut affected = current_chunks;
        affected.extend(previous_chunks);
        affected.sort();
        affected.dedup();
        self.apply_visibility_in(&affected, backend);

        self.relocate::<PlayerKind>(id, placement)?;
        self.refresh_player_objects(id, backend)?;
        self.stale_players.remove(&id);
        Ok(())
    }

    /// Reselect the per-player objects `id` should see and diff against what
    /// is spawned. Despawns are issued before spawns.
    pub fn refresh_player_objects(
        &mut self,
        id: PlayerId,
        backend: &mut dyn StreamBackend,
    ) -> Result<SpawnDiff, StreamError> {
        let observer = *self.wrapper::<PlayerKind>(id)?.placement();
        let radius_sq = self.config.visibility_distance_squared();

        let mut candidates = Vec::new();
        for slot in self.visible_chunks(observer.location) {
            let Some(chunk) = self.chunk(slot) else {
                continue;
            };
            candidates.extend(
                chunk
                    .universal_objects()
                    .iter()
                    .filter(|o| o.is_player_in_visibility_zone(&observer, radius_sq))
                    .map(|o| Candidate {
                        object: o.id(),
                        distance_sq: o.placement().distance_squared(&observer),
                    }),
            );
            candidates.extend(
                chunk
                    .personal_objects()
                    .iter()
                    .filter(|o| {
                        o.owner() == id && o.is_player_in_visibility_zone(&observer, radius_sq)
                    })
                    .map(|o| Candidate {
                        object: o.id(),
                        distance_sq: o.placement().distance_squared(&observer),
                    }),
            );
        }
        let eligible = candidates.len();
        let selected = select_nearest(candidates, self.config.max_objects);

        let player = self.wrapper_mut::<PlayerKind>(id)?;
        let diff = SpawnDiff::between(&player.state.spawned_objects, &selected);
        player.state.spawned_objects = selected;

        for &object in &diff.despawn {
            backend.despawn_for(id, object);
        }
        for &object in &diff.spawn {
            backend.spawn_for(id, object);
        }
        if !diff.is_empty() {
            tracing::trace!(
                %id,
                eligible,
                spawned = diff.spawn.len(),
                despawned = diff.despawn.len(),
                "object set changed"
            );
        }
        Ok(diff)
    }

    /// Queue the players around `location` for an object refresh at the next pass.
    fn mark_observers_around(&mut self, location: Vec3) {
        let observers: Vec<PlayerId> = self
            .visible_chunks(location)
            .into_iter()
            .filter_map(|slot| self.chunk(slot))
            .flat_map(|chunk| chunk.players().iter().map(|p| p.id()))
            .collect();
        self.stale_players.extend(observers);
    }

    fn mark_owner(&mut self, owner: PlayerId) {
        if self.is_tracked(EntityKey::Player(owner)) {
            self.stale_players.insert(owner);
        }
    }

    /// Remove a departed object from the spawned sets of `players`.
    fn forget_object(
        &mut self,
        object: ObjectId,
        players: Vec<PlayerId>,
        backend: &mut dyn StreamBackend,
    ) {
        for player in players {
            if let Ok(wrapper) = self.wrapper_mut::<PlayerKind>(player) {
                if wrapper.state.spawned_objects.remove(&object) {
                    backend.despawn_for(player, object);
                }
            }
        }
    }

    fn tracked_players(&self) -> Vec<PlayerId> {
        self.trackers
            .keys()
            .filter_map(|key| match key {
                EntityKey::Player(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    // --- Shared actors ---

    fn actor_joined<K: SharedActor>(
        &mut self,
        id: K::Id,
        placement: Placement,
        rules: VisibilityRules,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.attach(StreamedEntity::<K>::new(id, placement, ActorState::new(rules)))?;
        self.actor_moved::<K>(id, placement, backend)
    }

    /// Recount the actor's score from the players around its new placement.
    fn actor_moved<K: SharedActor>(
        &mut self,
        id: K::Id,
        placement: Placement,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.wrapper_mut::<K>(id)?.set_placement(placement);
        let radius_sq = self.config.visibility_distance_squared();

        let score = {
            let actor = self.wrapper::<K>(id)?;
            self.visible_chunks(placement.location)
                .into_iter()
                .filter_map(|slot| self.chunk(slot))
                .flat_map(|chunk| chunk.players())
                .filter(|p| actor.is_player_in_visibility_zone(p.placement(), radius_sq))
                .count() as u32
        };

        let actor = self.wrapper_mut::<K>(id)?;
        actor.set_visibility_index(score, backend);
        actor.apply_visibility(backend);

        self.relocate::<K>(id, placement)
    }

    fn actor_left<K: SharedActor>(
        &mut self,
        id: K::Id,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        let mut actor = self.detach::<K>(id)?;
        actor.force_despawn(backend);
        Ok(())
    }

    pub fn vehicle_joined(
        &mut self,
        id: VehicleId,
        placement: Placement,
        rules: VisibilityRules,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.actor_joined::<VehicleKind>(id, placement, rules, backend)
    }

    pub fn vehicle_moved(
        &mut self,
        id: VehicleId,
        placement: Placement,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.actor_moved::<VehicleKind>(id, placement, backend)
    }

    pub fn vehicle_left(
        &mut self,
        id: VehicleId,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.actor_left::<VehicleKind>(id, backend)
    }

    pub fn global_object_joined(
        &mut self,
        id: ObjectId,
        placement: Placement,
        rules: VisibilityRules,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.actor_joined::<GlobalObjectKind>(id, placement, rules, backend)
    }

    pub fn global_object_moved(
        &mut self,
        id: ObjectId,
        placement: Placement,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.actor_moved::<GlobalObjectKind>(id, placement, backend)
    }

    pub fn global_object_left(
        &mut self,
        id: ObjectId,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.actor_left::<GlobalObjectKind>(id, backend)
    }

    // --- Per-player objects and checkpoints ---
    //
    // Their own movement only relocates them; what a player sees is decided
    // when that player is refreshed.

    pub fn personal_object_joined(
        &mut self,
        id: ObjectId,
        owner: PlayerId,
        placement: Placement,
        rules: VisibilityRules,
    ) -> Result<(), StreamError> {
        self.attach(StreamedEntity::<PersonalObjectKind>::new(
            id,
            placement,
            PersonalState::new(owner, rules),
        ))?;
        self.mark_owner(owner);
        Ok(())
    }

    pub fn personal_object_moved(
        &mut self,
        id: ObjectId,
        placement: Placement,
    ) -> Result<(), StreamError> {
        let owner = self.wrapper::<PersonalObjectKind>(id)?.owner();
        self.relocate::<PersonalObjectKind>(id, placement)?;
        self.mark_owner(owner);
        Ok(())
    }

    pub fn personal_object_left(
        &mut self,
        id: ObjectId,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        let object = self.detach::<PersonalObjectKind>(id)?;
        self.forget_object(id, vec![object.owner()], backend);
        Ok(())
    }

    pub fn universal_object_joined(
        &mut self,
        id: ObjectId,
        placement: Placement,
        rules: VisibilityRules,
    ) -> Result<(), StreamError> {
        self.attach(StreamedEntity::<UniversalObjectKind>::new(id, placement, rules))?;
        self.mark_observers_around(placement.location);
        Ok(())
    }

    pub fn universal_object_moved(
        &mut self,
        id: ObjectId,
        placement: Placement,
    ) -> Result<(), StreamError> {
        let previous = *self.wrapper::<UniversalObjectKind>(id)?.placement();
        self.relocate::<UniversalObjectKind>(id, placement)?;
        self.mark_observers_around(previous.location);
        self.mark_observers_around(placement.location);
        Ok(())
    }

    pub fn universal_object_left(
        &mut self,
        id: ObjectId,
        backend: &mut dyn StreamBackend,
    ) -> Result<(), StreamError> {
        self.detach::<UniversalObjectKind>(id)?;
        let players = self.tracked_players();
        self.forget_object(id, players, backend);
        Ok(())
    }

    pub fn checkpoint_joined(
        &mut self,
        id: CheckpointId,
        owner: PlayerId,
        placement: Placement,
    ) -> Result<(), StreamError> {
        self.attach(StreamedEntity::<CheckpointKind>::new(
            id,
            placement,
            CheckpointState::new(owner),
        ))
        .map(|_| ())
    }

    pub fn checkpoint_moved(
        &mut self,
        id: CheckpointId,
        placement: Placement,
    ) -> Result<(), StreamError> {
        self.relocate::<CheckpointKind>(id, placement)
    }

    pub fn checkpoint_left(&mut self, id: CheckpointId) -> Result<(), StreamError> {
        self.detach::<CheckpointKind>(id).map(|_| ())
    }

    // --- Periodic pass ---

    /// Poll every player and vehicle for movement since the last pass, then
    /// refresh players queued by object changes.
    ///
    /// Runs at most once per `update_interval`; returns `None` when throttled.
    /// Every entity in `world` must already have joined.
    pub fn update(
        &mut self,
        now: Instant,
        world: &World,
        backend: &mut dyn StreamBackend,
    ) -> Result<Option<UpdateStats>, StreamError> {
        if !self.throttle.try_begin(now) {
            return Ok(None);
        }
        let _span = tracing::info_span!("stream_update").entered();
        let started = Instant::now();
        let mut stats = UpdateStats::default();

        for player in world.players() {
            stats.players_checked += 1;
            if *self.wrapper::<PlayerKind>(player.id)?.placement() != player.placement {
                self.player_moved(player.id, player.placement, backend)?;
                stats.players_moved += 1;
            }
        }
        for vehicle in world.vehicles() {
            stats.vehicles_checked += 1;
            if *self.wrapper::<VehicleKind>(vehicle.id)?.placement() != vehicle.placement {
                self.vehicle_moved(vehicle.id, vehicle.placement, backend)?;
                stats.vehicles_moved += 1;
            }
        }
        for player in std::mem::take(&mut self.stale_players) {
            if self.is_tracked(EntityKey::Player(player)) {
                self.refresh_player_objects(player, backend)?;
            }
        }

        stats.elapsed = started.elapsed();
        self.history.record(stats);
        tracing::trace!(
            players_moved = stats.players_moved,
            vehicles_moved = stats.vehicles_moved,
            chunks = self.grid.chunk_count(),
            "stream update complete"
        );
        Ok(Some(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::grid::CellCoord;
    use gamestream_common::ActorRef;

    fn config() -> StreamConfig {
        StreamConfig {
            visibility_distance: 200.0,
            update_interval_ms: 100,
            max_objects: 10,
            cell_size: 100.0,
            grid_half_extent: 3000.0,
        }
    }

    fn at(x: f32, y: f32, z: f32) -> Placement {
        Placement::at(Vec3::new(x, y, z))
    }

    #[test]
    fn join_places_in_cell_or_world_chunk() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), at(150.0, 0.0, 0.0), &mut b).unwrap();
        s.player_joined(PlayerId(1), at(9000.0, 0.0, 0.0), &mut b).unwrap();

        assert_eq!(
            s.tracked_slot(EntityKey::Player(PlayerId(0))),
            Some(ChunkSlot::Cell(CellCoord::new(1, 0, 0)))
        );
        assert_eq!(
            s.tracked_slot(EntityKey::Player(PlayerId(1))),
            Some(ChunkSlot::World)
        );
        assert_eq!(s.world_chunk().players().len(), 1);
        assert_eq!(s.grid().chunk_count(), 1);
    }

    #[test]
    fn duplicate_join_is_rejected() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), at(0.0, 0.0, 0.0), &mut b).unwrap();
        let err = s.player_joined(PlayerId(0), at(0.0, 0.0, 0.0), &mut b).unwrap_err();
        assert!(matches!(err, StreamError::AlreadyTracked(EntityKey::Player(PlayerId(0)))));
    }

    #[test]
    fn untracked_entities_are_reported() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        assert!(matches!(
            s.wrapper::<PlayerKind>(PlayerId(3)),
            Err(StreamError::Untracked(EntityKey::Player(PlayerId(3))))
        ));
        assert!(s.player_moved(PlayerId(3), at(1.0, 0.0, 0.0), &mut b).is_err());
        assert!(s.vehicle_left(VehicleId(3), &mut b).is_err());
        assert!(s.checkpoint_left(CheckpointId(1)).is_err());
    }

    #[test]
    fn relocation_moves_between_chunks_and_collects() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), at(10.0, 0.0, 0.0), &mut b).unwrap();
        s.player_moved(PlayerId(0), at(510.0, 0.0, 0.0), &mut b).unwrap();

        assert_eq!(s.grid().chunk_count(), 1);
        assert!(s.grid().get(Vec3::new(10.0, 0.0, 0.0)).is_none());
        let w = s.wrapper::<PlayerKind>(PlayerId(0)).unwrap();
        assert_eq!(w.chunk(), Some(ChunkSlot::Cell(CellCoord::new(5, 0, 0))));
        assert_eq!(w.placement().location.x, 510.0);
    }

    #[test]
    fn chunks_in_radius_adds_world_chunk_near_edge() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), at(2950.0, 0.0, 0.0), &mut b).unwrap();

        let near_edge = s.chunks_in_radius(Vec3::new(2950.0, 0.0, 0.0), 200.0);
        assert!(near_edge.contains(&ChunkSlot::World));
        assert!(near_edge.contains(&ChunkSlot::Cell(CellCoord::new(29, 0, 0))));

        let center = s.chunks_in_radius(Vec3::ZERO, 200.0);
        assert!(!center.contains(&ChunkSlot::World));
    }

    #[test]
    fn actor_outside_grid_is_seen_from_inside() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.vehicle_joined(
            VehicleId(0),
            at(3050.0, 0.0, 0.0),
            VisibilityRules::vehicle(),
            &mut b,
        )
        .unwrap();
        assert_eq!(s.world_chunk().vehicles().len(), 1);

        s.player_joined(PlayerId(0), at(2990.0, 0.0, 0.0), &mut b).unwrap();
        assert_eq!(s.wrapper::<VehicleKind>(VehicleId(0)).unwrap().score(), 1);
        assert!(b.is_materialized(ActorRef::Vehicle(VehicleId(0))));
    }

    #[test]
    fn vehicle_join_counts_existing_players() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), at(0.0, 0.0, 0.0), &mut b).unwrap();
        s.player_joined(PlayerId(1), at(30.0, 0.0, 0.0), &mut b).unwrap();
        s.player_joined(PlayerId(2), at(900.0, 0.0, 0.0), &mut b).unwrap();

        s.vehicle_joined(VehicleId(0), at(10.0, 0.0, 0.0), VisibilityRules::vehicle(), &mut b)
            .unwrap();
        let car = s.wrapper::<VehicleKind>(VehicleId(0)).unwrap();
        assert_eq!(car.score(), 2);
        assert!(car.is_spawned());
    }

    #[test]
    fn vehicle_in_other_world_is_not_counted() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), Placement::new(Vec3::ZERO, 1, 0), &mut b).unwrap();
        s.vehicle_joined(VehicleId(0), at(10.0, 0.0, 0.0), VisibilityRules::vehicle(), &mut b)
            .unwrap();
        assert_eq!(s.wrapper::<VehicleKind>(VehicleId(0)).unwrap().score(), 0);
        assert!(b.materialized().is_empty());
    }

    #[test]
    fn vehicle_moving_away_despawns() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), at(0.0, 0.0, 0.0), &mut b).unwrap();
        s.vehicle_joined(VehicleId(0), at(10.0, 0.0, 0.0), VisibilityRules::vehicle(), &mut b)
            .unwrap();
        s.vehicle_moved(VehicleId(0), at(1000.0, 0.0, 0.0), &mut b).unwrap();

        let car = s.wrapper::<VehicleKind>(VehicleId(0)).unwrap();
        assert_eq!(car.score(), 0);
        assert!(!b.is_materialized(ActorRef::Vehicle(VehicleId(0))));
        assert_eq!(car.chunk(), Some(ChunkSlot::Cell(CellCoord::new(10, 0, 0))));
    }

    #[test]
    fn vehicle_leave_dematerializes_and_collects() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), at(0.0, 0.0, 0.0), &mut b).unwrap();
        s.vehicle_joined(VehicleId(0), at(450.0, 0.0, 0.0), VisibilityRules::vehicle(), &mut b)
            .unwrap();
        s.vehicle_moved(VehicleId(0), at(20.0, 0.0, 0.0), &mut b).unwrap();
        assert!(b.is_materialized(ActorRef::Vehicle(VehicleId(0))));

        s.vehicle_left(VehicleId(0), &mut b).unwrap();
        assert!(b.materialized().is_empty());
        assert!(!s.is_tracked(EntityKey::Vehicle(VehicleId(0))));
        // Only the player's cell remains.
        assert_eq!(s.grid().chunk_count(), 1);
    }

    #[test]
    fn personal_objects_go_to_owner_only() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.personal_object_joined(ObjectId(0), PlayerId(1), at(5.0, 0.0, 0.0), VisibilityRules::object())
            .unwrap();
        s.player_joined(PlayerId(0), at(0.0, 0.0, 0.0), &mut b).unwrap();
        s.player_joined(PlayerId(1), at(0.0, 0.0, 0.0), &mut b).unwrap();

        assert!(b.objects_of(PlayerId(0)).is_empty());
        assert_eq!(b.objects_of(PlayerId(1)).len(), 1);
    }

    #[test]
    fn universal_objects_respect_rules() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        let rules = VisibilityRules {
            worlds: gamestream_common::ZoneFilter::Only(vec![0, 2]),
            interiors: gamestream_common::ZoneFilter::AllExcept(vec![5]),
        };
        s.universal_object_joined(ObjectId(0), at(5.0, 0.0, 0.0), rules).unwrap();
        s.player_joined(PlayerId(0), Placement::new(Vec3::ZERO, 2, 0), &mut b).unwrap();
        s.player_joined(PlayerId(1), Placement::new(Vec3::ZERO, 1, 0), &mut b).unwrap();
        s.player_joined(PlayerId(2), Placement::new(Vec3::ZERO, 0, 5), &mut b).unwrap();

        assert_eq!(b.objects_of(PlayerId(0)).len(), 1);
        assert!(b.objects_of(PlayerId(1)).is_empty());
        assert!(b.objects_of(PlayerId(2)).is_empty());
    }

    #[test]
    fn object_moves_only_relocate() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.player_joined(PlayerId(0), at(0.0, 0.0, 0.0), &mut b).unwrap();
        s.universal_object_joined(ObjectId(0), at(900.0, 0.0, 0.0), VisibilityRules::object())
            .unwrap();
        b.drain();

        s.universal_object_moved(ObjectId(0), at(20.0, 0.0, 0.0)).unwrap();
        assert!(b.calls().is_empty());
        assert_eq!(
            s.tracked_slot(EntityKey::UniversalObject(ObjectId(0))),
            Some(ChunkSlot::Cell(CellCoord::new(0, 0, 0)))
        );
        // The far cell it came from is gone.
        assert!(s.grid().get(Vec3::new(900.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn update_refreshes_players_near_changed_objects() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        let mut world = World::new();
        let p = world.connect_player("p", at(0.0, 0.0, 0.0));
        s.player_joined(p, at(0.0, 0.0, 0.0), &mut b).unwrap();

        s.universal_object_joined(ObjectId(0), at(20.0, 0.0, 0.0), VisibilityRules::object())
            .unwrap();
        assert!(b.objects_of(p).is_empty());

        let stats = s.update(Instant::now(), &world, &mut b).unwrap().unwrap();
        assert_eq!(stats.players_moved, 0);
        assert_eq!(b.objects_of(p).len(), 1);
    }

    #[test]
    fn universal_object_leave_despawns_everywhere() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        s.universal_object_joined(ObjectId(0), at(20.0, 0.0, 0.0), VisibilityRules::object())
            .unwrap();
        s.player_joined(PlayerId(0), at(0.0, 0.0, 0.0), &mut b).unwrap();
        s.player_joined(PlayerId(1), at(40.0, 0.0, 0.0), &mut b).unwrap();

        s.universal_object_left(ObjectId(0), &mut b).unwrap();
        assert!(b.objects_of(PlayerId(0)).is_empty());
        assert!(b.objects_of(PlayerId(1)).is_empty());
        assert!(
            s.wrapper::<PlayerKind>(PlayerId(0))
                .unwrap()
                .spawned_objects()
                .is_empty()
        );
    }

    #[test]
    fn checkpoints_are_tracked_by_chunk() {
        let mut s = Streamer::new(config());
        s.checkpoint_joined(CheckpointId(0), PlayerId(0), at(10.0, 0.0, 0.0)).unwrap();
        assert_eq!(s.grid().chunk_count(), 1);

        s.checkpoint_moved(CheckpointId(0), at(9999.0, 0.0, 0.0)).unwrap();
        assert_eq!(s.grid().chunk_count(), 0);
        assert_eq!(s.world_chunk().checkpoints().len(), 1);
        assert_eq!(s.world_chunk().checkpoints()[0].owner(), PlayerId(0));

        s.checkpoint_left(CheckpointId(0)).unwrap();
        assert!(s.world_chunk().is_empty());
        assert_eq!(s.tracked_count(), 0);
    }

    #[test]
    fn update_is_throttled() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        let world = World::new();
        let now = Instant::now();
        assert!(s.update(now, &world, &mut b).unwrap().is_some());
        assert!(s.update(now, &world, &mut b).unwrap().is_none());
        assert!(
            s.update(now + std::time::Duration::from_millis(100), &world, &mut b)
                .unwrap()
                .is_some()
        );
        assert_eq!(s.history().total_passes(), 2);
    }

    #[test]
    fn update_requires_joined_entities() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        let mut world = World::new();
        world.connect_player("ghost", at(0.0, 0.0, 0.0));
        let err = s.update(Instant::now(), &world, &mut b).unwrap_err();
        assert!(matches!(err, StreamError::Untracked(_)));
    }

    #[test]
    fn update_polls_vehicle_movement() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        let mut world = World::new();
        let p = world.connect_player("p", at(0.0, 0.0, 0.0));
        s.player_joined(p, at(0.0, 0.0, 0.0), &mut b).unwrap();
        let v = world.create_vehicle(411, at(1000.0, 0.0, 0.0), false);
        s.vehicle_joined(v, at(1000.0, 0.0, 0.0), VisibilityRules::vehicle(), &mut b)
            .unwrap();
        assert!(!b.is_materialized(ActorRef::Vehicle(v)));

        world.set_vehicle_placement(v, at(10.0, 0.0, 0.0));
        let stats = s.update(Instant::now(), &world, &mut b).unwrap().unwrap();
        assert_eq!(stats.vehicles_checked, 1);
        assert_eq!(stats.vehicles_moved, 1);
        assert_eq!(stats.players_moved, 0);
        assert!(b.is_materialized(ActorRef::Vehicle(v)));
        let car = s.wrapper::<VehicleKind>(v).unwrap();
        assert_eq!(car.score(), 1);
        assert_eq!(car.chunk(), Some(ChunkSlot::Cell(CellCoord::new(0, 0, 0))));
    }

    #[test]
    fn update_refreshes_owner_after_personal_object_move() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        let mut world = World::new();
        let p = world.connect_player("p", at(0.0, 0.0, 0.0));
        s.player_joined(p, at(0.0, 0.0, 0.0), &mut b).unwrap();
        s.personal_object_joined(ObjectId(0), p, at(10.0, 0.0, 0.0), VisibilityRules::object())
            .unwrap();

        let start = Instant::now();
        s.update(start, &world, &mut b).unwrap().unwrap();
        assert!(b.objects_of(p).contains(&ObjectId(0)));

        s.personal_object_moved(ObjectId(0), at(900.0, 0.0, 0.0)).unwrap();
        // Deferred until the next pass.
        assert!(b.objects_of(p).contains(&ObjectId(0)));

        let next = start + std::time::Duration::from_millis(100);
        let stats = s.update(next, &world, &mut b).unwrap().unwrap();
        assert_eq!(stats.players_moved, 0);
        assert!(b.objects_of(p).is_empty());
        assert!(s.wrapper::<PlayerKind>(p).unwrap().spawned_objects().is_empty());
    }

    #[test]
    fn update_despawns_universal_object_moving_away() {
        let mut s = Streamer::new(config());
        let mut b = RecordingBackend::new();
        let mut world = World::new();
        let p = world.connect_player("p", at(0.0, 0.0, 0.0));
        s.universal_object_joined(ObjectId(0), at(20.0, 0.0, 0.0), VisibilityRules::object())
            .unwrap();
        s.player_joined(p, at(0.0, 0.0, 0.0), &mut b).unwrap();
        assert!(b.objects_of(p).contains(&ObjectId(0)));

        s.universal_object_moved(ObjectId(0), at(900.0, 0.0, 0.0)).unwrap();
        assert!(b.objects_of(p).contains(&ObjectId(0)));

        let stats = s.update(Instant::now(), &world, &mut b).unwrap().unwrap();
        assert_eq!(stats.players_moved, 0);
        assert!(b.objects_of(p).is_empty());
        assert!(s.wrapper::<PlayerKind>(p).unwrap().spawned_objects().is_empty());
    }
}

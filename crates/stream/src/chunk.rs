use gamestream_common::Placement;

use crate::backend::StreamBackend;
use crate::entity::{
    CheckpointWrapper, GlobalObjectWrapper, Kind, PersonalObjectWrapper, PlayerWrapper,
    SharedActor, StreamedEntity, UniversalObjectWrapper, VehicleWrapper,
};
use crate::grid::ChunkSlot;

/// The entities physically located in one grid cell (or in the fallback world chunk).
///
/// A chunk exclusively owns the wrappers in its buckets. Every tracked entity
/// is in exactly one chunk.
#[derive(Debug)]
pub struct Chunk {
    slot: ChunkSlot,
    pub(crate) players: Vec<PlayerWrapper>,
    pub(crate) vehicles: Vec<VehicleWrapper>,
    pub(crate) global_objects: Vec<GlobalObjectWrapper>,
    pub(crate) personal_objects: Vec<PersonalObjectWrapper>,
    pub(crate) universal_objects: Vec<UniversalObjectWrapper>,
    pub(crate) checkpoints: Vec<CheckpointWrapper>,
}

#[derive(Debug, Clone, Copy)]
enum ScoreDelta {
    Add,
    Subtract,
}

impl Chunk {
    pub fn new(slot: ChunkSlot) -> Self {
        Self {
            slot,
            players: Vec::new(),
            vehicles: Vec::new(),
            global_objects: Vec::new(),
            personal_objects: Vec::new(),
            universal_objects: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn slot(&self) -> ChunkSlot {
        self.slot
    }

    /// Take ownership of `wrapper` and point its back-reference at this chunk.
    pub fn intercept<K: Kind>(&mut self, mut wrapper: StreamedEntity<K>) {
        wrapper.set_chunk(Some(self.slot));
        K::bucket_mut(self).push(wrapper);
    }

    /// Give up ownership of the wrapper for `id`, clearing its back-reference.
    /// `None` means the entity is not a member, which is a caller bug.
    pub fn release<K: Kind>(&mut self, id: K::Id) -> Option<StreamedEntity<K>> {
        let bucket = K::bucket_mut(self);
        let index = bucket.iter().position(|w| w.id() == id)?;
        let mut wrapper = bucket.swap_remove(index);
        wrapper.set_chunk(None);
        Some(wrapper)
    }

    pub fn find<K: Kind>(&self, id: K::Id) -> Option<&StreamedEntity<K>> {
        K::bucket(self).iter().find(|w| w.id() == id)
    }

    pub fn find_mut<K: Kind>(&mut self, id: K::Id) -> Option<&mut StreamedEntity<K>> {
        K::bucket_mut(self).iter_mut().find(|w| w.id() == id)
    }

    /// Count a player at `observer` in the score of every vehicle and global
    /// object here whose visibility zone contains it.
    pub fn add_score_around_player(
        &mut self,
        observer: &Placement,
        radius_sq: f32,
        backend: &mut dyn StreamBackend,
    ) {
        adjust_scores(&mut self.vehicles, observer, radius_sq, ScoreDelta::Add, backend);
        adjust_scores(&mut self.global_objects, observer, radius_sq, ScoreDelta::Add, backend);
    }

    /// Inverse of [`Chunk::add_score_around_player`].
    pub fn subtract_score_around_player(
        &mut self,
        observer: &Placement,
        radius_sq: f32,
        backend: &mut dyn StreamBackend,
    ) {
        adjust_scores(&mut self.vehicles, observer, radius_sq, ScoreDelta::Subtract, backend);
        adjust_scores(
            &mut self.global_objects,
            observer,
            radius_sq,
            ScoreDelta::Subtract,
            backend,
        );
    }

    /// Materialize or dematerialize every shared actor whose score crossed zero.
    /// Returns the number of backend calls made.
    pub fn apply_global_actors_visibility(&mut self, backend: &mut dyn StreamBackend) -> usize {
        let mut calls = 0;
        for vehicle in &mut self.vehicles {
            calls += usize::from(vehicle.apply_visibility(backend));
        }
        for object in &mut self.global_objects {
            calls += usize::from(object.apply_visibility(backend));
        }
        calls
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
            && self.vehicles.is_empty()
            && self.global_objects.is_empty()
            && self.personal_objects.is_empty()
            && self.universal_objects.is_empty()
            && self.checkpoints.is_empty()
    }

    /// Total number of wrappers across all buckets.
    pub fn entity_count(&self) -> usize {
        self.players.len()
            + self.vehicles.len()
            + self.global_objects.len()
            + self.personal_objects.len()
            + self.universal_objects.len()
            + self.checkpoints.len()
    }

    pub fn players(&self) -> &[PlayerWrapper] {
        &self.players
    }

    pub fn vehicles(&self) -> &[VehicleWrapper] {
        &self.vehicles
    }

    pub fn global_objects(&self) -> &[GlobalObjectWrapper] {
        &self.global_objects
    }

    pub fn personal_objects(&self) -> &[PersonalObjectWrapper] {
        &self.personal_objects
    }

    pub fn universal_objects(&self) -> &[UniversalObjectWrapper] {
        &self.universal_objects
    }

    pub fn checkpoints(&self) -> &[CheckpointWrapper] {
        &self.checkpoints
    }
}

fn adjust_scores<K: SharedActor>(
    bucket: &mut [StreamedEntity<K>],
    observer: &Placement,
    radius_sq: f32,
    delta: ScoreDelta,
    backend: &mut dyn StreamBackend,
) {
    for actor in bucket
        .iter_mut()
        .filter(|a| a.is_player_in_visibility_zone(observer, radius_sq))
    {
        match delta {
            ScoreDelta::Add => actor.add_score(backend),
            ScoreDelta::Subtract => actor.subtract_score(backend),
        }
    }
}

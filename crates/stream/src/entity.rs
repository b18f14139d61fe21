//! The tracked-entity wrapper family.
//!
//! One generic [`StreamedEntity`] is specialised per entity [`Kind`]. Kinds
//! differ only in their extra state: shared actors carry a visibility score,
//! players carry their spawned-object set, per-player objects carry rules and
//! an optional owner.

use gamestream_common::{
    ActorRef, CheckpointId, ObjectId, Placement, PlayerId, VehicleId, VisibilityRules,
};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;

use crate::backend::StreamBackend;
use crate::chunk::Chunk;
use crate::grid::ChunkSlot;

/// Identity of any tracked entity, across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Player(PlayerId),
    Vehicle(VehicleId),
    GlobalObject(ObjectId),
    PersonalObject(ObjectId),
    UniversalObject(ObjectId),
    Checkpoint(CheckpointId),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player(id) => id.fmt(f),
            Self::Vehicle(id) => id.fmt(f),
            Self::GlobalObject(id) => write!(f, "global {id}"),
            Self::PersonalObject(id) => write!(f, "personal {id}"),
            Self::UniversalObject(id) => write!(f, "universal {id}"),
            Self::Checkpoint(id) => id.fmt(f),
        }
    }
}

/// An entity kind tracked by chunks.
pub trait Kind: Sized + fmt::Debug + 'static {
    type Id: Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display;
    type State: fmt::Debug;

    fn key(id: Self::Id) -> EntityKey;
    fn bucket(chunk: &Chunk) -> &Vec<StreamedEntity<Self>>;
    fn bucket_mut(chunk: &mut Chunk) -> &mut Vec<StreamedEntity<Self>>;
}

/// State types that expose world/interior rules.
pub trait ZoneRules {
    fn rules(&self) -> &VisibilityRules;
}

/// Kinds whose client-side presence is shared and gated by a score.
pub trait SharedActor: Kind<State = ActorState> {
    fn actor(id: Self::Id) -> ActorRef;
}

#[derive(Debug)]
pub struct PlayerKind;
#[derive(Debug)]
pub struct VehicleKind;
#[derive(Debug)]
pub struct GlobalObjectKind;
#[derive(Debug)]
pub struct PersonalObjectKind;
#[derive(Debug)]
pub struct UniversalObjectKind;
#[derive(Debug)]
pub struct CheckpointKind;

pub type PlayerWrapper = StreamedEntity<PlayerKind>;
pub type VehicleWrapper = StreamedEntity<VehicleKind>;
pub type GlobalObjectWrapper = StreamedEntity<GlobalObjectKind>;
pub type PersonalObjectWrapper = StreamedEntity<PersonalObjectKind>;
pub type UniversalObjectWrapper = StreamedEntity<UniversalObjectKind>;
pub type CheckpointWrapper = StreamedEntity<CheckpointKind>;

macro_rules! kind {
    ($kind:ty, $id:ty, $state:ty, $variant:ident, $field:ident) => {
        impl Kind for $kind {
            type Id = $id;
            type State = $state;

            fn key(id: $id) -> EntityKey {
                EntityKey::$variant(id)
            }

            fn bucket(chunk: &Chunk) -> &Vec<StreamedEntity<Self>> {
                &chunk.$field
            }

            fn bucket_mut(chunk: &mut Chunk) -> &mut Vec<StreamedEntity<Self>> {
                &mut chunk.$field
            }
        }
    };
}

kind!(PlayerKind, PlayerId, PlayerState, Player, players);
kind!(VehicleKind, VehicleId, ActorState, Vehicle, vehicles);
kind!(GlobalObjectKind, ObjectId, ActorState, GlobalObject, global_objects);
kind!(PersonalObjectKind, ObjectId, PersonalState, PersonalObject, personal_objects);
kind!(UniversalObjectKind, ObjectId, VisibilityRules, UniversalObject, universal_objects);
kind!(CheckpointKind, CheckpointId, CheckpointState, Checkpoint, checkpoints);

impl SharedActor for VehicleKind {
    fn actor(id: VehicleId) -> ActorRef {
        ActorRef::Vehicle(id)
    }
}

impl SharedActor for GlobalObjectKind {
    fn actor(id: ObjectId) -> ActorRef {
        ActorRef::Object(id)
    }
}

/// Per-player bookkeeping: objects currently instantiated on the client.
#[derive(Debug, Default)]
pub struct PlayerState {
    pub(crate) spawned_objects: BTreeSet<ObjectId>,
}

/// Score state of a shared actor.
#[derive(Debug)]
pub struct ActorState {
    score: u32,
    spawned: bool,
    rules: VisibilityRules,
}

impl ActorState {
    pub fn new(rules: VisibilityRules) -> Self {
        Self {
            score: 0,
            spawned: false,
            rules,
        }
    }
}

#[derive(Debug)]
pub struct PersonalState {
    pub(crate) owner: PlayerId,
    rules: VisibilityRules,
}

impl PersonalState {
    pub fn new(owner: PlayerId, rules: VisibilityRules) -> Self {
        Self { owner, rules }
    }
}

#[derive(Debug)]
pub struct CheckpointState {
    pub(crate) owner: PlayerId,
}

impl CheckpointState {
    pub fn new(owner: PlayerId) -> Self {
        Self { owner }
    }
}

impl ZoneRules for ActorState {
    fn rules(&self) -> &VisibilityRules {
        &self.rules
    }
}

impl ZoneRules for PersonalState {
    fn rules(&self) -> &VisibilityRules {
        &self.rules
    }
}

impl ZoneRules for VisibilityRules {
    fn rules(&self) -> &VisibilityRules {
        self
    }
}

/// A tracked entity: its id, last known placement, owning chunk and kind state.
///
/// The wrapped domain entity is referenced by id only; its lifetime belongs to
/// the server's pools.
#[derive(Debug)]
pub struct StreamedEntity<K: Kind> {
    id: K::Id,
    placement: Placement,
    chunk: Option<ChunkSlot>,
    pub(crate) state: K::State,
}

impl<K: Kind> StreamedEntity<K> {
    pub fn new(id: K::Id, placement: Placement, state: K::State) -> Self {
        Self {
            id,
            placement,
            chunk: None,
            state,
        }
    }

    pub fn id(&self) -> K::Id {
        self.id
    }

    pub fn key(&self) -> EntityKey {
        K::key(self.id)
    }

    /// Last placement the streamer acted on.
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Owning chunk, `None` while detached.
    pub fn chunk(&self) -> Option<ChunkSlot> {
        self.chunk
    }

    pub fn state(&self) -> &K::State {
        &self.state
    }

    pub(crate) fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    pub(crate) fn set_chunk(&mut self, chunk: Option<ChunkSlot>) {
        self.chunk = chunk;
    }
}

impl<K: Kind> StreamedEntity<K>
where
    K::State: ZoneRules,
{
    pub fn rules(&self) -> &VisibilityRules {
        self.state.rules()
    }

    /// Would a player at `observer` perceive this entity?
    pub fn is_player_in_visibility_zone(&self, observer: &Placement, radius_sq: f32) -> bool {
        self.state.rules().admits(&self.placement, observer)
            && self.placement.distance_squared(observer) < radius_sq
    }
}

impl<K: SharedActor> StreamedEntity<K> {
    pub fn actor(&self) -> ActorRef {
        K::actor(self.id)
    }

    /// Number of in-range, zone-matching players.
    pub fn score(&self) -> u32 {
        self.state.score
    }

    /// Whether the actor is currently materialized on clients.
    pub fn is_spawned(&self) -> bool {
        self.state.spawned
    }

    /// Overwrite the score. Client state is untouched until [`Self::apply_visibility`].
    pub fn set_visibility_index(&mut self, score: u32, backend: &mut dyn StreamBackend) {
        if score != self.state.score {
            self.state.score = score;
            backend.score_changed(self.actor(), score);
        }
    }

    pub(crate) fn add_score(&mut self, backend: &mut dyn StreamBackend) {
        self.state.score += 1;
        if self.state.score == 1 {
            tracing::trace!(actor = %self.actor(), "entered visibility zone");
        }
        backend.score_changed(self.actor(), self.state.score);
    }

    pub(crate) fn subtract_score(&mut self, backend: &mut dyn StreamBackend) {
        debug_assert!(self.state.score > 0, "score underflow on {}", self.actor());
        self.state.score = self.state.score.saturating_sub(1);
        if self.state.score == 0 {
            tracing::trace!(actor = %self.actor(), "left visibility zone");
        }
        backend.score_changed(self.actor(), self.state.score);
    }

    /// Push the spawned/despawned state implied by the score to the client
    /// layer. Returns true if a backend call was made.
    pub fn apply_visibility(&mut self, backend: &mut dyn StreamBackend) -> bool {
        let wanted = self.state.score > 0;
        if wanted == self.state.spawned {
            return false;
        }
        self.state.spawned = wanted;
        if wanted {
            backend.materialize(self.actor());
        } else {
            backend.dematerialize(self.actor());
        }
        true
    }

    /// Drop client presence regardless of score (the actor is leaving).
    pub(crate) fn force_despawn(&mut self, backend: &mut dyn StreamBackend) {
        if self.state.spawned {
            self.state.spawned = false;
            backend.dematerialize(self.actor());
        }
    }
}

impl StreamedEntity<PlayerKind> {
    /// Objects currently spawned for this player, in id order.
    pub fn spawned_objects(&self) -> &BTreeSet<ObjectId> {
        &self.state.spawned_objects
    }
}

impl StreamedEntity<PersonalObjectKind> {
    pub fn owner(&self) -> PlayerId {
        self.state.owner
    }
}

impl StreamedEntity<CheckpointKind> {
    pub fn owner(&self) -> PlayerId {
        self.state.owner
    }
}

use gamestream_common::{ActorRef, ObjectId, PlayerId};
use std::collections::{BTreeMap, BTreeSet};

/// The client-protocol primitives the streamer drives.
///
/// Implementations perform the native create/destroy calls. The streamer only
/// calls them on state transitions, so they need not deduplicate.
pub trait StreamBackend {
    /// A shared actor gained its first observer.
    fn materialize(&mut self, actor: ActorRef);
    /// A shared actor lost its last observer.
    fn dematerialize(&mut self, actor: ActorRef);
    /// A per-player object entered `player`'s selected set.
    fn spawn_for(&mut self, player: PlayerId, object: ObjectId);
    /// A per-player object left `player`'s selected set.
    fn despawn_for(&mut self, player: PlayerId, object: ObjectId);
    /// A shared actor's score changed. Informational.
    fn score_changed(&mut self, _actor: ActorRef, _score: u32) {}
}

/// One recorded backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCall {
    Materialize(ActorRef),
    Dematerialize(ActorRef),
    SpawnFor(PlayerId, ObjectId),
    DespawnFor(PlayerId, ObjectId),
    Score(ActorRef, u32),
}

/// Backend that records every call and mirrors the resulting client state.
///
/// Stands in for the native layer in tests, benchmarks and simulations.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    materialized: BTreeSet<ActorRef>,
    per_player: BTreeMap<PlayerId, BTreeSet<ObjectId>>,
    record_scores: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also record [`BackendCall::Score`] entries.
    pub fn with_scores() -> Self {
        Self {
            record_scores: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Drain and return the recorded calls. Mirrored client state is kept.
    pub fn drain(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    /// Actors currently materialized on clients.
    pub fn materialized(&self) -> &BTreeSet<ActorRef> {
        &self.materialized
    }

    pub fn is_materialized(&self, actor: ActorRef) -> bool {
        self.materialized.contains(&actor)
    }

    /// Objects currently spawned for `player`.
    pub fn objects_of(&self, player: PlayerId) -> BTreeSet<ObjectId> {
        self.per_player.get(&player).cloned().unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    /// Recorded scores of `actor`, in call order.
    pub fn score_history(&self, actor: ActorRef) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Score(a, s) if *a == actor => Some(*s),
                _ => None,
            })
            .collect()
    }
}

impl StreamBackend for RecordingBackend {
    fn materialize(&mut self, actor: ActorRef) {
        self.materialized.insert(actor);
        self.calls.push(BackendCall::Materialize(actor));
    }

    fn dematerialize(&mut self, actor: ActorRef) {
        self.materialized.remove(&actor);
        self.calls.push(BackendCall::Dematerialize(actor));
    }

    fn spawn_for(&mut self, player: PlayerId, object: ObjectId) {
        self.per_player.entry(player).or_default().insert(object);
        self.calls.push(BackendCall::SpawnFor(player, object));
    }

    fn despawn_for(&mut self, player: PlayerId, object: ObjectId) {
        if let Some(set) = self.per_player.get_mut(&player) {
            set.remove(&object);
            if set.is_empty() {
                self.per_player.remove(&player);
            }
        }
        self.calls.push(BackendCall::DespawnFor(player, object));
    }

    fn score_changed(&mut self, actor: ActorRef, score: u32) {
        if self.record_scores {
            self.calls.push(BackendCall::Score(actor, score));
        }
    }
}

use gamestream_common::ObjectId;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// A per-player object eligible for a player, with its squared distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub object: ObjectId,
    pub distance_sq: f32,
}

fn nearest_first(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance_sq
        .total_cmp(&b.distance_sq)
        .then(a.object.cmp(&b.object))
}

/// Keep the `cap` nearest candidates (ties broken by id) and return them in id order.
pub fn select_nearest(mut candidates: Vec<Candidate>, cap: usize) -> BTreeSet<ObjectId> {
    if candidates.len() > cap {
        if cap > 0 {
            candidates.select_nth_unstable_by(cap - 1, nearest_first);
        }
        candidates.truncate(cap);
    }
    candidates.into_iter().map(|c| c.object).collect()
}

/// Objects to despawn and spawn to go from `previous` to `current`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpawnDiff {
    pub despawn: Vec<ObjectId>,
    pub spawn: Vec<ObjectId>,
}

impl SpawnDiff {
    pub fn between(previous: &BTreeSet<ObjectId>, current: &BTreeSet<ObjectId>) -> Self {
        Self {
            despawn: previous.difference(current).copied().collect(),
            spawn: current.difference(previous).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.despawn.is_empty() && self.spawn.is_empty()
    }
}

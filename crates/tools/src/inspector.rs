use gamestream_common::{ActorRef, ObjectScope, PlayerId};
use gamestream_kernel::World;
use gamestream_stream::{
    ChunkSlot, EntityKey, Kind, PlayerKind, SharedActor, StreamedEntity, Streamer,
};
use serde::Serialize;
use std::collections::BTreeSet;

/// Streamer inspector for developer tooling.
///
/// Read-only queries and consistency checks over a [`Streamer`], for
/// debugging, simulations and development UI.
pub struct StreamInspector;

impl StreamInspector {
    /// Produce a summary of the streamer state.
    pub fn summary(streamer: &Streamer) -> StreamSummary {
        let mut summary = StreamSummary {
            grid_chunks: streamer.grid().chunk_count(),
            world_chunk_entities: streamer.world_chunk().entity_count(),
            tracked: streamer.tracked_count(),
            passes: streamer.history().total_passes(),
            average_pass_us: streamer.history().average_elapsed().as_micros() as u64,
            ..StreamSummary::default()
        };
        for chunk in streamer.chunks() {
            summary.players += chunk.players().len();
            summary.vehicles += chunk.vehicles().len();
            summary.global_objects += chunk.global_objects().len();
            summary.personal_objects += chunk.personal_objects().len();
            summary.universal_objects += chunk.universal_objects().len();
            summary.checkpoints += chunk.checkpoints().len();
            summary.spawned_actors += chunk.vehicles().iter().filter(|v| v.is_spawned()).count();
            summary.spawned_actors += chunk
                .global_objects()
                .iter()
                .filter(|o| o.is_spawned())
                .count();
            summary.spawned_objects += chunk
                .players()
                .iter()
                .map(|p| p.spawned_objects().len())
                .sum::<usize>();
        }
        summary
    }

    /// What the streamer knows about one player.
    pub fn inspect_player(streamer: &Streamer, id: PlayerId) -> Option<PlayerInfo> {
        let player = streamer.wrapper::<PlayerKind>(id).ok()?;
        let placement = *player.placement();
        let radius = streamer.config().visibility_distance;
        let radius_sq = streamer.config().visibility_distance_squared();

        let mut visible_actors = 0;
        for slot in streamer.chunks_in_radius(placement.location, radius) {
            let Some(chunk) = streamer.chunk(slot) else {
                continue;
            };
            visible_actors += chunk
                .vehicles()
                .iter()
                .filter(|v| v.is_player_in_visibility_zone(&placement, radius_sq))
                .count();
            visible_actors += chunk
                .global_objects()
                .iter()
                .filter(|o| o.is_player_in_visibility_zone(&placement, radius_sq))
                .count();
        }

        let l = placement.location;
        Some(PlayerInfo {
            id,
            chunk: player.chunk().map(|slot| slot.to_string()).unwrap_or_default(),
            location: [l.x, l.y, l.z],
            world: placement.world,
            interior: placement.interior,
            spawned_objects: player.spawned_objects().len(),
            visible_actors,
        })
    }

    /// Check the streamer's structural invariants. Returns every violation found.
    pub fn audit(streamer: &Streamer) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut seen = BTreeSet::new();

        for chunk in streamer.chunks() {
            let slot = chunk.slot();
            if slot != ChunkSlot::World && chunk.is_empty() {
                violations.push(Violation::EmptyChunk { slot });
            }

            let mut members = Vec::new();
            members.extend(memberships(chunk.players()));
            members.extend(memberships(chunk.vehicles()));
            members.extend(memberships(chunk.global_objects()));
            members.extend(memberships(chunk.personal_objects()));
            members.extend(memberships(chunk.universal_objects()));
            members.extend(memberships(chunk.checkpoints()));

            for (key, back_ref) in members {
                if !seen.insert(key) {
                    violations.push(Violation::DuplicateMembership { key });
                }
                if streamer.tracked_slot(key) != Some(slot) || back_ref != Some(slot) {
                    violations.push(Violation::TrackerMismatch { key, actual: slot });
                }
            }
        }

        for (key, slot) in streamer.tracked() {
            if !seen.contains(&key) {
                violations.push(Violation::OrphanTracker { key, slot });
            }
        }

        let cap = streamer.config().max_objects;
        let players: Vec<_> = streamer.chunks().flat_map(|c| c.players()).collect();
        for player in &players {
            let spawned = player.spawned_objects().len();
            if spawned > cap {
                violations.push(Violation::OverCap {
                    player: player.id(),
                    spawned,
                    cap,
                });
            }
        }

        let radius_sq = streamer.config().visibility_distance_squared();
        for chunk in streamer.chunks() {
            for vehicle in chunk.vehicles() {
                check_score(vehicle, &players, radius_sq, &mut violations);
            }
            for object in chunk.global_objects() {
                check_score(object, &players, radius_sq, &mut violations);
            }
        }

        for violation in &violations {
            tracing::warn!(%violation, "stream audit violation");
        }
        violations
    }

    /// Check that every pooled entity has joined the streamer, and nothing else has.
    pub fn audit_pools(world: &World, streamer: &Streamer) -> Vec<Violation> {
        let mut pooled = Vec::new();
        pooled.extend(world.players().map(|p| EntityKey::Player(p.id)));
        pooled.extend(world.vehicles().map(|v| EntityKey::Vehicle(v.id)));
        pooled.extend(world.objects().map(|o| match o.scope {
            ObjectScope::Global => EntityKey::GlobalObject(o.id),
            ObjectScope::Personal { .. } => EntityKey::PersonalObject(o.id),
            ObjectScope::Universal => EntityKey::UniversalObject(o.id),
        }));
        pooled.extend(world.checkpoints().map(|c| EntityKey::Checkpoint(c.id)));

        let mut violations: Vec<Violation> = pooled
            .iter()
            .filter(|key| !streamer.is_tracked(**key))
            .map(|&key| Violation::NotJoined { key })
            .collect();
        if pooled.len() != streamer.tracked_count() {
            violations.push(Violation::CountMismatch {
                pooled: pooled.len(),
                tracked: streamer.tracked_count(),
            });
        }
        violations
    }
}

fn memberships<K: Kind>(
    wrappers: &[StreamedEntity<K>],
) -> impl Iterator<Item = (EntityKey, Option<ChunkSlot>)> + '_ {
    wrappers.iter().map(|w| (w.key(), w.chunk()))
}

fn check_score<K: SharedActor>(
    actor: &StreamedEntity<K>,
    players: &[&StreamedEntity<PlayerKind>],
    radius_sq: f32,
    violations: &mut Vec<Violation>,
) {
    let expected = players
        .iter()
        .filter(|p| actor.is_player_in_visibility_zone(p.placement(), radius_sq))
        .count() as u32;
    if actor.score() != expected {
        violations.push(Violation::ScoreMismatch {
            actor: actor.actor(),
            score: actor.score(),
            expected,
        });
    }
    if actor.is_spawned() != (actor.score() > 0) {
        violations.push(Violation::SpawnMismatch {
            actor: actor.actor(),
            score: actor.score(),
            spawned: actor.is_spawned(),
        });
    }
}

/// Summary of streamer state for the inspector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub grid_chunks: usize,
    pub world_chunk_entities: usize,
    pub tracked: usize,
    pub players: usize,
    pub vehicles: usize,
    pub global_objects: usize,
    pub personal_objects: usize,
    pub universal_objects: usize,
    pub checkpoints: usize,
    /// Vehicles and global objects currently materialized.
    pub spawned_actors: usize,
    /// Sum of all players' spawned per-player objects.
    pub spawned_objects: usize,
    pub passes: u64,
    pub average_pass_us: u64,
}

impl std::fmt::Display for StreamSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stream: chunks={} (+{} outside grid) players={} vehicles={} objects={}/{}/{} checkpoints={} spawned_actors={} spawned_objects={} passes={} avg_pass={}us",
            self.grid_chunks,
            self.world_chunk_entities,
            self.players,
            self.vehicles,
            self.global_objects,
            self.personal_objects,
            self.universal_objects,
            self.checkpoints,
            self.spawned_actors,
            self.spawned_objects,
            self.passes,
            self.average_pass_us,
        )
    }
}

/// Detailed info about a single player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub chunk: String,
    pub location: [f32; 3],
    pub world: i32,
    pub interior: i32,
    pub spawned_objects: usize,
    /// Shared actors whose visibility zone currently admits the player.
    pub visible_actors: usize,
}

impl std::fmt::Display for PlayerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] pos=({:.2}, {:.2}, {:.2}) world={} interior={} objects={} actors={}",
            self.id,
            self.chunk,
            self.location[0],
            self.location[1],
            self.location[2],
            self.world,
            self.interior,
            self.spawned_objects,
            self.visible_actors,
        )
    }
}

/// A broken streamer invariant found by [`StreamInspector::audit`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("{key} is a member of more than one chunk")]
    DuplicateMembership { key: EntityKey },
    #[error("{key} sits in chunk {actual} but its tracker or back-reference disagrees")]
    TrackerMismatch { key: EntityKey, actual: ChunkSlot },
    #[error("{key} is tracked in {slot} but no chunk holds it")]
    OrphanTracker { key: EntityKey, slot: ChunkSlot },
    #[error("chunk {slot} is empty but still allocated")]
    EmptyChunk { slot: ChunkSlot },
    #[error("{player} has {spawned} objects spawned, cap is {cap}")]
    OverCap {
        player: PlayerId,
        spawned: usize,
        cap: usize,
    },
    #[error("{actor} has score {score}, {expected} players are in range")]
    ScoreMismatch {
        actor: ActorRef,
        score: u32,
        expected: u32,
    },
    #[error("{actor} has score {score} but spawned={spawned}")]
    SpawnMismatch {
        actor: ActorRef,
        score: u32,
        spawned: bool,
    },
    #[error("{key} exists in the pools but never joined the streamer")]
    NotJoined { key: EntityKey },
    #[error("{pooled} pooled entities, {tracked} tracked")]
    CountMismatch { pooled: usize, tracked: usize },
}

//! End-to-end streaming scenarios and invariant checks.

use gamestream_common::{ActorRef, ObjectId, Placement, PlayerId, VehicleId, VisibilityRules};
use glam::Vec3;
use std::collections::HashSet;

use crate::backend::{BackendCall, RecordingBackend};
use crate::config::StreamConfig;
use crate::entity::{EntityKey, GlobalObjectKind, PlayerKind, VehicleKind};
use crate::grid::ChunkSlot;
use crate::streamer::Streamer;

fn config(max_objects: usize) -> StreamConfig {
    StreamConfig {
        visibility_distance: 200.0,
        update_interval_ms: 100,
        max_objects,
        cell_size: 100.0,
        grid_half_extent: 3000.0,
    }
}

fn at(x: f32) -> Placement {
    Placement::at(Vec3::new(x, 0.0, 0.0))
}

fn check_invariants(s: &Streamer) {
    let r2 = s.config().visibility_distance_squared();

    // Single ownership: the trackers and the chunk contents agree one-to-one.
    let mut seen = HashSet::new();
    for chunk in s.chunks() {
        let keys = chunk
            .players()
            .iter()
            .map(|w| w.key())
            .chain(chunk.vehicles().iter().map(|w| w.key()))
            .chain(chunk.global_objects().iter().map(|w| w.key()))
            .chain(chunk.personal_objects().iter().map(|w| w.key()))
            .chain(chunk.universal_objects().iter().map(|w| w.key()))
            .chain(chunk.checkpoints().iter().map(|w| w.key()));
        for key in keys {
            assert!(seen.insert(key), "{key} is in two chunks");
            assert_eq!(s.tracked_slot(key), Some(chunk.slot()), "{key} tracker mismatch");
        }
        if chunk.slot() != ChunkSlot::World {
            assert!(!chunk.is_empty(), "empty chunk {} survived", chunk.slot());
        }
    }
    assert_eq!(seen.len(), s.tracked_count());

    let players: Vec<_> = s.chunks().flat_map(|c| c.players()).collect();
    for player in &players {
        assert!(player.spawned_objects().len() <= s.config().max_objects);
    }
    for chunk in s.chunks() {
        for v in chunk.vehicles() {
            let expected = players
                .iter()
                .filter(|p| v.is_player_in_visibility_zone(p.placement(), r2))
                .count() as u32;
            assert_eq!(v.score(), expected, "score of {}", v.actor());
            assert_eq!(v.is_spawned(), expected > 0);
        }
        for o in chunk.global_objects() {
            let expected = players
                .iter()
                .filter(|p| o.is_player_in_visibility_zone(p.placement(), r2))
                .count() as u32;
            assert_eq!(o.score(), expected, "score of {}", o.actor());
            assert_eq!(o.is_spawned(), expected > 0);
        }
    }
}

fn two_global_objects(s: &mut Streamer, b: &mut RecordingBackend) {
    s.global_object_joined(ObjectId(1), at(50.0), VisibilityRules::object(), b)
        .unwrap();
    s.global_object_joined(ObjectId(2), at(500.0), VisibilityRules::object(), b)
        .unwrap();
}

#[test]
fn join_spawns_only_objects_in_range() {
    let mut s = Streamer::new(config(1000));
    let mut b = RecordingBackend::new();
    two_global_objects(&mut s, &mut b);
    s.player_joined(PlayerId(0), at(0.0), &mut b).unwrap();

    let near = s.wrapper::<GlobalObjectKind>(ObjectId(1)).unwrap();
    let far = s.wrapper::<GlobalObjectKind>(ObjectId(2)).unwrap();
    assert_eq!((near.score(), near.is_spawned()), (1, true));
    assert_eq!((far.score(), far.is_spawned()), (0, false));
    assert_eq!(
        b.calls(),
        &[BackendCall::Materialize(ActorRef::Object(ObjectId(1)))]
    );
    check_invariants(&s);
}

#[test]
fn move_swaps_visible_objects_in_one_call() {
    let mut s = Streamer::new(config(1000));
    let mut b = RecordingBackend::with_scores();
    two_global_objects(&mut s, &mut b);
    s.player_joined(PlayerId(0), at(0.0), &mut b).unwrap();
    b.drain();

    s.player_moved(PlayerId(0), at(450.0), &mut b).unwrap();

    let near = ActorRef::Object(ObjectId(1));
    let far = ActorRef::Object(ObjectId(2));
    let calls = b.calls().to_vec();
    let position = |call: BackendCall| calls.iter().position(|c| *c == call).unwrap();

    // Add pass before subtract pass, both before the client is touched.
    assert!(position(BackendCall::Score(far, 1)) < position(BackendCall::Score(near, 0)));
    assert!(position(BackendCall::Score(near, 0)) < position(BackendCall::Materialize(far)));
    assert!(position(BackendCall::Score(near, 0)) < position(BackendCall::Dematerialize(near)));
    assert_eq!(b.materialized().iter().copied().collect::<Vec<_>>(), vec![far]);
    check_invariants(&s);
}

#[test]
fn shared_actor_score_never_touches_zero_across_chunks() {
    let mut s = Streamer::new(config(1000));
    let mut b = RecordingBackend::with_scores();
    let actor = ActorRef::Vehicle(VehicleId(0));
    s.vehicle_joined(VehicleId(0), at(150.0), VisibilityRules::vehicle(), &mut b)
        .unwrap();
    s.player_joined(PlayerId(0), at(95.0), &mut b).unwrap();
    b.drain();

    // Cell 0 -> cell 2, the vehicle in cell 1 stays in range throughout.
    s.player_moved(PlayerId(0), at(230.0), &mut b).unwrap();
    s.player_moved(PlayerId(0), at(120.0), &mut b).unwrap();

    let history = b.score_history(actor);
    assert_eq!(history, vec![2, 1, 2, 1]);
    assert!(history.iter().all(|&score| score >= 1));
    assert_eq!(
        b.count(|c| matches!(c, BackendCall::Materialize(_) | BackendCall::Dematerialize(_))),
        0
    );
    check_invariants(&s);
}

#[test]
fn repeated_placement_is_idempotent() {
    let mut s = Streamer::new(config(1000));
    let mut b = RecordingBackend::new();
    two_global_objects(&mut s, &mut b);
    s.universal_object_joined(ObjectId(3), at(10.0), VisibilityRules::object())
        .unwrap();
    s.player_joined(PlayerId(0), at(0.0), &mut b).unwrap();
    b.drain();

    s.player_moved(PlayerId(0), at(0.0), &mut b).unwrap();
    s.player_moved(PlayerId(0), at(0.0), &mut b).unwrap();
    assert!(b.calls().is_empty());
}

#[test]
fn distance_filter_is_strict() {
    let mut s = Streamer::new(config(1000));
    let mut b = RecordingBackend::new();
    s.universal_object_joined(ObjectId(0), at(200.0), VisibilityRules::object())
        .unwrap();
    s.universal_object_joined(ObjectId(1), at(199.5), VisibilityRules::object())
        .unwrap();
    s.universal_object_joined(
        ObjectId(2),
        Placement::new(Vec3::new(5.0, 0.0, 0.0), 1, 0),
        VisibilityRules::object(),
    )
    .unwrap();
    s.player_joined(PlayerId(0), at(0.0), &mut b).unwrap();

    let spawned: Vec<_> = b.objects_of(PlayerId(0)).into_iter().collect();
    assert_eq!(spawned, vec![ObjectId(1)]);
}

#[test]
fn cap_keeps_nearest_and_diffs_minimally() {
    let mut s = Streamer::new(config(200));
    let mut b = RecordingBackend::new();
    for i in 0..300u32 {
        s.personal_object_joined(
            ObjectId(i),
            PlayerId(0),
            at(i as f32),
            VisibilityRules::object(),
        )
        .unwrap();
    }
    s.player_joined(PlayerId(0), at(149.6), &mut b).unwrap();

    let expected: Vec<_> = (50..250).map(ObjectId).collect();
    let spawned: Vec<_> = s
        .wrapper::<PlayerKind>(PlayerId(0))
        .unwrap()
        .spawned_objects()
        .iter()
        .copied()
        .collect();
    assert_eq!(spawned, expected);
    assert_eq!(b.calls().len(), 200);
    b.drain();

    s.player_moved(PlayerId(0), at(154.6), &mut b).unwrap();
    let despawned: Vec<_> = b
        .calls()
        .iter()
        .filter_map(|c| match c {
            BackendCall::DespawnFor(_, o) => Some(o.0),
            _ => None,
        })
        .collect();
    let spawned: Vec<_> = b
        .calls()
        .iter()
        .filter_map(|c| match c {
            BackendCall::SpawnFor(_, o) => Some(o.0),
            _ => None,
        })
        .collect();
    assert_eq!(despawned, vec![50, 51, 52, 53, 54]);
    assert_eq!(spawned, vec![250, 251, 252, 253, 254]);
    assert_eq!(b.objects_of(PlayerId(0)).len(), 200);
    check_invariants(&s);
}

#[test]
fn disconnect_releases_score_and_chunk() {
    let mut s = Streamer::new(config(1000));
    let mut b = RecordingBackend::new();
    s.vehicle_joined(VehicleId(0), at(20.0), VisibilityRules::vehicle(), &mut b)
        .unwrap();
    s.player_joined(PlayerId(0), at(10.0), &mut b).unwrap();
    s.player_joined(PlayerId(1), at(60.0), &mut b).unwrap();
    assert_eq!(s.wrapper::<VehicleKind>(VehicleId(0)).unwrap().score(), 2);

    s.player_left(PlayerId(1), &mut b).unwrap();
    assert_eq!(s.wrapper::<VehicleKind>(VehicleId(0)).unwrap().score(), 1);
    assert!(b.is_materialized(ActorRef::Vehicle(VehicleId(0))));

    s.player_left(PlayerId(0), &mut b).unwrap();
    let car = s.wrapper::<VehicleKind>(VehicleId(0)).unwrap();
    assert_eq!(car.score(), 0);
    assert!(!b.is_materialized(ActorRef::Vehicle(VehicleId(0))));
    // Still holds the vehicle.
    assert_eq!(s.grid().chunk_count(), 1);
    check_invariants(&s);

    s.vehicle_left(VehicleId(0), &mut b).unwrap();
    assert_eq!(s.grid().chunk_count(), 0);
    check_invariants(&s);
}

#[test]
fn disconnect_despawns_player_objects() {
    let mut s = Streamer::new(config(1000));
    let mut b = RecordingBackend::new();
    s.universal_object_joined(ObjectId(0), at(30.0), VisibilityRules::object())
        .unwrap();
    s.player_joined(PlayerId(0), at(0.0), &mut b).unwrap();
    assert_eq!(b.objects_of(PlayerId(0)).len(), 1);

    s.player_left(PlayerId(0), &mut b).unwrap();
    assert!(b.objects_of(PlayerId(0)).is_empty());
    assert!(!s.is_tracked(EntityKey::Player(PlayerId(0))));
}

/// xorshift32; deterministic without pulling in an RNG crate.
struct Rng(u32);

impl Rng {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }

    fn coord(&mut self) -> f32 {
        // Spans past the grid edge so the world chunk is exercised too.
        (self.next() % 7000) as f32 - 3500.0
    }

    fn near(&mut self, x: f32) -> f32 {
        x + (self.next() % 400) as f32 - 200.0
    }
}

#[test]
fn invariants_hold_under_random_churn() {
    let mut s = Streamer::new(config(8));
    let mut b = RecordingBackend::new();
    let mut rng = Rng(0x2545_f491);
    let mut xs = Vec::new();

    for i in 0..40u32 {
        let p = Placement::new(Vec3::new(rng.coord(), 0.0, rng.coord()), (i % 2) as i32, 0);
        s.vehicle_joined(VehicleId(i), p, VisibilityRules::vehicle(), &mut b)
            .unwrap();
        s.global_object_joined(
            ObjectId(i),
            Placement::at(Vec3::new(rng.coord(), 0.0, rng.coord())),
            VisibilityRules::object(),
            &mut b,
        )
        .unwrap();
        s.universal_object_joined(
            ObjectId(1000 + i),
            Placement::at(Vec3::new(rng.coord(), 0.0, rng.coord())),
            VisibilityRules::object(),
        )
        .unwrap();
    }
    for i in 0..10u32 {
        let x = rng.coord();
        xs.push(x);
        s.player_joined(PlayerId(i), Placement::at(Vec3::new(x, 0.0, x)), &mut b)
            .unwrap();
    }
    check_invariants(&s);

    for step in 0..300u32 {
        let i = (rng.next() % 10) as usize;
        xs[i] = rng.near(xs[i]);
        let world = (step % 3 == 0) as i32;
        s.player_moved(
            PlayerId(i as u32),
            Placement::new(Vec3::new(xs[i], 0.0, xs[i]), world, 0),
            &mut b,
        )
        .unwrap();

        let v = rng.next() % 40;
        let vx = rng.coord();
        s.vehicle_moved(VehicleId(v), Placement::at(Vec3::new(vx, 0.0, -vx)), &mut b)
            .unwrap();
        check_invariants(&s);
    }

    for i in 0..10u32 {
        s.player_left(PlayerId(i), &mut b).unwrap();
    }
    check_invariants(&s);
    assert!(b.materialized().is_empty());
}

//! Performance benchmarks for the hot paths of the netcode

use client::interpolation::Interpolator;
use client::prediction::PredictionEngine;
use server::world::WorldState;
use shared::{step, Controls, Entity, Message, Snapshot, FIXED_DT};
use std::time::Instant;

fn snapshot(frame: u32) -> Snapshot {
    Snapshot {
        entity_id: 1,
        x: frame as f32 * 0.1,
        y: -(frame as f32) * 0.1,
        vx: 1.0,
        vy: -1.0,
        ori: frame as f32 * 0.01,
        omega: 0.0,
        timestamp_ms: u64::from(frame) * 16,
        frame,
        ack_frame: frame,
    }
}

/// Benchmarks the kinematic step shared by client and server
#[test]
fn benchmark_kinematic_step() {
    let mut entity = Entity::new(1, 0.0, 0.0, 0.3, 0xFFFFFFFF);
    entity.controls = Controls::new(1.0, 0.5);

    let iterations = 1_000_000;
    let start = Instant::now();

    for _ in 0..iterations {
        step(&mut entity, FIXED_DT);
    }

    let duration = start.elapsed();
    println!(
        "Kinematic step: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(entity.x.is_finite());
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks a full server tick with a crowded world
#[test]
fn benchmark_world_tick() {
    let mut world = WorldState::with_seed(1);
    let ids: Vec<u16> = (0..32).filter_map(|peer| world.spawn_entity(peer)).collect();
    for (frame, id) in ids.iter().enumerate() {
        world.apply_input(*id, Controls::new(1.0, -0.5), frame as u32);
    }

    let iterations = 10_000;
    let start = Instant::now();

    for tick in 0..iterations {
        world.step_all(FIXED_DT);
        let snapshots = world.snapshots(tick);
        assert_eq!(snapshots.len(), ids.len());
    }

    let duration = start.elapsed();
    println!(
        "World tick (32 entities): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks snapshot encode and decode
#[test]
fn benchmark_snapshot_codec() {
    let message = Message::Snapshot(snapshot(42));

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = message.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.kind(), message.kind());
    }

    let duration = start.elapsed();
    println!(
        "Snapshot codec: {} round trips in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks interpolation with a steady snapshot stream
#[test]
fn benchmark_interpolation() {
    let mut interpolator = Interpolator::new();

    let iterations = 100_000u32;
    let start = Instant::now();

    for frame in 1..=iterations {
        interpolator.push(snapshot(frame));
        // Render time trails the newest snapshot by a few frames
        let target = (u64::from(frame) * 16).saturating_sub(50);
        assert!(interpolator.sample(target).is_some());
    }

    let duration = start.elapsed();
    println!(
        "Interpolation: {} push+sample in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(interpolator.len() <= 8);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks reconciliation replaying a full input history
#[test]
fn benchmark_reconciliation_performance() {
    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut engine = PredictionEngine::new();
        let mut entity = Entity::new(1, 0.0, 0.0, 0.0, 0xFFFFFFFF);

        for frame in 0..60u64 {
            engine.advance(&mut entity, Controls::new(1.0, 0.2), frame * 16, true);
        }

        let mut server = Entity::new(1, 5.0, 5.0, 0.0, 0xFFFFFFFF);
        server.vx = 1.0;
        let snap = Snapshot::of(&server, 100, 10, 10);
        engine.on_snapshot(&entity, &snap);
        assert!(engine.reconcile(&mut entity));
    }

    let duration = start.elapsed();
    println!(
        "Reconciliation (50 replayed inputs): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

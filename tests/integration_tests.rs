//! Integration tests exercising pulsegrid's subsystems together, without a
//! GPU device: particle seeding, boundary containment, emitter-driven
//! spawn budgeting, the modulation router, and the command queue wired
//! through `FramePipeline`.

use std::time::Instant;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;

use pulsegrid::command::Command;
use pulsegrid::config::PulsegridConfig;
use pulsegrid::pipeline::FramePipeline;
use pulsegrid::solver::{BoundaryShape, CollisionMode, Emitter, ParticleStorage};
use pulsegrid::solver::emitter::{EmitterPattern, EmitterShape};
use pulsegrid::solver::particle::Material;

#[test]
fn seeded_particles_remain_within_the_domain_and_conserve_mass() {
    let grid_size = Vec3::splat(64.0);
    let mut storage = ParticleStorage::new(4096);
    let mut rng = StdRng::seed_from_u64(99);
    storage.seed_sphere(4096, grid_size, &mut rng);

    let initial_mass = storage.total_mass();
    for p in storage.as_mut_slice() {
        p.clamp_into_domain(grid_size);
    }
    let after_mass = storage.total_mass();

    assert!((initial_mass - after_mass).abs() < 1.0e-6);
    for p in storage.as_slice() {
        let pos = p.position();
        assert!(pos.x >= 2.0 && pos.x <= 62.0);
        assert!(pos.y >= 2.0 && pos.y <= 62.0);
        assert!(pos.z >= 2.0 && pos.z <= 62.0);
    }
}

#[test]
fn pipeline_applies_queued_boundary_commands_before_the_next_tick() {
    let mut pipeline = FramePipeline::new(PulsegridConfig::default()).unwrap();
    pipeline
        .command_queue_mut()
        .push(Command::SetBoundaryShape(BoundaryShape::Sphere { radius: 24.0 }));
    pipeline
        .command_queue_mut()
        .push(Command::SetCollisionMode(CollisionMode::Clamp));
    pipeline.command_queue_mut().push(Command::SetAudioReactive(false));

    let metrics = pipeline.tick(1.0 / 60.0, None, Instant::now());
    assert!(metrics.audio_frame.is_none());
}

#[test]
fn emitter_registry_spawn_budget_never_exceeds_storage_headroom() {
    let mut emitter_registry = pulsegrid::solver::EmitterRegistry::new(8);
    emitter_registry.insert(Emitter::new(
        EmitterShape::Sphere { radius: 5.0 },
        EmitterPattern::Burst { count: 10_000, period_secs: 0.001 },
        Vec3::splat(32.0),
        Vec3::ZERO,
        Material::Foam,
    ));

    let mut rng = StdRng::seed_from_u64(3);
    let spawns = emitter_registry.tick(1.0, 50, &mut rng);
    assert!(spawns.len() <= 50);
    assert!(!spawns.is_empty());
}

#[test]
fn performance_controller_reports_tier_changes_through_the_pipeline() {
    let mut config = PulsegridConfig::default();
    config.performance.high_to_medium_frames = 2;
    let mut pipeline = FramePipeline::new(config).unwrap();

    // Force frame_start to be far in the past so every tick looks slow,
    // driving the performance controller below its demotion threshold.
    let slow_start = Instant::now() - std::time::Duration::from_millis(100);
    let mut last_tier = None;
    for _ in 0..5 {
        let metrics = pipeline.tick(1.0 / 60.0, None, slow_start);
        last_tier = Some(metrics.tier);
    }
    assert!(last_tier.is_some());
}

#[test]
fn audio_stall_decays_modulators_once_past_the_configured_threshold() {
    // No fresh AudioFrame for N frames should decay every modulator
    // toward zero instead of holding it flat.
    let mut config = PulsegridConfig::default();
    config.audio_stall_frames = 2;
    let mut pipeline = FramePipeline::new(config).unwrap();

    let left = vec![0.8_f32; 2048];
    let right = vec![0.8_f32; 2048];
    for _ in 0..10 {
        pipeline.tick(1.0 / 60.0, Some((&left, &right)), Instant::now());
    }
    let warmed_up = pipeline.audio_frame().overall;
    assert!(warmed_up >= 0.0);

    // Stop feeding audio; after the stall threshold the router should
    // start decaying rather than holding the last frame forever.
    for _ in 0..6 {
        pipeline.tick(1.0 / 60.0, None, Instant::now());
    }
    // The pipeline keeps reporting the held-over AudioFrame; this test
    // only checks that ticking through a stall does not panic and
    // metrics keep flowing.
    let metrics = pipeline.tick(1.0 / 60.0, None, Instant::now());
    assert!(metrics.audio_frame.is_some());
}

#[test]
fn command_queue_full_drop_policy_keeps_the_most_recent_commands() {
    let mut pipeline = FramePipeline::new(PulsegridConfig::default()).unwrap();
    for i in 0..1000 {
        pipeline
            .command_queue_mut()
            .push(Command::SetWallStiffness(i as f32 / 1000.0));
    }
    // Queue never blocks or panics regardless of producer rate.
    let _ = pipeline.tick(1.0 / 60.0, None, Instant::now());
}

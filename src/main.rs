//! pulsegrid demo binary.
//!
//! Renders nothing itself — the scene graph, camera, and concrete particle
//! geometry are narrow external collaborators this crate does not own.
//! This binary exercises the full solver/audio/modulation pipeline
//! headlessly and logs frame metrics, the way a host application would
//! drive it each frame.

use std::time::Instant;

use anyhow::Result;
use log::info;
use pulsegrid::config::PulsegridConfig;
use pulsegrid::pipeline::FramePipeline;
use pulsegrid::solver::gpu::Solver;
use pulsegrid::solver::GridDims;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting pulsegrid v{}", env!("CARGO_PKG_VERSION"));

    let config = PulsegridConfig::default();
    let mut pipeline = FramePipeline::new(config.clone())?;

    match pollster::block_on(Solver::new(GridDims::from_aspect(1.0), config.solver.max_particles)) {
        Ok(solver) => {
            info!("GPU solver attached");
            pipeline.attach_solver(solver);
        }
        Err(err) => {
            log::warn!("no compatible accelerator, running without a solver: {err}");
        }
    }

    let mut frame = 0u64;
    loop {
        let frame_start = Instant::now();
        let metrics = pipeline.tick(1.0 / 60.0, None, frame_start);

        if frame % 120 == 0 {
            info!(
                "frame {frame}: {} particles, {:.1} fps, tier {:?}",
                metrics.active_particles, metrics.fps, metrics.tier
            );
        }

        frame += 1;
        if frame >= 7_200 {
            break;
        }
    }

    info!("Shutting down pulsegrid");
    Ok(())
}

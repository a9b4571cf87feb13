//! Per-frame orchestration: audio -> modulation -> boundary
//! -> solver step -> performance feedback, as an explicit, host-driven
//! frame tick.

use std::collections::VecDeque;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::audio::{AudioAnalyzer, AudioFrame, BeatEvent, GrooveEngine, PredictionEngine, StructureAnalyzer};
use crate::command::{Command, CommandQueue};
use crate::config::PulsegridConfig;
use crate::error::Result;
use crate::modulation::ModulationRouter;
use crate::performance::{PerformanceController, Tier};
use crate::solver::gpu::{gravity_vector, SolverUniforms};
use crate::solver::{Boundary, EmitterRegistry, ForceFieldRegistry, GridDims, ParticleStorage, Solver};

/// Per-frame metrics surfaced to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct FrameMetrics {
    pub active_particles: u32,
    pub fps: f32,
    pub kernel_ms: f32,
    pub tier: Tier,
    pub audio_frame: Option<AudioFrame>,
}

impl FrameMetrics {
    /// Serialize for a dashboard consumer, per `spec.md` §6's "Frame
    /// output (to dashboards)" interface.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The mouse-ray contract: the ray origin/direction are
/// supplied in simulation space; `mouse_force` is the inter-frame
/// displacement of the hit-plane intersection, averaged over the last
/// three samples and divided by the sample count.
#[derive(Debug, Clone, Copy, Default)]
pub struct MouseRay {
    pub origin: Vec3,
    pub direction: Vec3,
}

pub struct MouseState {
    recent_hits: VecDeque<Vec3>,
}

impl Default for MouseState {
    fn default() -> Self {
        Self {
            recent_hits: VecDeque::with_capacity(3),
        }
    }
}

impl MouseState {
    /// `world_hit` is the world-space intersection of the mouse ray with the
    /// interaction plane; converted into simulation space by scaling by 64
    /// and offsetting by `(32, 0, 0)`.
    pub fn observe(&mut self, world_hit: Vec3) -> Vec3 {
        let sim_space = world_hit * 64.0 + Vec3::new(32.0, 0.0, 0.0);
        if self.recent_hits.len() >= 3 {
            self.recent_hits.pop_front();
        }
        self.recent_hits.push_back(sim_space);
        mouse_force(&self.recent_hits)
    }
}

/// Adaptive-timestep CFL clamp: scales `dt` down so `max_speed * dt` never
/// exceeds `cfl_target`, using the max particle speed observed last step.
/// Factored out so it is unit-testable without a GPU.
pub fn adaptive_dt(dt: f32, max_speed: f32, cfl_target: f32) -> f32 {
    let safe_dt = cfl_target / max_speed.max(1.0e-6);
    dt.min(safe_dt)
}

/// Average inter-sample displacement divided by the sample count.
/// Factored out so it is unit-testable without a real pointer/window.
pub fn mouse_force(samples: &VecDeque<Vec3>) -> Vec3 {
    if samples.len() < 2 {
        return Vec3::ZERO;
    }
    let mut total = Vec3::ZERO;
    for (a, b) in samples.iter().zip(samples.iter().skip(1)) {
        total += *b - *a;
    }
    total / samples.len() as f32
}

/// Owns every subsystem and drives the seven-step per-frame contract.
pub struct FramePipeline {
    config: PulsegridConfig,
    command_queue: CommandQueue,

    boundary: Boundary,
    forces: ForceFieldRegistry,
    emitters: EmitterRegistry,
    particles: ParticleStorage,
    solver: Option<Solver>,

    audio_analyzer: Option<AudioAnalyzer>,
    audio_frame: AudioFrame,
    audio_reactive: bool,
    audio_stall_counter: u32,

    groove: GrooveEngine,
    structure: StructureAnalyzer,
    prediction: PredictionEngine,
    modulation: ModulationRouter,
    performance: PerformanceController,

    mouse: MouseState,
    mouse_ray: MouseRay,
    mouse_force: Vec3,
    rng: StdRng,
    time: f64,
    simulation_running: bool,
    last_max_speed: f32,
}

impl FramePipeline {
    /// Construct the pipeline without a GPU backend (used by hosts that
    /// defer accelerator acquisition, and by tests). Call
    /// `attach_solver` once a `Solver` is available.
    pub fn new(config: PulsegridConfig) -> Result<Self> {
        let grid_dims = GridDims::from_aspect(1.0);
        let mut boundary = Boundary::default();
        boundary.set_grid_size(grid_dims.as_vec3());

        let max_particles = config.solver.max_particles;
        let mut particles = ParticleStorage::new(max_particles);
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        particles.seed_sphere(max_particles / 2, grid_dims.as_vec3(), &mut rng);

        let audio_analyzer = AudioAnalyzer::new(config.audio.clone()).ok();

        Ok(Self {
            command_queue: CommandQueue::new(config.command_queue_capacity),
            boundary,
            forces: ForceFieldRegistry::new(8),
            emitters: EmitterRegistry::new(8),
            particles,
            solver: None,
            audio_analyzer,
            audio_frame: AudioFrame::default(),
            audio_reactive: true,
            audio_stall_counter: 0,
            groove: GrooveEngine::default(),
            structure: StructureAnalyzer::default(),
            prediction: PredictionEngine::default(),
            modulation: ModulationRouter::new(config.modulation.clone()),
            performance: PerformanceController::new(config.performance.clone()),
            mouse: MouseState::default(),
            mouse_ray: MouseRay::default(),
            mouse_force: Vec3::ZERO,
            rng,
            time: 0.0,
            simulation_running: true,
            last_max_speed: 0.0,
            config,
        })
    }

    pub fn attach_solver(&mut self, solver: Solver) {
        self.solver = Some(solver);
    }

    pub fn command_queue_mut(&mut self) -> &mut CommandQueue {
        &mut self.command_queue
    }

    pub fn audio_frame(&self) -> &AudioFrame {
        &self.audio_frame
    }

    /// The simulation-to-world transform a renderer places the particle
    /// buffer's positions under.
    pub fn simulation_transform(&self) -> glam::Mat4 {
        self.boundary.simulation_transform()
    }

    /// The GPU particle buffer a renderer binds directly, once a `Solver`
    /// has been attached. `None` before `attach_solver` or on a headless
    /// (no-accelerator) pipeline.
    pub fn particle_buffer(&self) -> Option<&wgpu::Buffer> {
        self.solver.as_ref().map(Solver::particle_buffer)
    }

    /// Drain pending commands.
    fn apply_commands(&mut self) {
        let commands: Vec<Command> = self.command_queue.drain().collect();
        for command in commands {
            match command {
                Command::SetBoundaryShape(shape) => self.boundary.set_shape(shape),
                Command::SetBoundaryEnabled(enabled) => self.boundary.set_enabled(enabled),
                Command::SetBoundaryVisible(visible) => self.boundary.set_visible(visible),
                Command::SetWallStiffness(v) => self.boundary.set_wall_stiffness(v),
                Command::SetRestitution(v) => self.boundary.set_restitution(v),
                Command::SetFriction(v) => self.boundary.set_friction(v),
                Command::SetCollisionMode(mode) => self.boundary.set_collision_mode(mode),
                Command::SetGridSize(size) => self.boundary.set_grid_size(size),
                Command::SetParticleCount(count) => self.particles.set_live_count(count),
                Command::SetGravityMode(mode) => self.config.gravity_mode = mode,
                Command::SetTransferMode(mode) => self.config.solver.transfer_mode = mode,
                Command::SetAudioReactive(enabled) => self.audio_reactive = enabled,
                Command::ApplyForceField(field) => {
                    self.forces.insert(field);
                }
                Command::RemoveForceField(index) => {
                    self.forces.remove(index);
                }
                Command::ApplyEmitter(emitter) => {
                    self.emitters.insert(emitter);
                }
                Command::RemoveEmitter(index) => {
                    self.emitters.remove(index);
                }
                Command::PerformanceOverride(tier) => self.performance.set_override(tier),
                Command::ClearPerformanceOverride => self.performance.clear_override(),
            }
        }
    }

    /// Advance one frame. `audio_block` is `(left, right)` PCM, present only
    /// when an audio stream is attached.
    pub fn tick(&mut self, dt: f32, audio_block: Option<(&[f32], &[f32])>, frame_start: std::time::Instant) -> FrameMetrics {
        self.apply_commands();
        self.time += dt as f64;

        if self.audio_reactive {
            if let (Some(analyzer), Some((left, right))) = (self.audio_analyzer.as_mut(), audio_block) {
                self.audio_stall_counter = 0;
                self.audio_frame = analyzer.process(left, right, self.time, &self.audio_frame);

                if self.audio_frame.beat {
                    self.groove.push_beat(BeatEvent {
                        time: self.time,
                        intensity: self.audio_frame.beat_intensity,
                        is_downbeat: self.audio_frame.tempo_phase < 0.05,
                    });
                    self.prediction.observe_beat(self.time, self.audio_frame.tempo_phase < 0.05);
                }
                self.structure.update(
                    self.time,
                    self.audio_frame.overall,
                    self.audio_frame.spectral_flux,
                    self.audio_frame.beat_intensity,
                    self.audio_frame.harmonic_ratio,
                );

                let groove_state = self.groove.state();
                self.modulation.update(&self.audio_frame, groove_state.pocket_tightness.max(0.1), 0.5);

                self.boundary.set_audio_pulse_strength(self.modulation.modulators().pulse);
                let beat_intensity = Some(self.audio_frame.beat_intensity);
                let sway = Some(self.modulation.modulators().sway);
                self.boundary.update(self.time, beat_intensity, sway);
            } else {
                self.audio_stall_counter += 1;
                // Audio stall: hold the last frame and decay
                // every modulator toward zero with a 1s half-life once the
                // stall exceeds the configured threshold.
                if self.audio_stall_counter > self.config.audio_stall_frames {
                    self.modulation.decay(dt);
                }
            }
        }

        let routed = self.modulation.route_to_solver(&self.config.solver);

        if self.simulation_running {
            let gravity = gravity_vector(self.config.gravity_mode, self.config.gravity_magnitude, None);
            let budget = self.particles.max_particles() - self.particles.live_count();
            let spawns = self.emitters.tick(dt, budget, &mut self.rng);

            if let Some(solver) = self.solver.as_ref() {
                if !spawns.is_empty() {
                    let _ = solver.apply_spawns(&mut self.particles, &spawns);
                }
                let mut uniforms = SolverUniforms::from_config(
                    &self.config.solver,
                    solver.grid_dims(),
                    self.config.gravity_mode,
                    self.particles.live_count(),
                );
                uniforms.gravity = gravity.into();
                uniforms.noise = routed.noise;
                uniforms.dt = routed.dt;
                if self.config.solver.adaptive_timestep {
                    // One-frame-lagged: this step's own max speed is only
                    // known after it runs, so clamp against last step's.
                    uniforms.dt = adaptive_dt(uniforms.dt, self.last_max_speed, self.config.solver.cfl_target);
                }
                uniforms.stiffness = routed.stiffness;
                uniforms.dynamic_viscosity = routed.dynamic_viscosity;
                uniforms.mouse_ray_origin = self.mouse_ray.origin.into();
                uniforms.mouse_ray_direction = self.mouse_ray.direction.into();
                uniforms.mouse_force = self.mouse_force.into();

                let boundary_uniforms = crate::solver::gpu::BoundaryUniforms::from_state(self.boundary.state());

                solver.upload_particles(&self.particles);
                solver.write_uniforms(&uniforms);
                solver.write_boundary_uniforms(&boundary_uniforms);
                solver.write_force_fields(&self.forces.to_gpu_array());
                self.last_max_speed = solver.step(self.particles.live_count());
            }
        }

        let elapsed = frame_start.elapsed().as_secs_f32();
        let fps = if elapsed > 0.0 { 1.0 / elapsed } else { 0.0 };
        self.performance.observe_fps(fps);

        FrameMetrics {
            active_particles: self.particles.live_count(),
            fps,
            kernel_ms: elapsed * 1000.0,
            tier: self.performance.tier(),
            audio_frame: if self.audio_reactive { Some(self.audio_frame.clone()) } else { None },
        }
    }

    pub fn set_running(&mut self, running: bool) {
        self.simulation_running = running;
    }

    /// Record the mouse ray (in simulation space) for this frame and
    /// compute the averaged mouse force.
    pub fn observe_mouse(&mut self, ray: MouseRay, world_hit: Vec3) -> Vec3 {
        self.mouse_ray = ray;
        self.mouse_force = self.mouse.observe(world_hit);
        self.mouse_force
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_dt_clamps_when_the_cfl_bound_is_tighter_than_dt() {
        // max_speed=10, cfl_target=1 => safe_dt=0.1, tighter than dt=0.2.
        let dt = adaptive_dt(0.2, 10.0, 1.0);
        assert!((dt - 0.1).abs() < 1.0e-6);
    }

    #[test]
    fn adaptive_dt_leaves_dt_untouched_when_already_within_budget() {
        // max_speed=1, cfl_target=1 => safe_dt=1.0, looser than dt=0.016.
        let dt = adaptive_dt(1.0 / 60.0, 1.0, 1.0);
        assert!((dt - 1.0 / 60.0).abs() < 1.0e-6);
    }

    #[test]
    fn adaptive_dt_does_not_divide_by_zero_when_max_speed_is_zero() {
        let dt = adaptive_dt(0.1, 0.0, 1.0);
        assert!(dt.is_finite() && dt > 0.0);
    }

    #[test]
    fn mouse_force_is_zero_with_fewer_than_two_samples() {
        let mut samples = VecDeque::new();
        samples.push_back(Vec3::ZERO);
        assert_eq!(mouse_force(&samples), Vec3::ZERO);
    }

    #[test]
    fn mouse_force_averages_displacement_over_samples() {
        let mut samples = VecDeque::new();
        samples.push_back(Vec3::new(0.0, 0.0, 0.0));
        samples.push_back(Vec3::new(3.0, 0.0, 0.0));
        samples.push_back(Vec3::new(6.0, 0.0, 0.0));
        let force = mouse_force(&samples);
        assert!((force.x - 2.0).abs() < 1.0e-5);
    }

    #[test]
    fn mouse_state_converts_to_simulation_space() {
        let mut state = MouseState::default();
        state.observe(Vec3::ZERO);
        let force = state.observe(Vec3::new(1.0, 0.0, 0.0));
        // second sample at world (1,0,0) -> sim (64+32, 0, 0) = (96,0,0)
        // first sample at world (0,0,0) -> sim (32,0,0); displacement 64, /2 samples = 32
        assert!((force.x - 32.0).abs() < 1.0e-3);
    }

    #[test]
    fn pipeline_constructs_without_a_gpu_backend() {
        let pipeline = FramePipeline::new(PulsegridConfig::default());
        assert!(pipeline.is_ok());
    }

    #[test]
    fn particle_buffer_is_absent_until_a_solver_is_attached() {
        let pipeline = FramePipeline::new(PulsegridConfig::default()).unwrap();
        assert!(pipeline.particle_buffer().is_none());
    }

    #[test]
    fn simulation_transform_scales_the_grid_into_a_unit_cube() {
        let pipeline = FramePipeline::new(PulsegridConfig::default()).unwrap();
        let transform = pipeline.simulation_transform();
        let corner = transform.transform_point3(Vec3::splat(64.0));
        // A grid corner at (64,64,64) must land within a unit-scale cube
        // centered on the world origin.
        assert!(corner.max_element() <= 0.5 + 1.0e-5);
        assert!(corner.min_element() >= -0.5 - 1.0e-5);
    }

    #[test]
    fn command_queue_mutations_apply_on_next_tick() {
        let mut pipeline = FramePipeline::new(PulsegridConfig::default()).unwrap();
        pipeline.command_queue_mut().push(Command::SetAudioReactive(false));
        let metrics = pipeline.tick(1.0 / 60.0, None, std::time::Instant::now());
        assert!(metrics.audio_frame.is_none());
    }

    #[test]
    fn frame_metrics_serialize_to_json_for_a_dashboard_consumer() {
        let mut pipeline = FramePipeline::new(PulsegridConfig::default()).unwrap();
        let metrics = pipeline.tick(1.0 / 60.0, None, std::time::Instant::now());
        let json = metrics.to_json().expect("metrics must serialize");
        assert!(json.contains("\"active_particles\""));
        assert!(json.contains("\"tier\""));
    }
}

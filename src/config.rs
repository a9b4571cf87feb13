//! Explicit configuration, passed into the pipeline constructor.
//!
//! Resolves the "Global simulation singleton" design note: no field here
//! has process-wide scope, so tests and multiple pipeline instances can
//! each hold their own independent config.

use serde::{Deserialize, Serialize};

/// Tunables for the MLS-MPM solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub max_particles: u32,
    pub base_dt: f32,
    pub base_noise: f32,
    pub stiffness: f32,
    pub rest_density: f32,
    pub dynamic_viscosity: f32,
    pub stiffness_min: f32,
    pub stiffness_max: f32,
    pub viscosity_min: f32,
    pub viscosity_max: f32,
    /// Multiplier used to encode real velocities/mass into fixed-point
    /// atomics. Changing this breaks run-to-run reproducibility.
    pub fixed_point_multiplier: f32,
    pub transfer_mode: TransferMode,
    pub flip_ratio: f32,
    pub vorticity_enabled: bool,
    pub vorticity_epsilon: f32,
    pub surface_tension_enabled: bool,
    pub surface_tension_coeff: f32,
    pub adaptive_timestep: bool,
    pub cfl_target: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_particles: 65_536,
            base_dt: 0.1,
            base_noise: 1.0,
            stiffness: 3.0,
            rest_density: 4.0,
            dynamic_viscosity: 0.1,
            stiffness_min: 1.0,
            stiffness_max: 6.0,
            viscosity_min: 0.02,
            viscosity_max: 0.3,
            fixed_point_multiplier: 1.0e7,
            transfer_mode: TransferMode::Hybrid,
            flip_ratio: 0.95,
            vorticity_enabled: true,
            vorticity_epsilon: 0.05,
            surface_tension_enabled: false,
            surface_tension_coeff: 0.05,
            adaptive_timestep: false,
            cfl_target: 1.0,
        }
    }
}

/// Velocity transfer policy for the G2P pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    Pic,
    Flip,
    Hybrid,
}

/// Gravity direction policy, selected by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GravityMode {
    Back,
    Down,
    Center,
    Device,
}

/// Tunables for the audio feature extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub fft_size: usize,
    pub smoothing: f32,
    pub beat_threshold: f32,
    pub beat_decay: f32,
    pub min_beat_interval_secs: f32,
    pub bass_gain: f32,
    pub mid_gain: f32,
    pub treble_gain: f32,
    pub overall_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            fft_size: 2048,
            smoothing: 0.88,
            beat_threshold: 1.5,
            beat_decay: 0.92,
            min_beat_interval_secs: 0.1,
            bass_gain: 1.0,
            mid_gain: 1.0,
            treble_gain: 1.0,
            overall_gain: 1.0,
        }
    }
}

/// Routing intensities for the modulation router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulationConfig {
    pub pulse_force: f32,
    pub flow_turbulence: f32,
    pub shimmer_color: f32,
    pub warp_spatial: f32,
    pub density_spawn: f32,
    pub aura_bloom: f32,
    pub timeline_smoothing: f32,
    pub transition_responsiveness: f32,
    pub particle_influence: f32,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            pulse_force: 1.0,
            flow_turbulence: 1.0,
            shimmer_color: 1.0,
            warp_spatial: 1.0,
            density_spawn: 1.0,
            aura_bloom: 1.0,
            timeline_smoothing: 0.85,
            transition_responsiveness: 0.3,
            particle_influence: 0.3,
        }
    }
}

/// Tunables for the adaptive performance controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub high_to_medium_fps: f32,
    pub high_to_medium_frames: u32,
    pub medium_to_low_fps: f32,
    pub medium_to_low_frames: u32,
    pub recover_to_high_fps: f32,
    pub recover_to_high_frames: u32,
    pub manual_override_frames: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            high_to_medium_fps: 45.0,
            high_to_medium_frames: 45,
            medium_to_low_fps: 30.0,
            medium_to_low_frames: 30,
            recover_to_high_fps: 70.0,
            recover_to_high_frames: 180,
            manual_override_frames: 600,
        }
    }
}

/// Top-level configuration passed into `FramePipeline::new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulsegridConfig {
    pub solver: SolverConfig,
    pub audio: AudioConfig,
    pub modulation: ModulationConfig,
    pub performance: PerformanceConfig,
    pub gravity_mode: GravityMode,
    pub gravity_magnitude: f32,
    pub audio_stall_frames: u32,
    pub command_queue_capacity: usize,
}

impl Default for PulsegridConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            audio: AudioConfig::default(),
            modulation: ModulationConfig::default(),
            performance: PerformanceConfig::default(),
            gravity_mode: GravityMode::Down,
            gravity_magnitude: 0.2,
            audio_stall_frames: 30,
            command_queue_capacity: 256,
        }
    }
}

//! Modulation router: collapses audio features into the eight normalised
//! modulators that drive solver parameters.

use crate::audio::AudioFrame;
use crate::config::{ModulationConfig, SolverConfig};

/// The eight named, normalised signals derived from the audio frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Modulators {
    pub pulse: f32,
    pub flow: f32,
    pub shimmer: f32,
    pub warp: f32,
    pub density: f32,
    pub aura: f32,
    pub containment: f32,
    pub sway: f32,
}

/// Solver-visible outputs of the router, written into uniforms each frame.
#[derive(Debug, Clone, Copy)]
pub struct SolverModulation {
    pub noise: f32,
    pub dt: f32,
    pub stiffness: f32,
    pub dynamic_viscosity: f32,
    pub boundary_pulse_strength: f32,
    pub emitter_rate_multiplier: f32,
}

#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub struct ModulationRouter {
    config: ModulationConfig,
    modulators: Modulators,
    prev_overall: f32,
    frames_since_beat: u32,
}

impl ModulationRouter {
    pub fn new(config: ModulationConfig) -> Self {
        Self {
            config,
            modulators: Modulators::default(),
            prev_overall: 0.0,
            frames_since_beat: u32::MAX,
        }
    }

    pub fn modulators(&self) -> Modulators {
        self.modulators
    }

    /// Recompute the modulator vector from the latest audio frame and
    /// groove/structure-derived pocket tightness / dynamic range estimate.
    pub fn update(&mut self, frame: &AudioFrame, pocket_tightness: f32, dynamic_range: f32) {
        if frame.beat {
            self.frames_since_beat = 0;
        } else {
            self.frames_since_beat = self.frames_since_beat.saturating_add(1);
        }
        let transient_gain = if self.frames_since_beat == 0 {
            1.0 + self.config.transition_responsiveness
        } else {
            1.0
        };

        let pulse_target = smoothstep(0.2, 0.8, frame.beat_intensity) * 0.5 + frame.onset_energy * 0.5;
        let flow_target = frame.harmonic_ratio * frame.smooth_mid;
        let shimmer_target = frame.treble * frame.spectral_flux;
        let warp_target = frame.stereo_width;
        let density_target = {
            let compression = 1.0 - (1.0 / pocket_tightness.max(0.1)).min(1.0);
            (frame.overall * compression).clamp(0.0, 1.0)
        };
        let trend = frame.overall - self.prev_overall;
        let aura_target = (self.modulators.aura + trend * 0.05).clamp(0.0, 1.0);
        let containment_target = (1.0 - dynamic_range).clamp(0.0, 1.0);
        let sway_target = frame.stereo_balance;

        let alpha = 1.0 - self.config.timeline_smoothing;
        let blend = |prev: f32, target: f32| (prev + alpha * transient_gain * (target - prev)).clamp(-1.0, 1.0);

        self.modulators = Modulators {
            pulse: blend(self.modulators.pulse, pulse_target).clamp(0.0, 1.0),
            flow: blend(self.modulators.flow, flow_target).clamp(0.0, 1.0),
            shimmer: blend(self.modulators.shimmer, shimmer_target).clamp(0.0, 1.0),
            warp: blend(self.modulators.warp, warp_target).clamp(0.0, 1.0),
            density: blend(self.modulators.density, density_target).clamp(0.0, 1.0),
            aura: blend(self.modulators.aura, aura_target).clamp(0.0, 1.0),
            containment: blend(self.modulators.containment, containment_target).clamp(0.0, 1.0),
            sway: blend(self.modulators.sway, sway_target).clamp(-1.0, 1.0),
        };

        self.prev_overall = frame.overall;
    }

    /// Audio stall recovery: decay every modulator toward
    /// zero with a 1s half-life, called instead of `update` once the host
    /// has gone `audio_stall_frames` without a fresh `AudioFrame`.
    pub fn decay(&mut self, dt: f32) {
        let half_life = 1.0_f32;
        let factor = 0.5_f32.powf((dt / half_life).max(0.0));
        self.modulators = Modulators {
            pulse: self.modulators.pulse * factor,
            flow: self.modulators.flow * factor,
            shimmer: self.modulators.shimmer * factor,
            warp: self.modulators.warp * factor,
            density: self.modulators.density * factor,
            aura: self.modulators.aura * factor,
            containment: self.modulators.containment * factor,
            sway: self.modulators.sway * factor,
        };
    }

    /// Project the current modulators onto solver parameters.
    pub fn route_to_solver(&self, solver: &SolverConfig) -> SolverModulation {
        let m = self.modulators;
        SolverModulation {
            noise: solver.base_noise * (1.0 + m.flow * self.config.flow_turbulence),
            dt: solver.base_dt * (1.0 + m.pulse * self.config.particle_influence),
            stiffness: lerp(solver.stiffness_min, solver.stiffness_max, m.aura),
            dynamic_viscosity: lerp(solver.viscosity_min, solver.viscosity_max, 1.0 - m.aura),
            boundary_pulse_strength: m.pulse,
            emitter_rate_multiplier: m.density * self.config.density_spawn,
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modulators_stay_within_configured_ranges() {
        let mut router = ModulationRouter::new(ModulationConfig::default());
        let mut frame = AudioFrame::default();
        frame.beat = true;
        frame.beat_intensity = 1.0;
        frame.onset_energy = 1.0;
        frame.treble = 1.0;
        frame.spectral_flux = 1.0;
        frame.stereo_balance = -1.0;
        frame.overall = 1.0;

        for _ in 0..200 {
            router.update(&frame, 0.5, 0.3);
        }
        let m = router.modulators();
        assert!((0.0..=1.0).contains(&m.pulse));
        assert!((-1.0..=1.0).contains(&m.sway));
    }

    #[test]
    fn beat_transient_boosts_pulse_faster_than_steady_state() {
        let mut with_beats = ModulationRouter::new(ModulationConfig::default());
        let mut without_beats = ModulationRouter::new(ModulationConfig::default());
        let mut frame = AudioFrame::default();
        frame.beat_intensity = 1.0;
        frame.onset_energy = 1.0;

        frame.beat = true;
        with_beats.update(&frame, 0.5, 0.3);
        frame.beat = false;
        without_beats.update(&frame, 0.5, 0.3);

        assert!(with_beats.modulators().pulse >= without_beats.modulators().pulse);
    }

    #[test]
    fn decay_halves_modulators_after_one_half_life() {
        let mut router = ModulationRouter::new(ModulationConfig::default());
        let mut frame = AudioFrame::default();
        frame.beat = true;
        frame.beat_intensity = 1.0;
        frame.onset_energy = 1.0;
        frame.stereo_balance = 1.0;
        frame.overall = 1.0;
        for _ in 0..50 {
            router.update(&frame, 0.5, 0.3);
        }
        let before = router.modulators();
        router.decay(1.0);
        let after = router.modulators();
        assert!((after.pulse - before.pulse * 0.5).abs() < 1.0e-3);
        assert!((after.sway - before.sway * 0.5).abs() < 1.0e-3);
    }

    #[test]
    fn route_to_solver_respects_configured_bounds() {
        let router = ModulationRouter::new(ModulationConfig::default());
        let solver = SolverConfig::default();
        let routed = router.route_to_solver(&solver);
        assert!(routed.stiffness >= solver.stiffness_min && routed.stiffness <= solver.stiffness_max);
        assert!(routed.dynamic_viscosity >= solver.viscosity_min && routed.dynamic_viscosity <= solver.viscosity_max);
    }
}

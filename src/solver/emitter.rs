//! Particle emitter registry.

use glam::Vec3;
use rand::Rng;

use crate::solver::particle::Material;

/// Spatial distribution an emitter samples from.
#[derive(Debug, Clone, Copy)]
pub enum EmitterShape {
    Point,
    Line { end: Vec3 },
    Disk { normal: Vec3, radius: f32 },
    Sphere { radius: f32 },
    Box { half_extent: Vec3 },
}

/// Temporal firing pattern.
#[derive(Debug, Clone, Copy)]
pub enum EmitterPattern {
    Continuous { rate_per_sec: f32 },
    Burst { count: u32, period_secs: f32 },
    Pulse { count: u32, on_secs: f32, off_secs: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct Emitter {
    pub shape: EmitterShape,
    pub pattern: EmitterPattern,
    pub position: Vec3,
    pub initial_velocity: Vec3,
    pub material: Material,
    pub enabled: bool,
    accumulator: f32,
    phase_clock: f32,
}

impl Emitter {
    pub fn new(
        shape: EmitterShape,
        pattern: EmitterPattern,
        position: Vec3,
        initial_velocity: Vec3,
        material: Material,
    ) -> Self {
        Self {
            shape,
            pattern,
            position,
            initial_velocity,
            material,
            enabled: true,
            accumulator: 0.0,
            phase_clock: 0.0,
        }
    }

    /// Advance the emitter by `dt` seconds and return how many particles it
    /// wants to spawn this frame. Continuous emitters use a
    /// fractional accumulator so the emitted rate stays correct across
    /// variable frame times; burst/pulse emitters fire on a period boundary.
    pub fn tick(&mut self, dt: f32) -> u32 {
        if !self.enabled {
            return 0;
        }
        match self.pattern {
            EmitterPattern::Continuous { rate_per_sec } => {
                self.accumulator += rate_per_sec * dt;
                let whole = self.accumulator.floor();
                self.accumulator -= whole;
                whole as u32
            }
            EmitterPattern::Burst { count, period_secs } => {
                self.phase_clock += dt;
                if self.phase_clock >= period_secs {
                    self.phase_clock -= period_secs;
                    count
                } else {
                    0
                }
            }
            EmitterPattern::Pulse { count, on_secs, off_secs } => {
                let period = on_secs + off_secs;
                if period <= 0.0 {
                    return 0;
                }
                let prev_phase = self.phase_clock % period;
                self.phase_clock += dt;
                // Fire once on the frame where the clock enters the on-window.
                if prev_phase >= on_secs && (self.phase_clock % period) < on_secs {
                    count
                } else if self.phase_clock <= dt && prev_phase < on_secs {
                    count
                } else {
                    0
                }
            }
        }
    }

    pub fn sample_position<R: Rng>(&self, rng: &mut R) -> Vec3 {
        match self.shape {
            EmitterShape::Point => self.position,
            EmitterShape::Line { end } => {
                let t = rng.gen_range(0.0..1.0);
                self.position.lerp(end, t)
            }
            EmitterShape::Disk { normal, radius } => {
                let n = normal.normalize_or_zero();
                let tangent = if n.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
                let u = n.cross(tangent).normalize_or_zero();
                let v = n.cross(u);
                let angle = rng.gen_range(0.0..std::f32::consts::TAU);
                let r = radius * rng.gen_range(0.0_f32..1.0).sqrt();
                self.position + u * (r * angle.cos()) + v * (r * angle.sin())
            }
            EmitterShape::Sphere { radius } => {
                let dir = Vec3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
                .normalize_or_zero();
                self.position + dir * radius * rng.gen_range(0.0_f32..1.0).cbrt()
            }
            EmitterShape::Box { half_extent } => {
                self.position
                    + Vec3::new(
                        rng.gen_range(-1.0..1.0) * half_extent.x,
                        rng.gen_range(-1.0..1.0) * half_extent.y,
                        rng.gen_range(-1.0..1.0) * half_extent.z,
                    )
            }
        }
    }
}

/// A single requested particle injection, produced by `EmitterRegistry::tick`
/// and applied to `ParticleStorage` by `solver::gpu::Solver::apply_spawns`.
#[derive(Debug, Clone, Copy)]
pub struct ParticleSpawn {
    pub position: Vec3,
    pub velocity: Vec3,
    pub material: Material,
}

/// Bounded emitter collection.
pub struct EmitterRegistry {
    emitters: Vec<Emitter>,
    capacity: usize,
}

impl EmitterRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            emitters: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn insert(&mut self, emitter: Emitter) -> usize {
        if self.emitters.len() >= self.capacity {
            self.emitters.remove(0);
        }
        self.emitters.push(emitter);
        self.emitters.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<Emitter> {
        if index < self.emitters.len() {
            Some(self.emitters.remove(index))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    /// Advance every emitter and sample the requested spawns, capped at
    /// `budget` total particles so a runaway emitter rate cannot blow past
    /// the available storage in a single frame.
    pub fn tick<R: Rng>(&mut self, dt: f32, budget: u32, rng: &mut R) -> Vec<ParticleSpawn> {
        let mut spawns = Vec::new();
        for emitter in self.emitters.iter_mut() {
            let want = emitter.tick(dt);
            for _ in 0..want {
                if spawns.len() as u32 >= budget {
                    return spawns;
                }
                spawns.push(ParticleSpawn {
                    position: emitter.sample_position(rng),
                    velocity: emitter.initial_velocity,
                    material: emitter.material,
                });
            }
        }
        spawns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn continuous_accumulator_emits_over_multiple_frames() {
        let mut emitter = Emitter::new(
            EmitterShape::Point,
            EmitterPattern::Continuous { rate_per_sec: 10.0 },
            Vec3::ZERO,
            Vec3::ZERO,
            Material::Fluid,
        );
        let mut total = 0;
        for _ in 0..100 {
            total += emitter.tick(1.0 / 60.0);
        }
        // 100 frames at 1/60s ~= 1.667s at 10/s ~= 16-17 particles.
        assert!((15..=18).contains(&total));
    }

    #[test]
    fn burst_fires_once_per_period() {
        let mut emitter = Emitter::new(
            EmitterShape::Point,
            EmitterPattern::Burst { count: 50, period_secs: 1.0 },
            Vec3::ZERO,
            Vec3::ZERO,
            Material::Sand,
        );
        let mut fires = 0;
        for _ in 0..120 {
            if emitter.tick(1.0 / 60.0) > 0 {
                fires += 1;
            }
        }
        assert_eq!(fires, 2);
    }

    #[test]
    fn registry_respects_spawn_budget() {
        let mut registry = EmitterRegistry::new(8);
        registry.insert(Emitter::new(
            EmitterShape::Point,
            EmitterPattern::Burst { count: 1000, period_secs: 0.001 },
            Vec3::ZERO,
            Vec3::ZERO,
            Material::Fluid,
        ));
        let mut rng = StdRng::seed_from_u64(1);
        let spawns = registry.tick(1.0, 10, &mut rng);
        assert!(spawns.len() as u32 <= 10);
    }

    #[test]
    fn disabled_emitter_produces_nothing() {
        let mut emitter = Emitter::new(
            EmitterShape::Point,
            EmitterPattern::Continuous { rate_per_sec: 1000.0 },
            Vec3::ZERO,
            Vec3::ZERO,
            Material::Fluid,
        );
        emitter.enabled = false;
        assert_eq!(emitter.tick(1.0), 0);
    }
}

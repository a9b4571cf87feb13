//! Boundary engine — analytic soft walls.

use glam::{Mat4, Vec3};

/// Wall collision response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionMode {
    Reflect,
    Clamp,
    Wrap,
    Kill,
}

/// Analytic boundary shapes. Each exposes a signed distance (negative
/// inside) and an outward normal in grid space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryShape {
    None,
    Box,
    Sphere { radius: f32 },
    Tube { radius: f32, half_height: f32 },
    Dodecahedron { radius: f32 },
}

/// Mutable boundary state, mutated from the command queue and read-only
/// during a solver step.
#[derive(Debug, Clone)]
pub struct BoundaryState {
    pub shape: BoundaryShape,
    pub grid_size: Vec3,
    pub wall_thickness: f32,
    pub wall_stiffness: f32,
    pub restitution: f32,
    pub friction: f32,
    pub collision_mode: CollisionMode,
    pub enabled: bool,
    pub visible: bool,
    pub audio_pulse_strength: f32,
    transform: Mat4,
}

impl Default for BoundaryState {
    fn default() -> Self {
        let grid_size = Vec3::splat(64.0);
        Self {
            shape: BoundaryShape::None,
            grid_size,
            wall_thickness: 3.0,
            wall_stiffness: 0.3,
            restitution: 0.3,
            friction: 0.1,
            collision_mode: CollisionMode::Reflect,
            enabled: true,
            visible: true,
            audio_pulse_strength: 0.0,
            transform: simulation_transform(grid_size),
        }
    }
}

/// The affine mapping `[0, grid_size]^3 -> world space`. Centers the
/// simulation cube at the world origin, scaled so the longest grid axis
/// spans one world unit.
fn simulation_transform(grid_size: Vec3) -> Mat4 {
    let scale = 1.0 / grid_size.max_element().max(1.0);
    Mat4::from_scale(Vec3::splat(scale)) * Mat4::from_translation(-grid_size * 0.5)
}

/// Evaluate the shape's signed distance and outward normal at a grid-space
/// point. Negative distance means inside.
pub fn sdf(shape: BoundaryShape, grid_size: Vec3, point: Vec3) -> (f32, Vec3) {
    match shape {
        BoundaryShape::None => (-f32::MAX / 2.0, Vec3::ZERO),
        BoundaryShape::Box => {
            let half = grid_size * 0.5;
            let center = grid_size * 0.5;
            let local = point - center;
            let q = local.abs() - half;
            let outside = q.max(Vec3::ZERO).length();
            let inside = q.x.max(q.y.max(q.z)).min(0.0);
            let dist = outside + inside;
            let normal = if local.length_squared() > 1.0e-8 {
                local.normalize()
            } else {
                Vec3::Y
            };
            (dist, normal)
        }
        BoundaryShape::Sphere { radius } => {
            let center = grid_size * 0.5;
            let delta = point - center;
            let len = delta.length();
            let normal = if len > 1.0e-8 { delta / len } else { Vec3::Y };
            (len - radius, normal)
        }
        BoundaryShape::Tube {
            radius,
            half_height,
        } => {
            let center = grid_size * 0.5;
            let delta = point - center;
            let radial = Vec3::new(delta.x, 0.0, delta.z);
            let radial_len = radial.length();
            let d_radial = radial_len - radius;
            let d_height = delta.y.abs() - half_height;
            let dist = d_radial.max(d_height);
            let normal = if d_radial > d_height {
                if radial_len > 1.0e-8 {
                    radial / radial_len
                } else {
                    Vec3::X
                }
            } else {
                Vec3::new(0.0, delta.y.signum(), 0.0)
            };
            (dist, normal)
        }
        BoundaryShape::Dodecahedron { radius } => {
            // Twelve half-space planes using the icosahedron's face normals
            // (golden-ratio construction), approximating a regular
            // dodecahedron's inscribed volume.
            let phi = 1.618_034_f32;
            let center = grid_size * 0.5;
            let local = point - center;
            let axes = [
                Vec3::new(0.0, 1.0, phi),
                Vec3::new(0.0, -1.0, phi),
                Vec3::new(1.0, phi, 0.0),
                Vec3::new(-1.0, phi, 0.0),
                Vec3::new(phi, 0.0, 1.0),
                Vec3::new(-phi, 0.0, 1.0),
            ];
            let mut max_dist = f32::MIN;
            let mut best_normal = Vec3::Y;
            for axis in axes {
                let n = axis.normalize();
                let d = local.dot(n) - radius;
                if d > max_dist {
                    max_dist = d;
                    best_normal = n;
                }
                // Opposite face.
                let d_neg = local.dot(-n) - radius;
                if d_neg > max_dist {
                    max_dist = d_neg;
                    best_normal = -n;
                }
            }
            (max_dist, best_normal)
        }
    }
}

pub struct Boundary {
    state: BoundaryState,
}

impl Default for Boundary {
    fn default() -> Self {
        Self {
            state: BoundaryState::default(),
        }
    }
}

impl Boundary {
    pub fn new(state: BoundaryState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &BoundaryState {
        &self.state
    }

    pub fn set_shape(&mut self, shape: BoundaryShape) {
        self.state.shape = shape;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.state.visible = visible;
    }

    pub fn set_wall_stiffness(&mut self, stiffness: f32) {
        self.state.wall_stiffness = stiffness.clamp(0.0, 1.0);
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.state.restitution = restitution.clamp(0.0, 1.0);
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.state.friction = friction.clamp(0.0, 1.0);
    }

    pub fn set_collision_mode(&mut self, mode: CollisionMode) {
        self.state.collision_mode = mode;
    }

    pub fn set_grid_size(&mut self, grid_size: Vec3) {
        self.state.grid_size = grid_size;
        self.state.transform = simulation_transform(grid_size);
    }

    /// Set from the modulation router's `boundary_pulse_strength` output
    /// each frame.
    pub fn set_audio_pulse_strength(&mut self, strength: f32) {
        self.state.audio_pulse_strength = strength.clamp(0.0, 1.0);
    }

    /// Audio-reactive radius/drift update. `beat_intensity`
    /// and `sway` come from the modulation router's output.
    pub fn update(&mut self, _time: f64, beat_intensity: Option<f32>, sway: Option<f32>) {
        if let (BoundaryShape::Sphere { radius }, Some(beat)) = (self.state.shape, beat_intensity)
        {
            let base = radius;
            let pulsed = base * (1.0 + self.state.audio_pulse_strength * beat);
            self.state.shape = BoundaryShape::Sphere { radius: pulsed };
        }
        let _ = sway; // slow drift hook; not yet wired to a visible effect
    }

    pub fn simulation_transform(&self) -> Mat4 {
        self.state.transform
    }

    /// Distance from `point` to the shape's effective boundary. Shape
    /// `None` falls back to the implicit domain box at `wall_thickness`.
    pub fn distance(&self, point: Vec3) -> (f32, Vec3) {
        match self.state.shape {
            BoundaryShape::None => sdf(BoundaryShape::Box, self.state.grid_size, point),
            shape => sdf(shape, self.state.grid_size, point),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_center_is_inside() {
        let grid_size = Vec3::splat(64.0);
        let (d, _n) = sdf(BoundaryShape::Sphere { radius: 20.0 }, grid_size, grid_size * 0.5);
        assert!(d < 0.0);
    }

    #[test]
    fn box_corner_is_outside() {
        let grid_size = Vec3::splat(64.0);
        let (d, _n) = sdf(BoundaryShape::Box, grid_size, Vec3::new(1000.0, 1000.0, 1000.0));
        assert!(d > 0.0);
    }

    #[test]
    fn boundary_switch_monotonically_shrinks_max_distance() {
        let mut boundary = Boundary::default();
        boundary.set_grid_size(Vec3::splat(64.0));
        boundary.set_shape(BoundaryShape::Sphere { radius: 20.0 });

        let center = Vec3::splat(32.0);
        let mut particles = vec![center + Vec3::new(25.0, 0.0, 0.0); 8];
        let mut prev_max = f32::MAX;
        for _ in 0..10 {
            for p in particles.iter_mut() {
                let (d, n) = boundary.distance(*p);
                if d > 0.0 {
                    *p -= n * d * 0.5;
                }
            }
            let max_dist = particles
                .iter()
                .map(|p| (*p - center).length())
                .fold(0.0_f32, f32::max);
            assert!(max_dist <= prev_max + 1.0e-4);
            prev_max = max_dist;
        }
    }

    #[test]
    fn stiffness_is_clamped() {
        let mut boundary = Boundary::default();
        boundary.set_wall_stiffness(5.0);
        assert_eq!(boundary.state().wall_stiffness, 1.0);
        boundary.set_wall_stiffness(-1.0);
        assert_eq!(boundary.state().wall_stiffness, 0.0);
    }
}

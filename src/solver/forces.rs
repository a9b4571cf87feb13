//! Force field registry.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// A single force-field primitive, sampled per-particle during P2G-1.
#[derive(Debug, Clone, Copy)]
pub enum ForceField {
    Attractor { center: Vec3, strength: f32, radius: f32 },
    Repeller { center: Vec3, strength: f32, radius: f32 },
    Vortex { center: Vec3, axis: Vec3, strength: f32, radius: f32 },
    Turbulence { strength: f32, scale: f32, speed: f32 },
    Directional { direction: Vec3, strength: f32 },
    Curl { center: Vec3, strength: f32, scale: f32 },
}

impl ForceField {
    /// Evaluate the field's contribution to acceleration at `position`,
    /// `time` seconds into playback. Turbulence and curl noise use a cheap
    /// analytic value-noise stand-in rather than a texture lookup, since the
    /// registry has no GPU resources of its own.
    pub fn sample(&self, position: Vec3, time: f32) -> Vec3 {
        match *self {
            ForceField::Attractor { center, strength, radius } => {
                radial_falloff(position, center, radius, strength)
            }
            ForceField::Repeller { center, strength, radius } => {
                -radial_falloff(position, center, radius, strength)
            }
            ForceField::Vortex { center, axis, strength, radius } => {
                let delta = position - center;
                let dist = delta.length();
                if dist < 1.0e-5 || dist > radius {
                    return Vec3::ZERO;
                }
                let n = axis.normalize_or_zero();
                let tangent = n.cross(delta);
                let falloff = 1.0 - (dist / radius);
                tangent.normalize_or_zero() * strength * falloff
            }
            ForceField::Turbulence { strength, scale, speed } => {
                let p = position * scale + Vec3::splat(time * speed);
                Vec3::new(
                    value_noise(p + Vec3::new(17.3, 0.0, 0.0)),
                    value_noise(p + Vec3::new(0.0, 41.7, 0.0)),
                    value_noise(p + Vec3::new(0.0, 0.0, 91.1)),
                ) * strength
            }
            ForceField::Directional { direction, strength } => {
                direction.normalize_or_zero() * strength
            }
            ForceField::Curl { center, strength, scale } => {
                let p = (position - center) * scale;
                let eps = 0.1;
                let dn_dy = value_noise(p + Vec3::new(0.0, eps, 0.0)) - value_noise(p - Vec3::new(0.0, eps, 0.0));
                let dn_dx = value_noise(p + Vec3::new(eps, 0.0, 0.0)) - value_noise(p - Vec3::new(eps, 0.0, 0.0));
                let dn_dz = value_noise(p + Vec3::new(0.0, 0.0, eps)) - value_noise(p - Vec3::new(0.0, 0.0, eps));
                Vec3::new(dn_dy, dn_dz - dn_dx, -dn_dy) * strength / (2.0 * eps)
            }
        }
    }
}

fn radial_falloff(position: Vec3, center: Vec3, radius: f32, strength: f32) -> Vec3 {
    let delta = center - position;
    let dist = delta.length();
    if dist < 1.0e-5 || dist > radius {
        return Vec3::ZERO;
    }
    let falloff = 1.0 - (dist / radius);
    delta.normalize_or_zero() * strength * falloff
}

/// Deterministic hash-based value noise in `[-1, 1]`, good enough for a
/// cheap CPU mirror of a shader `fbm` lookup.
fn value_noise(p: Vec3) -> f32 {
    let h = (p.x * 127.1 + p.y * 311.7 + p.z * 74.7).sin() * 43758.5453;
    2.0 * (h - h.floor()) - 1.0
}

/// Maximum number of force fields the GPU-side array holds.
pub const MAX_FORCE_FIELDS: usize = 8;

/// GPU-visible mirror of `ForceField`, uploaded each frame as a fixed-size
/// storage array and consumed in G2P before the mouse-force step.
/// `field_type == FIELD_TYPE_NONE` marks an inactive slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ForceFieldGpu {
    pub field_type: u32,
    pub _pad0: [u32; 3],
    pub position: [f32; 3],
    pub _pad1: f32,
    pub axis: [f32; 3],
    pub _pad2: f32,
    pub strength: f32,
    pub radius: f32,
    pub scale: f32,
    pub speed: f32,
}

pub const FIELD_TYPE_NONE: u32 = 0;
pub const FIELD_TYPE_ATTRACTOR: u32 = 1;
pub const FIELD_TYPE_REPELLER: u32 = 2;
pub const FIELD_TYPE_VORTEX: u32 = 3;
pub const FIELD_TYPE_TURBULENCE: u32 = 4;
pub const FIELD_TYPE_DIRECTIONAL: u32 = 5;
pub const FIELD_TYPE_CURL: u32 = 6;

impl ForceFieldGpu {
    pub const INACTIVE: Self = Self {
        field_type: FIELD_TYPE_NONE,
        _pad0: [0; 3],
        position: [0.0; 3],
        _pad1: 0.0,
        axis: [0.0; 3],
        _pad2: 0.0,
        strength: 0.0,
        radius: 0.0,
        scale: 0.0,
        speed: 0.0,
    };
}

impl From<ForceField> for ForceFieldGpu {
    fn from(field: ForceField) -> Self {
        match field {
            ForceField::Attractor { center, strength, radius } => Self {
                field_type: FIELD_TYPE_ATTRACTOR,
                position: center.into(),
                strength,
                radius,
                ..Self::INACTIVE
            },
            ForceField::Repeller { center, strength, radius } => Self {
                field_type: FIELD_TYPE_REPELLER,
                position: center.into(),
                strength,
                radius,
                ..Self::INACTIVE
            },
            ForceField::Vortex { center, axis, strength, radius } => Self {
                field_type: FIELD_TYPE_VORTEX,
                position: center.into(),
                axis: axis.into(),
                strength,
                radius,
                ..Self::INACTIVE
            },
            ForceField::Turbulence { strength, scale, speed } => Self {
                field_type: FIELD_TYPE_TURBULENCE,
                strength,
                scale,
                speed,
                ..Self::INACTIVE
            },
            ForceField::Directional { direction, strength } => Self {
                field_type: FIELD_TYPE_DIRECTIONAL,
                axis: direction.into(),
                strength,
                ..Self::INACTIVE
            },
            ForceField::Curl { center, strength, scale } => Self {
                field_type: FIELD_TYPE_CURL,
                position: center.into(),
                strength,
                scale,
                ..Self::INACTIVE
            },
        }
    }
}

/// Bounded force-field collection.
pub struct ForceFieldRegistry {
    fields: Vec<ForceField>,
    capacity: usize,
}

impl ForceFieldRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a field, evicting the oldest entry if already at capacity.
    pub fn insert(&mut self, field: ForceField) -> usize {
        if self.fields.len() >= self.capacity {
            self.fields.remove(0);
        }
        self.fields.push(field);
        self.fields.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<ForceField> {
        if index < self.fields.len() {
            Some(self.fields.remove(index))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ForceField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn total_acceleration(&self, position: Vec3, time: f32) -> Vec3 {
        self.fields.iter().map(|f| f.sample(position, time)).sum()
    }

    /// Fixed-size GPU upload array, padded with inactive slots up to
    /// `MAX_FORCE_FIELDS`.
    pub fn to_gpu_array(&self) -> [ForceFieldGpu; MAX_FORCE_FIELDS] {
        let mut out = [ForceFieldGpu::INACTIVE; MAX_FORCE_FIELDS];
        for (slot, field) in out.iter_mut().zip(self.fields.iter()) {
            *slot = ForceFieldGpu::from(*field);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attractor_pulls_toward_center() {
        let field = ForceField::Attractor {
            center: Vec3::ZERO,
            strength: 1.0,
            radius: 10.0,
        };
        let accel = field.sample(Vec3::new(5.0, 0.0, 0.0), 0.0);
        assert!(accel.x < 0.0);
    }

    #[test]
    fn registry_evicts_oldest_beyond_capacity() {
        let mut registry = ForceFieldRegistry::new(2);
        registry.insert(ForceField::Directional { direction: Vec3::X, strength: 1.0 });
        registry.insert(ForceField::Directional { direction: Vec3::Y, strength: 1.0 });
        registry.insert(ForceField::Directional { direction: Vec3::Z, strength: 1.0 });
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn gpu_array_pads_inactive_slots() {
        let mut registry = ForceFieldRegistry::new(8);
        registry.insert(ForceField::Directional { direction: Vec3::X, strength: 2.0 });
        let gpu = registry.to_gpu_array();
        assert_eq!(gpu[0].field_type, FIELD_TYPE_DIRECTIONAL);
        assert_eq!(gpu[0].strength, 2.0);
        for slot in &gpu[1..] {
            assert_eq!(slot.field_type, FIELD_TYPE_NONE);
        }
    }

    #[test]
    fn outside_radius_is_zero() {
        let field = ForceField::Repeller {
            center: Vec3::ZERO,
            strength: 1.0,
            radius: 5.0,
        };
        let accel = field.sample(Vec3::new(100.0, 0.0, 0.0), 0.0);
        assert_eq!(accel, Vec3::ZERO);
    }
}

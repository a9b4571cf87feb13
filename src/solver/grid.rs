//! Eulerian grid storage and the math shared between the WGSL kernels and
//! their CPU-side test mirrors.

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Vec3};

/// Fixed-point atomic view of a grid cell, used during P2G scatter passes.
/// Zeroed before every P2G, decoded to the real view in `updateGrid`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GridCellAtomic {
    pub vx: i32,
    pub vy: i32,
    pub vz: i32,
    pub mass: i32,
}

impl GridCellAtomic {
    pub const ZERO: Self = Self {
        vx: 0,
        vy: 0,
        vz: 0,
        mass: 0,
    };
}

/// Real-valued view of a grid cell, written once per step by `updateGrid`
/// and consumed by `G2P`. Shares backing storage with `GridCellAtomic`
/// through a GPU-side buffer re-bind between passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GridCellReal {
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub mass: f32,
}

impl GridCellReal {
    pub const ZERO: Self = Self {
        vx: 0.0,
        vy: 0.0,
        vz: 0.0,
        mass: 0.0,
    };
}

/// CPU-side owner of the grid buffer dimensions. The GPU buffer itself is
/// created and owned by `solver::gpu::Solver`; this type is the part of the
/// grid's bookkeeping that can be unit tested without a device.
#[derive(Debug, Clone, Copy)]
pub struct GridDims {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDims {
    /// `gridSize = (64*max(1,aspect), 64*max(1,1/aspect), 64)`.
    pub fn from_aspect(aspect: f32) -> Self {
        let aspect = aspect.max(1.0e-6);
        Self {
            x: (64.0 * aspect.max(1.0)).round() as u32,
            y: (64.0 * (1.0 / aspect).max(1.0)).round() as u32,
            z: 64,
        }
    }

    pub fn cell_count(&self) -> u32 {
        self.x * self.y * self.z
    }

    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32)
    }

    pub fn index_of(&self, cell: IVec3) -> Option<usize> {
        if cell.x < 0
            || cell.y < 0
            || cell.z < 0
            || cell.x as u32 >= self.x
            || cell.y as u32 >= self.y
            || cell.z as u32 >= self.z
        {
            return None;
        }
        Some((cell.x as u32 + cell.y as u32 * self.x + cell.z as u32 * self.x * self.y) as usize)
    }
}

/// Encode a real value into the fixed-point representation used by the
/// atomic accumulators.
#[inline]
pub fn encode_fixed(value: f32, multiplier: f32) -> i32 {
    (value * multiplier) as i32
}

/// Decode a fixed-point accumulator back into a real value.
#[inline]
pub fn decode_fixed(value: i32, multiplier: f32) -> f32 {
    value as f32 / multiplier
}

/// Quadratic B-spline weights for a single axis offset `d`: `d` is `frac(x) - 0.5`, in `[-0.5, 0.5]`.
#[inline]
pub fn quadratic_weights(d: f32) -> [f32; 3] {
    let w0 = 0.5 * (0.5 - d) * (0.5 - d);
    let w1 = 0.75 - d * d;
    let w2 = 0.5 * (0.5 + d) * (0.5 + d);
    [w0, w1, w2]
}

/// The base grid cell and fractional offset for a particle position:
/// `i = floor(x) - 1`, `d = frac(x) - 0.5`.
#[inline]
pub fn base_cell_and_offset(position: Vec3) -> (IVec3, Vec3) {
    let base = IVec3::new(
        position.x.floor() as i32 - 1,
        position.y.floor() as i32 - 1,
        position.z.floor() as i32 - 1,
    );
    let frac = Vec3::new(
        position.x - position.x.floor(),
        position.y - position.y.floor(),
        position.z - position.z.floor(),
    );
    (base, frac - Vec3::splat(0.5))
}

/// Iterate the 27 neighbour weights and cell-space offsets for a particle,
/// mirroring the WGSL loop in P2G-1/P2G-2/G2P. `f` receives the grid cell,
/// the combined weight `W`, and the cell-distance vector `cd`.
pub fn for_each_neighbor(position: Vec3, mut f: impl FnMut(IVec3, f32, Vec3)) {
    let (base, offset) = base_cell_and_offset(position);
    let wx = quadratic_weights(offset.x);
    let wy = quadratic_weights(offset.y);
    let wz = quadratic_weights(offset.z);

    for gz in 0..3i32 {
        for gy in 0..3i32 {
            for gx in 0..3i32 {
                let weight = wx[gx as usize] * wy[gy as usize] * wz[gz as usize];
                let cell = base + IVec3::new(gx, gy, gz);
                let cell_center =
                    Vec3::new(cell.x as f32, cell.y as f32, cell.z as f32) + Vec3::splat(0.5);
                let cd = cell_center - position;
                f(cell, weight, cd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_round_trips_within_tolerance() {
        let multiplier = 1.0e7;
        let mut v = -200.0;
        while v <= 200.0 {
            let encoded = encode_fixed(v, multiplier);
            let decoded = decode_fixed(encoded, multiplier);
            assert!((decoded - v).abs() <= 1.0 / multiplier + 1.0e-6, "v={v}");
            v += 0.37;
        }
    }

    #[test]
    fn weight_sum_is_one_for_sampled_positions() {
        let mut rng_state: u64 = 0x1234_5678_9abc_def0;
        let mut next = || {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            (rng_state as f64 / u64::MAX as f64) as f32
        };

        for _ in 0..10_000 {
            let pos = Vec3::new(
                2.0 + next() * 60.0,
                2.0 + next() * 60.0,
                2.0 + next() * 60.0,
            );
            let mut sum = 0.0;
            for_each_neighbor(pos, |_cell, w, _cd| sum += w);
            assert!((sum - 1.0).abs() < 1.0e-5, "sum={sum} pos={pos:?}");
        }
    }

    #[test]
    fn grid_dims_matches_aspect_formula() {
        let dims = GridDims::from_aspect(2.0);
        assert_eq!(dims.x, 128);
        assert_eq!(dims.y, 64);
        assert_eq!(dims.z, 64);
    }

    #[test]
    fn index_out_of_bounds_is_none() {
        let dims = GridDims::from_aspect(1.0);
        assert!(dims.index_of(IVec3::new(-1, 0, 0)).is_none());
        assert!(dims.index_of(IVec3::new(dims.x as i32, 0, 0)).is_none());
        assert!(dims.index_of(IVec3::new(0, 0, 0)).is_some());
    }
}

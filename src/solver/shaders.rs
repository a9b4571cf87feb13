//! WGSL compute kernels for the five MLS-MPM passes.
//!
//! The weight/fixed-point math mirrors `solver::grid` and
//! `solver::particle` exactly so the CPU-side unit tests in those modules
//! stand in for a device-backed integration test.
//!
//! Buffer binding convention shared by every pass, enforced by
//! `solver::gpu::Solver::bind_group`:
//! `binding(0)` uniforms, `binding(1)` particles, `binding(2)` grid
//! mass/momentum accumulator (written by clearGrid + P2G-1), `binding(3)`
//! grid stress-force accumulator (written by clearGrid + P2G-2),
//! `binding(4)` the real-valued grid view (written once by updateGrid,
//! read by G2P), `binding(5)` the boundary-shape uniform block.

pub const UNIFORMS_STRUCT: &str = r#"
struct Uniforms {
    num_particles: u32,
    grid_size: vec3<i32>,
    dt: f32,
    stiffness: f32,
    rest_density: f32,
    dynamic_viscosity: f32,
    noise: f32,
    gravity_mode: u32,
    gravity: vec3<f32>,
    mouse_ray_origin: vec3<f32>,
    mouse_ray_direction: vec3<f32>,
    mouse_force: vec3<f32>,
    transfer_mode: u32,
    flip_ratio: f32,
    vorticity_enabled: u32,
    vorticity_epsilon: f32,
    surface_tension_enabled: u32,
    surface_tension_coeff: f32,
    sparse_grid: u32,
    adaptive_timestep: u32,
    cfl_target: f32,
};
"#;

/// Mirrors `solver::gpu::BoundaryUniforms`.
pub const BOUNDARY_STRUCT: &str = r#"
struct BoundaryUniforms {
    shape: u32,
    collision_mode: u32,
    enabled: u32,
    _pad0: u32,
    param0: f32,
    param1: f32,
    wall_thickness: f32,
    wall_stiffness: f32,
    restitution: f32,
    friction: f32,
    _pad1: f32,
    _pad2: f32,
};
"#;

pub const COMMON: &str = r#"
const FIXED_POINT_MULTIPLIER: f32 = 1.0e7;

fn encode_fixed(value: f32) -> i32 {
    return i32(value * FIXED_POINT_MULTIPLIER);
}

fn decode_fixed(value: i32) -> f32 {
    return f32(value) / FIXED_POINT_MULTIPLIER;
}

fn quadratic_weights(d: f32) -> vec3<f32> {
    let w0 = 0.5 * (0.5 - d) * (0.5 - d);
    let w1 = 0.75 - d * d;
    let w2 = 0.5 * (0.5 + d) * (0.5 + d);
    return vec3<f32>(w0, w1, w2);
}

fn cell_index(cell: vec3<i32>, grid_size: vec3<i32>) -> u32 {
    return u32(cell.x + cell.y * grid_size.x + cell.z * grid_size.x * grid_size.y);
}

fn in_bounds(cell: vec3<i32>, grid_size: vec3<i32>) -> bool {
    return !(any(cell < vec3<i32>(0)) || any(cell >= grid_size));
}

// G2P color formula: hue/saturation/value from density ratio,
// speed, and mouse-force magnitude.
fn hsv_to_rgb(hsv: vec3<f32>) -> vec3<f32> {
    let h = fract(hsv.x) * 6.0;
    let s = clamp(hsv.y, 0.0, 1.0);
    let v = clamp(hsv.z, 0.0, 1.0);
    let c = v * s;
    let x = c * (1.0 - abs(fract(h * 0.5) * 2.0 - 1.0));
    let m = v - c;
    var rgb = vec3<f32>(0.0);
    if (h < 1.0) { rgb = vec3<f32>(c, x, 0.0); }
    else if (h < 2.0) { rgb = vec3<f32>(x, c, 0.0); }
    else if (h < 3.0) { rgb = vec3<f32>(0.0, c, x); }
    else if (h < 4.0) { rgb = vec3<f32>(0.0, x, c); }
    else if (h < 5.0) { rgb = vec3<f32>(x, 0.0, c); }
    else { rgb = vec3<f32>(c, 0.0, x); }
    return rgb + vec3<f32>(m);
}
"#;

pub const PARTICLE_STRUCT: &str = r#"
struct Particle {
    position: vec3<f32>,
    _pad0: f32,
    velocity: vec3<f32>,
    _pad1: f32,
    c_col0: vec3<f32>,
    _pad2: f32,
    c_col1: vec3<f32>,
    _pad3: f32,
    c_col2: vec3<f32>,
    _pad4: f32,
    mass: f32,
    density: f32,
    material: u32,
    _pad5: f32,
    direction: vec3<f32>,
    _pad6: f32,
    color: vec3<f32>,
    _pad7: f32,
};
"#;

/// Mirrors `solver::forces::ForceFieldGpu`.
pub const FORCE_FIELD_STRUCT: &str = r#"
struct ForceField {
    field_type: u32,
    _pad0: vec3<u32>,
    position: vec3<f32>,
    _pad1: f32,
    axis: vec3<f32>,
    _pad2: f32,
    strength: f32,
    radius: f32,
    scale: f32,
    speed: f32,
};

const FIELD_TYPE_NONE: u32 = 0u;
const FIELD_TYPE_ATTRACTOR: u32 = 1u;
const FIELD_TYPE_REPELLER: u32 = 2u;
const FIELD_TYPE_VORTEX: u32 = 3u;
const FIELD_TYPE_TURBULENCE: u32 = 4u;
const FIELD_TYPE_DIRECTIONAL: u32 = 5u;
const FIELD_TYPE_CURL: u32 = 6u;

// Cheap hash-based value noise mirroring `solver::forces::value_noise`'s
// CPU stand-in for a shader `fbm` lookup.
fn field_value_noise(p: vec3<f32>) -> f32 {
    let h = sin(p.x * 127.1 + p.y * 311.7 + p.z * 74.7) * 43758.5453;
    return 2.0 * fract(h) - 1.0;
}

fn field_radial_falloff(position: vec3<f32>, center: vec3<f32>, radius: f32, strength: f32) -> vec3<f32> {
    let delta = center - position;
    let dist = length(delta);
    if (dist < 1.0e-5 || dist > radius) {
        return vec3<f32>(0.0);
    }
    let falloff = 1.0 - (dist / radius);
    return normalize(delta) * strength * falloff;
}

// Sample one force field's contribution to acceleration at `position`,
fn sample_force_field(field: ForceField, position: vec3<f32>, time: f32) -> vec3<f32> {
    if (field.field_type == FIELD_TYPE_ATTRACTOR) {
        return field_radial_falloff(position, field.position, field.radius, field.strength);
    }
    if (field.field_type == FIELD_TYPE_REPELLER) {
        return -field_radial_falloff(position, field.position, field.radius, field.strength);
    }
    if (field.field_type == FIELD_TYPE_VORTEX) {
        let delta = position - field.position;
        let dist = length(delta);
        if (dist < 1.0e-5 || dist > field.radius) {
            return vec3<f32>(0.0);
        }
        let n = normalize(field.axis);
        let tangent = cross(n, delta);
        let falloff = 1.0 - (dist / field.radius);
        let tlen = length(tangent);
        if (tlen < 1.0e-8) {
            return vec3<f32>(0.0);
        }
        return (tangent / tlen) * field.strength * falloff;
    }
    if (field.field_type == FIELD_TYPE_TURBULENCE) {
        let p = position * field.scale + vec3<f32>(time * field.speed);
        return vec3<f32>(
            field_value_noise(p + vec3<f32>(17.3, 0.0, 0.0)),
            field_value_noise(p + vec3<f32>(0.0, 41.7, 0.0)),
            field_value_noise(p + vec3<f32>(0.0, 0.0, 91.1)),
        ) * field.strength;
    }
    if (field.field_type == FIELD_TYPE_DIRECTIONAL) {
        let len = length(field.axis);
        if (len < 1.0e-8) {
            return vec3<f32>(0.0);
        }
        return (field.axis / len) * field.strength;
    }
    if (field.field_type == FIELD_TYPE_CURL) {
        let p = (position - field.position) * field.scale;
        let eps = 0.1;
        let dn_dy = field_value_noise(p + vec3<f32>(0.0, eps, 0.0)) - field_value_noise(p - vec3<f32>(0.0, eps, 0.0));
        let dn_dx = field_value_noise(p + vec3<f32>(eps, 0.0, 0.0)) - field_value_noise(p - vec3<f32>(eps, 0.0, 0.0));
        let dn_dz = field_value_noise(p + vec3<f32>(0.0, 0.0, eps)) - field_value_noise(p - vec3<f32>(0.0, 0.0, eps));
        return vec3<f32>(dn_dy, dn_dz - dn_dx, -dn_dy) * field.strength / (2.0 * eps);
    }
    return vec3<f32>(0.0);
}
"#;

pub const GRID_CELL_STRUCT: &str = r#"
struct GridCellAtomic {
    vx: atomic<i32>,
    vy: atomic<i32>,
    vz: atomic<i32>,
    mass: atomic<i32>,
};

struct GridCellReal {
    vx: f32,
    vy: f32,
    vz: f32,
    mass: f32,
};
"#;

/// `clearGrid(cellCount)`: zero both grid accumulators before P2G.
pub fn clear_grid_shader() -> String {
    format!(
        r#"
{uniforms}
{grid}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(2) var<storage, read_write> grid_mass: array<GridCellAtomic>;
@group(0) @binding(3) var<storage, read_write> grid_force: array<GridCellAtomic>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {{
    let cell_count = u32(uniforms.grid_size.x * uniforms.grid_size.y * uniforms.grid_size.z);
    if (id.x >= cell_count) {{
        return;
    }}
    atomicStore(&grid_mass[id.x].vx, 0);
    atomicStore(&grid_mass[id.x].vy, 0);
    atomicStore(&grid_mass[id.x].vz, 0);
    atomicStore(&grid_mass[id.x].mass, 0);
    atomicStore(&grid_force[id.x].vx, 0);
    atomicStore(&grid_force[id.x].vy, 0);
    atomicStore(&grid_force[id.x].vz, 0);
    atomicStore(&grid_force[id.x].mass, 0);
}}
"#,
        uniforms = UNIFORMS_STRUCT,
        grid = GRID_CELL_STRUCT,
    )
}

/// `p2g1(numParticles)`: scatter mass and momentum to the 27 neighbouring
/// cells using quadratic B-spline weights, with APIC affine correction.
pub fn p2g1_shader() -> String {
    format!(
        r#"
{uniforms}
{common}
{particle}
{grid}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var<storage, read> particles: array<Particle>;
@group(0) @binding(2) var<storage, read_write> grid_mass: array<GridCellAtomic>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {{
    if (id.x >= uniforms.num_particles) {{
        return;
    }}
    let p = particles[id.x];
    let base_cell = vec3<i32>(floor(p.position)) - vec3<i32>(1);
    let frac = p.position - floor(p.position);
    let offset = frac - vec3<f32>(0.5);

    let wx = quadratic_weights(offset.x);
    let wy = quadratic_weights(offset.y);
    let wz = quadratic_weights(offset.z);

    let c = mat3x3<f32>(p.c_col0, p.c_col1, p.c_col2);

    for (var gz = 0; gz < 3; gz = gz + 1) {{
        for (var gy = 0; gy < 3; gy = gy + 1) {{
            for (var gx = 0; gx < 3; gx = gx + 1) {{
                let weight = wx[gx] * wy[gy] * wz[gz];
                let cell = base_cell + vec3<i32>(gx, gy, gz);
                if (!in_bounds(cell, uniforms.grid_size)) {{
                    continue;
                }}
                let cell_center = vec3<f32>(cell) + vec3<f32>(0.5);
                let cell_dist = cell_center - p.position;
                let q = c * cell_dist;
                let mass_contrib = weight * p.mass;
                let velocity_contrib = mass_contrib * (p.velocity + q);

                let idx = cell_index(cell, uniforms.grid_size);
                atomicAdd(&grid_mass[idx].vx, encode_fixed(velocity_contrib.x));
                atomicAdd(&grid_mass[idx].vy, encode_fixed(velocity_contrib.y));
                atomicAdd(&grid_mass[idx].vz, encode_fixed(velocity_contrib.z));
                atomicAdd(&grid_mass[idx].mass, encode_fixed(mass_contrib));
            }}
        }}
    }}
}}
"#,
        uniforms = UNIFORMS_STRUCT,
        common = COMMON,
        particle = PARTICLE_STRUCT,
        grid = GRID_CELL_STRUCT,
    )
}

/// `p2g2(numParticles)`: scatter the stress-derived force contribution,
/// using the equation-of-state pressure and viscosity terms.
pub fn p2g2_shader() -> String {
    format!(
        r#"
{uniforms}
{common}
{particle}
{grid}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(2) var<storage, read> grid_mass: array<GridCellAtomic>;
@group(0) @binding(3) var<storage, read_write> grid_force: array<GridCellAtomic>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {{
    if (id.x >= uniforms.num_particles) {{
        return;
    }}
    let p = particles[id.x];
    let base_cell = vec3<i32>(floor(p.position)) - vec3<i32>(1);
    let frac = p.position - floor(p.position);
    let offset = frac - vec3<f32>(0.5);

    let wx = quadratic_weights(offset.x);
    let wy = quadratic_weights(offset.y);
    let wz = quadratic_weights(offset.z);

    var density = 0.0;
    for (var gz = 0; gz < 3; gz = gz + 1) {{
        for (var gy = 0; gy < 3; gy = gy + 1) {{
            for (var gx = 0; gx < 3; gx = gx + 1) {{
                let weight = wx[gx] * wy[gy] * wz[gz];
                let cell = base_cell + vec3<i32>(gx, gy, gz);
                if (!in_bounds(cell, uniforms.grid_size)) {{
                    continue;
                }}
                let idx = cell_index(cell, uniforms.grid_size);
                density += weight * decode_fixed(atomicLoad(&grid_mass[idx].mass));
            }}
        }}
    }}
    density = max(density, 1.0e-6);
    particles[id.x].density = mix(p.density, density, 0.05);

    // Tait-like equation of state; pressure goes negative below rest density
    // so particles attract back toward it.
    let pressure = max(uniforms.stiffness * (pow(density / uniforms.rest_density, 5.0) - 1.0), 0.0);
    let c = mat3x3<f32>(p.c_col0, p.c_col1, p.c_col2);
    let viscous = uniforms.dynamic_viscosity * (c + transpose(c));
    let stress = mat3x3<f32>(
        vec3<f32>(-pressure, 0.0, 0.0) + viscous[0],
        vec3<f32>(0.0, -pressure, 0.0) + viscous[1],
        vec3<f32>(0.0, 0.0, -pressure) + viscous[2],
    );
    let volume = 1.0 / density;

    for (var gz = 0; gz < 3; gz = gz + 1) {{
        for (var gy = 0; gy < 3; gy = gy + 1) {{
            for (var gx = 0; gx < 3; gx = gx + 1) {{
                let weight = wx[gx] * wy[gy] * wz[gz];
                let cell = base_cell + vec3<i32>(gx, gy, gz);
                if (!in_bounds(cell, uniforms.grid_size)) {{
                    continue;
                }}
                let cell_center = vec3<f32>(cell) + vec3<f32>(0.5);
                let cell_dist = cell_center - p.position;
                let eq16 = -uniforms.dt * 4.0 * volume * weight;
                let momentum = eq16 * (stress * cell_dist);

                let idx = cell_index(cell, uniforms.grid_size);
                atomicAdd(&grid_force[idx].vx, encode_fixed(momentum.x));
                atomicAdd(&grid_force[idx].vy, encode_fixed(momentum.y));
                atomicAdd(&grid_force[idx].vz, encode_fixed(momentum.z));
            }}
        }}
    }}
}}
"#,
        uniforms = UNIFORMS_STRUCT,
        common = COMMON,
        particle = PARTICLE_STRUCT,
        grid = GRID_CELL_STRUCT,
    )
}

/// `updateGrid(cellCount)`: decode fixed-point accumulators to velocity,
/// apply gravity, vorticity confinement, surface tension and boundary-shape
/// forcing, zero border-layer velocity components, and rewrite the cell as
/// the real-valued view.
pub fn update_grid_shader() -> String {
    format!(
        r#"
{uniforms}
{boundary}
{common}
{grid}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(2) var<storage, read> grid_mass: array<GridCellAtomic>;
@group(0) @binding(3) var<storage, read> grid_force: array<GridCellAtomic>;
@group(0) @binding(4) var<storage, read_write> grid_out: array<GridCellReal>;
@group(0) @binding(5) var<uniform> boundary: BoundaryUniforms;

// Combined (momentum + stress-force) velocity at `cell`, decoded from the
// two fixed-point accumulators, or zero for an empty/out-of-bounds cell.
fn sample_velocity(cell: vec3<i32>) -> vec3<f32> {{
    if (!in_bounds(cell, uniforms.grid_size)) {{
        return vec3<f32>(0.0);
    }}
    let idx = cell_index(cell, uniforms.grid_size);
    let mass = decode_fixed(atomicLoad(&grid_mass[idx].mass));
    if (mass <= 0.0) {{
        return vec3<f32>(0.0);
    }}
    let momentum = vec3<f32>(
        decode_fixed(atomicLoad(&grid_mass[idx].vx)),
        decode_fixed(atomicLoad(&grid_mass[idx].vy)),
        decode_fixed(atomicLoad(&grid_mass[idx].vz)),
    );
    let force = vec3<f32>(
        decode_fixed(atomicLoad(&grid_force[idx].vx)),
        decode_fixed(atomicLoad(&grid_force[idx].vy)),
        decode_fixed(atomicLoad(&grid_force[idx].vz)),
    );
    return (momentum + force) / mass;
}}

fn sample_mass(cell: vec3<i32>) -> f32 {{
    if (!in_bounds(cell, uniforms.grid_size)) {{
        return 0.0;
    }}
    let idx = cell_index(cell, uniforms.grid_size);
    return max(decode_fixed(atomicLoad(&grid_mass[idx].mass)), 0.0);
}}

fn cell_vorticity(cell: vec3<i32>) -> vec3<f32> {{
    let vxp = sample_velocity(cell + vec3<i32>(1, 0, 0));
    let vxn = sample_velocity(cell - vec3<i32>(1, 0, 0));
    let vyp = sample_velocity(cell + vec3<i32>(0, 1, 0));
    let vyn = sample_velocity(cell - vec3<i32>(0, 1, 0));
    let vzp = sample_velocity(cell + vec3<i32>(0, 0, 1));
    let vzn = sample_velocity(cell - vec3<i32>(0, 0, 1));
    return 0.5 * vec3<f32>(
        (vyp.z - vyn.z) - (vzp.y - vzn.y),
        (vzp.x - vzn.x) - (vxp.z - vxn.z),
        (vxp.y - vxn.y) - (vyp.x - vyn.x),
    );
}}

// Signed distance (negative inside) and outward normal for the configured
// boundary shape at a grid-space point, mirroring `solver::boundary::sdf`.
// Shape 0 (none) behaves as the implicit domain box, matching
// `Boundary::distance`'s union fallback.
fn boundary_sdf(point: vec3<f32>, grid_size: vec3<f32>) -> vec4<f32> {{
    let center = grid_size * 0.5;
    let local = point - center;

    if (boundary.shape == 2u) {{
        let len = length(local);
        let normal = select(vec3<f32>(0.0, 1.0, 0.0), local / max(len, 1.0e-8), len > 1.0e-8);
        return vec4<f32>(normal, len - boundary.param0);
    }}
    if (boundary.shape == 3u) {{
        let radial = vec3<f32>(local.x, 0.0, local.z);
        let radial_len = length(radial);
        let d_radial = radial_len - boundary.param0;
        let d_height = abs(local.y) - boundary.param1;
        if (d_radial > d_height) {{
            let normal = select(vec3<f32>(1.0, 0.0, 0.0), radial / max(radial_len, 1.0e-8), radial_len > 1.0e-8);
            return vec4<f32>(normal, d_radial);
        }}
        return vec4<f32>(vec3<f32>(0.0, sign(local.y), 0.0), d_height);
    }}
    if (boundary.shape == 4u) {{
        const PHI: f32 = 1.618034;
        var axes = array<vec3<f32>, 6>(
            normalize(vec3<f32>(0.0, 1.0, PHI)),
            normalize(vec3<f32>(0.0, -1.0, PHI)),
            normalize(vec3<f32>(1.0, PHI, 0.0)),
            normalize(vec3<f32>(-1.0, PHI, 0.0)),
            normalize(vec3<f32>(PHI, 0.0, 1.0)),
            normalize(vec3<f32>(-PHI, 0.0, 1.0)),
        );
        var best_dist = -3.4e38;
        var best_normal = vec3<f32>(0.0, 1.0, 0.0);
        for (var i = 0; i < 6; i = i + 1) {{
            let n = axes[i];
            let d_pos = dot(local, n) - boundary.param0;
            if (d_pos > best_dist) {{
                best_dist = d_pos;
                best_normal = n;
            }}
            let d_neg = dot(local, -n) - boundary.param0;
            if (d_neg > best_dist) {{
                best_dist = d_neg;
                best_normal = -n;
            }}
        }}
        return vec4<f32>(best_normal, best_dist);
    }}
    // Box (and shape 0 / none, per the boundary engine's union fallback).
    let half = grid_size * 0.5;
    let q = abs(local) - half;
    let outside = length(max(q, vec3<f32>(0.0)));
    let inside = min(max(q.x, max(q.y, q.z)), 0.0);
    let len = length(local);
    let normal = select(vec3<f32>(0.0, 1.0, 0.0), local / max(len, 1.0e-8), len > 1.0e-8);
    return vec4<f32>(normal, outside + inside);
}}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {{
    let cell_count = u32(uniforms.grid_size.x * uniforms.grid_size.y * uniforms.grid_size.z);
    if (id.x >= cell_count) {{
        return;
    }}
    let mass = decode_fixed(atomicLoad(&grid_mass[id.x].mass));
    if (mass <= 0.0) {{
        return;
    }}

    let momentum = vec3<f32>(
        decode_fixed(atomicLoad(&grid_mass[id.x].vx)),
        decode_fixed(atomicLoad(&grid_mass[id.x].vy)),
        decode_fixed(atomicLoad(&grid_mass[id.x].vz)),
    );
    let force = vec3<f32>(
        decode_fixed(atomicLoad(&grid_force[id.x].vx)),
        decode_fixed(atomicLoad(&grid_force[id.x].vy)),
        decode_fixed(atomicLoad(&grid_force[id.x].vz)),
    );
    var velocity = (momentum + force) / mass;

    velocity += uniforms.dt * uniforms.gravity;

    let x = i32(id.x) % uniforms.grid_size.x;
    let y = (i32(id.x) / uniforms.grid_size.x) % uniforms.grid_size.y;
    let z = i32(id.x) / (uniforms.grid_size.x * uniforms.grid_size.y);
    let cell = vec3<i32>(x, y, z);

    if (uniforms.vorticity_enabled != 0u) {{
        let omega = cell_vorticity(cell);
        let grad = 0.5 * vec3<f32>(
            length(cell_vorticity(cell + vec3<i32>(1, 0, 0))) - length(cell_vorticity(cell - vec3<i32>(1, 0, 0))),
            length(cell_vorticity(cell + vec3<i32>(0, 1, 0))) - length(cell_vorticity(cell - vec3<i32>(0, 1, 0))),
            length(cell_vorticity(cell + vec3<i32>(0, 0, 1))) - length(cell_vorticity(cell - vec3<i32>(0, 0, 1))),
        );
        let grad_len = length(grad);
        if (grad_len > 1.0e-8) {{
            velocity += uniforms.vorticity_epsilon * cross(grad / grad_len, omega) * uniforms.dt;
        }}
    }}

    if (uniforms.surface_tension_enabled != 0u) {{
        let grad_rho = 0.5 * vec3<f32>(
            sample_mass(cell + vec3<i32>(1, 0, 0)) - sample_mass(cell - vec3<i32>(1, 0, 0)),
            sample_mass(cell + vec3<i32>(0, 1, 0)) - sample_mass(cell - vec3<i32>(0, 1, 0)),
            sample_mass(cell + vec3<i32>(0, 0, 1)) - sample_mass(cell - vec3<i32>(0, 0, 1)),
        );
        velocity += uniforms.surface_tension_coeff * grad_rho * uniforms.dt;
    }}

    if (x < 2 || x >= uniforms.grid_size.x - 2) {{
        velocity.x = 0.0;
    }}
    if (y < 2 || y >= uniforms.grid_size.y - 2) {{
        velocity.y = 0.0;
    }}
    if (z < 2 || z >= uniforms.grid_size.z - 2) {{
        velocity.z = 0.0;
    }}

    // Boundary-shape forcing: near the surface, reflect,
    // clamp, or kill the outward velocity component; `wrap` is a
    // position-level operation handled by G2P's own soft-wall step, so the
    // grid-velocity pass leaves it untouched.
    if (boundary.enabled != 0u) {{
        let point = vec3<f32>(cell) + vec3<f32>(0.5);
        let hit = boundary_sdf(point, vec3<f32>(uniforms.grid_size));
        let normal = hit.xyz;
        let dist = hit.w;
        if (dist > -boundary.wall_thickness) {{
            let outward = dot(velocity, normal);
            if (outward > 0.0) {{
                var corrected = velocity;
                if (boundary.collision_mode == 0u) {{
                    corrected = velocity - (1.0 + boundary.restitution) * outward * normal;
                }} else if (boundary.collision_mode == 1u) {{
                    corrected = velocity - outward * normal;
                }} else if (boundary.collision_mode == 3u) {{
                    corrected = vec3<f32>(0.0);
                }}
                let tangential = corrected - dot(corrected, normal) * normal;
                let normal_component = dot(corrected, normal) * normal;
                corrected = normal_component + tangential * (1.0 - boundary.friction);
                velocity = mix(velocity, corrected, boundary.wall_stiffness);
            }}
        }}
    }}

    grid_out[id.x] = GridCellReal(velocity.x, velocity.y, velocity.z, mass);
}}
"#,
        uniforms = UNIFORMS_STRUCT,
        boundary = BOUNDARY_STRUCT,
        common = COMMON,
        grid = GRID_CELL_STRUCT,
    )
}

/// `g2p(numParticles)`: gather velocity/affine matrix back onto each
/// particle, blend PIC/FLIP per `transfer_mode`, advect position, reset
/// `C <- 4B`.
pub fn g2p_shader() -> String {
    format!(
        r#"
{uniforms}
{common}
{particle}
{grid}
{force_field}

const MAX_FORCE_FIELDS: u32 = 8u;

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var<storage, read_write> particles: array<Particle>;
@group(0) @binding(2) var<storage, read> grid_mass: array<GridCellAtomic>;
@group(0) @binding(4) var<storage, read> grid: array<GridCellReal>;
@group(0) @binding(6) var<storage, read> force_fields: array<ForceField, 8>;
@group(0) @binding(7) var<storage, read_write> max_speed: array<atomic<u32>>;

// Velocity this particle's stencil deposited onto the grid during P2G-1,
// before updateGrid folded in stress force, gravity, vorticity and
// boundary forcing. This is the "old" grid velocity the FLIP delta is
// taken against.
fn sample_old_velocity(cell: vec3<i32>, grid_size: vec3<i32>) -> vec3<f32> {{
    if (!in_bounds(cell, grid_size)) {{
        return vec3<f32>(0.0);
    }}
    let idx = cell_index(cell, grid_size);
    let mass = decode_fixed(atomicLoad(&grid_mass[idx].mass));
    if (mass <= 0.0) {{
        return vec3<f32>(0.0);
    }}
    return vec3<f32>(
        decode_fixed(atomicLoad(&grid_mass[idx].vx)),
        decode_fixed(atomicLoad(&grid_mass[idx].vy)),
        decode_fixed(atomicLoad(&grid_mass[idx].vz)),
    ) / mass;
}}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {{
    if (id.x >= uniforms.num_particles) {{
        return;
    }}
    var p = particles[id.x];
    let base_cell = vec3<i32>(floor(p.position)) - vec3<i32>(1);
    let frac = p.position - floor(p.position);
    let offset = frac - vec3<f32>(0.5);

    let wx = quadratic_weights(offset.x);
    let wy = quadratic_weights(offset.y);
    let wz = quadratic_weights(offset.z);

    var pic_velocity = vec3<f32>(0.0);
    var old_pic_velocity = vec3<f32>(0.0);
    var b = mat3x3<f32>(vec3<f32>(0.0), vec3<f32>(0.0), vec3<f32>(0.0));

    for (var gz = 0; gz < 3; gz = gz + 1) {{
        for (var gy = 0; gy < 3; gy = gy + 1) {{
            for (var gx = 0; gx < 3; gx = gx + 1) {{
                let weight = wx[gx] * wy[gy] * wz[gz];
                let cell = base_cell + vec3<i32>(gx, gy, gz);
                if (!in_bounds(cell, uniforms.grid_size)) {{
                    continue;
                }}
                let idx = cell_index(cell, uniforms.grid_size);
                let cell_velocity = vec3<f32>(grid[idx].vx, grid[idx].vy, grid[idx].vz);
                let cell_center = vec3<f32>(cell) + vec3<f32>(0.5);
                let cell_dist = cell_center - p.position;

                pic_velocity += weight * cell_velocity;
                old_pic_velocity += weight * sample_old_velocity(cell, uniforms.grid_size);
                b += weight * mat3x3<f32>(
                    cell_velocity * cell_dist.x,
                    cell_velocity * cell_dist.y,
                    cell_velocity * cell_dist.z,
                );
            }}
        }}
    }}

    // FLIP carries the particle's own velocity forward and adds only the
    // grid's velocity *change* this step (stress force, gravity, vorticity,
    // boundary forcing), rather than replacing it outright with PIC.
    let flip_velocity = p.velocity + (pic_velocity - old_pic_velocity);
    var new_velocity = pic_velocity;
    if (uniforms.transfer_mode == 1u) {{
        new_velocity = flip_velocity;
    }} else if (uniforms.transfer_mode == 2u) {{
        new_velocity = mix(pic_velocity, flip_velocity, uniforms.flip_ratio);
    }}

    // Force-field contribution, applied before the
    // mouse-force step.
    let sim_time = f32(uniforms.grid_size.x) * 0.0 + uniforms.dt; // per-frame proxy; fields read `time` for phase only
    for (var i = 0u; i < MAX_FORCE_FIELDS; i = i + 1u) {{
        let field = force_fields[i];
        if (field.field_type != FIELD_TYPE_NONE) {{
            new_velocity += sample_force_field(field, p.position, sim_time) * uniforms.dt;
        }}
    }}

    // Mouse force along a cylindrical falloff around the projected ray.
    let mouse_radial = p.position - uniforms.mouse_ray_origin;
    let along = dot(mouse_radial, normalize(uniforms.mouse_ray_direction + vec3<f32>(1.0e-6)));
    let closest = uniforms.mouse_ray_origin + normalize(uniforms.mouse_ray_direction + vec3<f32>(1.0e-6)) * along;
    let radial_dist = length(p.position - closest);
    let mouse_falloff = exp(-radial_dist * radial_dist * 0.05);
    new_velocity += uniforms.mouse_force * mouse_falloff;

    // Multiply the resulting velocity by particle mass,
    // preserving per-particle mass-driven divergence.
    new_velocity *= p.mass;

    // Bit-pattern atomicMax is valid here since speed is never negative:
    // non-negative f32 bit patterns order the same as their float values.
    atomicMax(&max_speed[0], bitcast<u32>(length(new_velocity)));

    p.velocity = new_velocity;
    p.c_col0 = 4.0 * b[0];
    p.c_col1 = 4.0 * b[1];
    p.c_col2 = 4.0 * b[2];
    p.position += uniforms.dt * new_velocity;
    p.direction = mix(p.direction, normalize(new_velocity + vec3<f32>(1.0e-6)), 0.1);

    let lo = vec3<f32>(2.0);
    let hi = vec3<f32>(uniforms.grid_size) - vec3<f32>(2.0);
    p.position = clamp(p.position, lo, hi);

    // G2P color formula. A slow hue-drift term driven by a running clock
    // is omitted: the uniform block carries no clock field, so hue is
    // driven only by density and speed.
    let speed = length(new_velocity);
    let mouse_strength = clamp(length(uniforms.mouse_force), 0.0, 1.0);
    let hue = p.density / uniforms.rest_density * 0.25;
    let saturation = clamp(speed * 0.5, 0.0, 1.0) * 0.3 + 0.7;
    let value = mouse_strength * 0.3 + 0.7;
    p.color = hsv_to_rgb(vec3<f32>(hue, saturation, value));

    particles[id.x] = p;
}}
"#,
        uniforms = UNIFORMS_STRUCT,
        common = COMMON,
        particle = PARTICLE_STRUCT,
        grid = GRID_CELL_STRUCT,
        force_field = FORCE_FIELD_STRUCT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pass_declares_a_main_entry_point() {
        for shader in [
            clear_grid_shader(),
            p2g1_shader(),
            p2g2_shader(),
            update_grid_shader(),
            g2p_shader(),
        ] {
            assert!(shader.contains("fn main("));
            assert!(shader.contains("@compute"));
        }
    }

    #[test]
    fn clear_grid_zeroes_both_accumulators() {
        let shader = clear_grid_shader();
        assert!(shader.contains("grid_mass"));
        assert!(shader.contains("grid_force"));
    }

    #[test]
    fn update_grid_reads_boundary_and_both_accumulators() {
        let shader = update_grid_shader();
        assert!(shader.contains("binding(2) var<storage, read> grid_mass"));
        assert!(shader.contains("binding(3) var<storage, read> grid_force"));
        assert!(shader.contains("binding(5) var<uniform> boundary"));
    }

    #[test]
    fn g2p_reads_the_real_valued_grid_view() {
        let shader = g2p_shader();
        assert!(shader.contains("binding(4) var<storage, read> grid: array<GridCellReal>"));
    }

    #[test]
    fn g2p_applies_force_fields_before_mouse_force() {
        let shader = g2p_shader();
        let force_loop = shader.find("sample_force_field(field").expect("force field loop present");
        let mouse_force = shader.find("new_velocity += uniforms.mouse_force").expect("mouse force step present");
        assert!(force_loop < mouse_force, "force fields must be applied before the mouse-force step");
        assert!(shader.contains("binding(6) var<storage, read> force_fields"));
    }

    #[test]
    fn g2p_multiplies_velocity_by_mass_and_writes_color() {
        let shader = g2p_shader();
        let mass_multiply = shader.find("new_velocity *= p.mass").expect("mass multiply present");
        let velocity_write = shader.find("p.velocity = new_velocity").expect("velocity write present");
        assert!(mass_multiply < velocity_write, "mass multiply must happen before the velocity write-back");
        assert!(shader.contains("p.color = hsv_to_rgb"));
    }

    #[test]
    fn g2p_flip_term_is_not_a_self_canceling_expression() {
        let shader = g2p_shader();
        // flip_velocity must reference a grid velocity sampled from the
        // pre-update P2G accumulator (grid_mass), not just `pic_velocity -
        // p.velocity`, or FLIP/Hybrid degenerate to plain PIC.
        assert!(shader.contains("let flip_velocity = p.velocity + (pic_velocity - old_pic_velocity);"));
        assert!(shader.contains("sample_old_velocity"));
        assert!(shader.contains("binding(2) var<storage, read> grid_mass"));
    }

    #[test]
    fn g2p_writes_an_atomic_max_speed_reduction() {
        let shader = g2p_shader();
        assert!(shader.contains("binding(7) var<storage, read_write> max_speed: array<atomic<u32>>"));
        assert!(shader.contains("atomicMax(&max_speed[0], bitcast<u32>(length(new_velocity)))"));
    }

    #[test]
    fn p2g2_writes_back_particle_density_and_reads_the_affine_matrix() {
        let shader = p2g2_shader();
        assert!(shader.contains("binding(1) var<storage, read_write> particles"));
        assert!(shader.contains("particles[id.x].density = mix(p.density, density, 0.05)"));
        assert!(shader.contains("mat3x3<f32>(p.c_col0, p.c_col1, p.c_col2)"));
        assert!(shader.contains("uniforms.dynamic_viscosity"));
    }

    #[test]
    fn p2g2_uses_the_spec_pressure_exponent_and_volume_factor() {
        let shader = p2g2_shader();
        assert!(shader.contains("pow(density / uniforms.rest_density, 5.0)"));
        assert!(shader.contains("let volume = 1.0 / density;"));
        assert!(shader.contains("-uniforms.dt * 4.0 * volume * weight"));
    }
}

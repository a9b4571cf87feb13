//! GPU device setup and the five-pass dispatch loop,
//! using a standard adapter/device acquisition pattern and bind-group/
//! pipeline layout conventions.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use wgpu::util::DeviceExt;

use crate::config::{GravityMode, SolverConfig, TransferMode};
use crate::error::{PulsegridError, Result};
use crate::solver::boundary::{BoundaryShape, BoundaryState, CollisionMode};
use crate::solver::emitter::ParticleSpawn;
use crate::solver::forces::{ForceFieldGpu, MAX_FORCE_FIELDS};
use crate::solver::grid::{GridCellAtomic, GridCellReal, GridDims};
use crate::solver::particle::{Particle, ParticleStorage};
use crate::solver::shaders;

/// Bit-exact layout for the solver uniform block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SolverUniforms {
    pub num_particles: u32,
    pub grid_size: [i32; 3],
    pub dt: f32,
    pub stiffness: f32,
    pub rest_density: f32,
    pub dynamic_viscosity: f32,
    pub noise: f32,
    pub gravity_mode: u32,
    pub gravity: [f32; 3],
    pub mouse_ray_origin: [f32; 3],
    pub mouse_ray_direction: [f32; 3],
    pub mouse_force: [f32; 3],
    pub transfer_mode: u32,
    pub flip_ratio: f32,
    pub vorticity_enabled: u32,
    pub vorticity_epsilon: f32,
    pub surface_tension_enabled: u32,
    pub surface_tension_coeff: f32,
    pub sparse_grid: u32,
    pub adaptive_timestep: u32,
    pub cfl_target: f32,
}

impl SolverUniforms {
    pub fn from_config(config: &SolverConfig, grid_dims: GridDims, gravity_mode: GravityMode, num_particles: u32) -> Self {
        Self {
            num_particles,
            grid_size: [grid_dims.x as i32, grid_dims.y as i32, grid_dims.z as i32],
            dt: config.base_dt,
            stiffness: config.stiffness,
            rest_density: config.rest_density,
            dynamic_viscosity: config.dynamic_viscosity,
            noise: config.base_noise,
            gravity_mode: gravity_mode as u32,
            gravity: [0.0, 0.0, 0.0],
            mouse_ray_origin: [0.0; 3],
            mouse_ray_direction: [0.0; 3],
            mouse_force: [0.0; 3],
            transfer_mode: match config.transfer_mode {
                TransferMode::Pic => 0,
                TransferMode::Flip => 1,
                TransferMode::Hybrid => 2,
            },
            flip_ratio: config.flip_ratio,
            vorticity_enabled: config.vorticity_enabled as u32,
            vorticity_epsilon: config.vorticity_epsilon,
            surface_tension_enabled: config.surface_tension_enabled as u32,
            surface_tension_coeff: config.surface_tension_coeff,
            sparse_grid: 0,
            adaptive_timestep: config.adaptive_timestep as u32,
            cfl_target: config.cfl_target,
        }
    }
}

/// Mirrors `shaders::BOUNDARY_STRUCT`. Written once per
/// frame from `solver::boundary::BoundaryState`, read only by `updateGrid`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BoundaryUniforms {
    pub shape: u32,
    pub collision_mode: u32,
    pub enabled: u32,
    pub _pad0: u32,
    pub param0: f32,
    pub param1: f32,
    pub wall_thickness: f32,
    pub wall_stiffness: f32,
    pub restitution: f32,
    pub friction: f32,
    pub _pad1: f32,
    pub _pad2: f32,
}

impl BoundaryUniforms {
    pub fn from_state(state: &BoundaryState) -> Self {
        let (shape, param0, param1) = match state.shape {
            BoundaryShape::None => (0u32, 0.0, 0.0),
            BoundaryShape::Box => (1u32, 0.0, 0.0),
            BoundaryShape::Sphere { radius } => (2u32, radius, 0.0),
            BoundaryShape::Tube { radius, half_height } => (3u32, radius, half_height),
            BoundaryShape::Dodecahedron { radius } => (4u32, radius, 0.0),
        };
        Self {
            shape,
            collision_mode: match state.collision_mode {
                CollisionMode::Reflect => 0,
                CollisionMode::Clamp => 1,
                CollisionMode::Wrap => 2,
                CollisionMode::Kill => 3,
            },
            enabled: state.enabled as u32,
            _pad0: 0,
            param0,
            param1,
            wall_thickness: state.wall_thickness,
            wall_stiffness: state.wall_stiffness,
            restitution: state.restitution,
            friction: state.friction,
            _pad1: 0.0,
            _pad2: 0.0,
        }
    }
}

struct Pipelines {
    clear_grid: wgpu::ComputePipeline,
    p2g1: wgpu::ComputePipeline,
    p2g2: wgpu::ComputePipeline,
    update_grid: wgpu::ComputePipeline,
    g2p: wgpu::ComputePipeline,
}

/// Owns the accelerator resources for the MLS-MPM solver: device/queue,
/// the five compute pipelines, and the particle/grid storage buffers.
pub struct Solver {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: Pipelines,

    particle_buffer: wgpu::Buffer,
    grid_mass_buffer: wgpu::Buffer,
    grid_force_buffer: wgpu::Buffer,
    grid_real_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    boundary_buffer: wgpu::Buffer,
    force_field_buffer: wgpu::Buffer,
    max_speed_buffer: wgpu::Buffer,
    max_speed_staging: wgpu::Buffer,

    bind_group_layout_particles_grid: wgpu::BindGroupLayout,
    grid_dims: GridDims,
    max_particles: u32,
}

impl Solver {
    pub async fn new(grid_dims: GridDims, max_particles: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(PulsegridError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("pulsegrid solver device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await?;

        Ok(Self::from_device(Arc::new(device), Arc::new(queue), grid_dims, max_particles))
    }

    fn from_device(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, grid_dims: GridDims, max_particles: u32) -> Self {
        let cell_count = grid_dims.cell_count() as u64;

        let particle_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pulsegrid particle buffer"),
            size: max_particles as u64 * std::mem::size_of::<Particle>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let grid_mass_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pulsegrid grid mass/momentum buffer"),
            size: cell_count * std::mem::size_of::<GridCellAtomic>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let grid_force_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pulsegrid grid force accumulator buffer"),
            size: cell_count * std::mem::size_of::<GridCellAtomic>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let grid_real_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pulsegrid grid real-valued buffer"),
            size: cell_count * std::mem::size_of::<GridCellReal>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pulsegrid solver uniforms"),
            contents: bytemuck::cast_slice(&[SolverUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let boundary_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pulsegrid boundary uniforms"),
            contents: bytemuck::cast_slice(&[BoundaryUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let force_field_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pulsegrid force field buffer"),
            contents: bytemuck::cast_slice(&[ForceFieldGpu::INACTIVE; MAX_FORCE_FIELDS]),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });

        // Single-cell atomic-max reduction target for the adaptive-timestep
        // CFL check: G2P folds in `atomicMax(bitcast<u32>(speed))` for every
        // particle, the host zeroes it before each step and reads it back
        // through `max_speed_staging` after.
        let max_speed_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pulsegrid max speed buffer"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let max_speed_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pulsegrid max speed staging buffer"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout_particles_grid = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pulsegrid solver bind group layout"),
            entries: &bind_group_layout_entries(),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pulsegrid solver pipeline layout"),
            bind_group_layouts: &[&bind_group_layout_particles_grid],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str, source: String| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let pipelines = Pipelines {
            clear_grid: make_pipeline("clearGrid", shaders::clear_grid_shader()),
            p2g1: make_pipeline("p2g1", shaders::p2g1_shader()),
            p2g2: make_pipeline("p2g2", shaders::p2g2_shader()),
            update_grid: make_pipeline("updateGrid", shaders::update_grid_shader()),
            g2p: make_pipeline("g2p", shaders::g2p_shader()),
        };

        Self {
            device,
            queue,
            pipelines,
            particle_buffer,
            grid_mass_buffer,
            grid_force_buffer,
            grid_real_buffer,
            uniform_buffer,
            boundary_buffer,
            force_field_buffer,
            max_speed_buffer,
            max_speed_staging,
            bind_group_layout_particles_grid,
            grid_dims,
            max_particles,
        }
    }

    pub fn grid_dims(&self) -> GridDims {
        self.grid_dims
    }

    /// The GPU-resident particle buffer, for a renderer to bind directly
    /// rather than round-tripping particle state through the CPU each frame.
    pub fn particle_buffer(&self) -> &wgpu::Buffer {
        &self.particle_buffer
    }

    pub fn upload_particles(&self, storage: &ParticleStorage) {
        self.queue
            .write_buffer(&self.particle_buffer, 0, bytemuck::cast_slice(storage.as_slice()));
    }

    pub fn write_uniforms(&self, uniforms: &SolverUniforms) {
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[*uniforms]));
    }

    pub fn write_boundary_uniforms(&self, uniforms: &BoundaryUniforms) {
        self.queue
            .write_buffer(&self.boundary_buffer, 0, bytemuck::cast_slice(&[*uniforms]));
    }

    /// Upload the current force-field registry: force-field and emitter
    /// arrays are owned by the host and uploaded each frame.
    pub fn write_force_fields(&self, fields: &[ForceFieldGpu; MAX_FORCE_FIELDS]) {
        self.queue
            .write_buffer(&self.force_field_buffer, 0, bytemuck::cast_slice(fields));
    }

    /// Inject emitter-spawned particles by overwriting the tail of the
    /// live range — the CPU-to-GPU queue of particles-to-spawn.
    pub fn apply_spawns(&self, storage: &mut ParticleStorage, spawns: &[ParticleSpawn]) -> Result<()> {
        let live = storage.live_count();
        let new_live = live + spawns.len() as u32;
        if new_live > storage.max_particles() {
            return Err(PulsegridError::InsufficientStorage {
                requested: new_live,
                limit: storage.max_particles(),
            });
        }
        storage.set_live_count(new_live);
        let slice = storage.full_buffer_mut();
        for (i, spawn) in spawns.iter().enumerate() {
            let idx = (live as usize) + i;
            let mut particle = Particle::zeroed();
            particle.set_position(spawn.position);
            particle.set_velocity(spawn.velocity);
            particle.mass = 1.0;
            particle.density = 1.0;
            particle.material = spawn.material as u32;
            slice[idx] = particle;
        }
        Ok(())
    }

    /// Run the five-pass MLS-MPM step, in order:
    /// `clearGrid -> p2g1 -> p2g2 -> updateGrid -> g2p`, each pass
    /// happens-before the next via the implicit queue submission order.
    /// Returns the maximum particle speed G2P observed this step, for the
    /// caller to feed into the next frame's adaptive-timestep CFL clamp.
    pub fn step(&self, num_particles: u32) -> f32 {
        let cell_count = self.grid_dims.cell_count();
        let bind_group = self.bind_group();

        self.queue.write_buffer(&self.max_speed_buffer, 0, bytemuck::cast_slice(&[0u32]));

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pulsegrid solver step"),
        });

        dispatch(&mut encoder, &self.pipelines.clear_grid, &bind_group, cell_count);
        dispatch(&mut encoder, &self.pipelines.p2g1, &bind_group, num_particles);
        dispatch(&mut encoder, &self.pipelines.p2g2, &bind_group, num_particles);
        dispatch(&mut encoder, &self.pipelines.update_grid, &bind_group, cell_count);
        dispatch(&mut encoder, &self.pipelines.g2p, &bind_group, num_particles);
        encoder.copy_buffer_to_buffer(&self.max_speed_buffer, 0, &self.max_speed_staging, 0, std::mem::size_of::<u32>() as u64);

        self.queue.submit(Some(encoder.finish()));
        self.read_max_speed()
    }

    /// Blocking readback of the max-speed reduction `step` just wrote,
    /// using the standard `map_async` + `Device::poll(Maintain::Wait)`
    /// synchronous-map idiom (the same fence this crate's concurrency model
    /// uses to await G2P's completion).
    fn read_max_speed(&self) -> f32 {
        let slice = self.max_speed_staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, |_| {});
        self.device.poll(wgpu::Maintain::Wait);
        let bits = {
            let data = slice.get_mapped_range();
            u32::from_le_bytes(data[0..4].try_into().unwrap())
        };
        self.max_speed_staging.unmap();
        f32::from_bits(bits)
    }

    fn bind_group(&self) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pulsegrid solver bind group"),
            layout: &self.bind_group_layout_particles_grid,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.uniform_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: self.particle_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: self.grid_mass_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: self.grid_force_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: self.grid_real_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: self.boundary_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: self.force_field_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: self.max_speed_buffer.as_entire_binding() },
            ],
        })
    }
}

/// Bindings 0 and 5 are uniform blocks (solver uniforms, boundary shape);
/// 1-4 are the particle and grid storage buffers shared by every pass;
/// 6 is the read-only force-field array consumed by G2P; 7 is the
/// single-cell atomic-max speed reduction G2P writes and the host reads
/// back for the adaptive-timestep CFL clamp.
fn bind_group_layout_entries() -> Vec<wgpu::BindGroupLayoutEntry> {
    (0..8u32)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: if binding == 0 || binding == 5 {
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                }
            } else {
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: binding == 6 },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                }
            },
            count: None,
        })
        .collect()
}

fn dispatch(encoder: &mut wgpu::CommandEncoder, pipeline: &wgpu::ComputePipeline, bind_group: &wgpu::BindGroup, item_count: u32) {
    let workgroups = (item_count + 63) / 64;
    if workgroups == 0 {
        return;
    }
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: None,
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(workgroups, 1, 1);
}

/// Gravity vector for a given mode. `device` is the
/// platform accelerometer reading, when available; falls back to `down`.
pub fn gravity_vector(mode: GravityMode, magnitude: f32, device: Option<Vec3>) -> Vec3 {
    match mode {
        GravityMode::Back => Vec3::new(0.0, 0.0, -magnitude),
        GravityMode::Down => Vec3::new(0.0, -magnitude, 0.0),
        GravityMode::Center => Vec3::ZERO,
        GravityMode::Device => device.unwrap_or(Vec3::new(0.0, -magnitude, 0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gravity_down_points_negative_y() {
        let g = gravity_vector(GravityMode::Down, 0.2, None);
        assert!(g.y < 0.0 && g.x == 0.0 && g.z == 0.0);
    }

    #[test]
    fn gravity_center_is_zero() {
        let g = gravity_vector(GravityMode::Center, 0.2, None);
        assert_eq!(g, Vec3::ZERO);
    }

    #[test]
    fn uniforms_round_trip_transfer_mode() {
        let mut config = SolverConfig::default();
        config.transfer_mode = TransferMode::Flip;
        let dims = GridDims::from_aspect(1.0);
        let uniforms = SolverUniforms::from_config(&config, dims, GravityMode::Down, 1024);
        assert_eq!(uniforms.transfer_mode, 1);
        assert_eq!(uniforms.num_particles, 1024);
        assert_eq!(uniforms.grid_size, [dims.x as i32, dims.y as i32, dims.z as i32]);
    }

    #[test]
    fn dispatch_workgroup_count_rounds_up() {
        assert_eq!((65_536u32 + 63) / 64, 1024);
        assert_eq!((1u32 + 63) / 64, 1);
        assert_eq!((0u32 + 63) / 64, 0);
    }
}

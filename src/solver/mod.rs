//! The MLS-MPM solver: particle/grid storage, boundary, forces, emitters,
//! and the GPU dispatch loop.

pub mod boundary;
pub mod emitter;
pub mod forces;
pub mod gpu;
pub mod grid;
pub mod particle;
pub mod shaders;

pub use boundary::{Boundary, BoundaryShape, BoundaryState, CollisionMode};
pub use emitter::{Emitter, EmitterPattern, EmitterRegistry, EmitterShape, ParticleSpawn};
pub use forces::{ForceField, ForceFieldGpu, ForceFieldRegistry, MAX_FORCE_FIELDS};
pub use gpu::{BoundaryUniforms, Solver, SolverUniforms};
pub use grid::GridDims;
pub use particle::{Material, Particle, ParticleStorage};

//! Error taxonomy.
//!
//! Only initialization failures are surfaced to the caller;
//! everything else is handled in-frame by clamping, decay, or re-clamping
//! and never reaches this type.

use thiserror::Error;

/// Fatal errors that can occur while setting up the simulator.
#[derive(Debug, Error)]
pub enum PulsegridError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("insufficient storage for {requested} particles (device limit {limit})")]
    InsufficientStorage { requested: u32, limit: u32 },

    #[error("invalid FFT size {0}: must be a power of two in [64, 65536]")]
    InvalidFftSize(usize),
}

pub type Result<T> = std::result::Result<T, PulsegridError>;

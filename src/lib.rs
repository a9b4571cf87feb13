//! pulsegrid - real-time audio-reactive MLS-MPM particle simulator.
//!
//! ## Architecture
//!
//! - **solver**: particle/grid storage, boundary engine, force fields and
//!   emitters, and the five-pass GPU compute pipeline.
//! - **audio**: windowed-FFT feature extraction, groove/structure/prediction
//!   analysis.
//! - **modulation**: collapses audio features into the eight normalised
//!   modulators that drive solver parameters.
//! - **performance**: FPS-tiered adaptive quality controller.
//! - **pipeline**: per-frame orchestration tying every subsystem together.
//! - **command**: the bounded command queue external callers mutate state
//!   through.

pub mod audio;
pub mod command;
pub mod config;
pub mod error;
pub mod modulation;
pub mod performance;
pub mod pipeline;
pub mod solver;

pub use command::{Command, CommandQueue};
pub use config::PulsegridConfig;
pub use error::{PulsegridError, Result};
pub use pipeline::{FrameMetrics, FramePipeline, MouseRay};

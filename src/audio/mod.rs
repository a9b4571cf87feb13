//! Audio feature extraction and rhythm analysis.

pub mod analyzer;
pub mod bands;
pub mod feed;
pub mod groove;
pub mod prediction;
pub mod structure;

pub use analyzer::{AudioAnalyzer, AudioFrame};
pub use feed::{audio_block_channel, AudioBlock, AudioBlockReceiver, AudioBlockSender, AudioFeed, AudioFeedReader};
pub use groove::{BeatEvent, GrooveEngine, GrooveState};
pub use prediction::{AnticipationWindows, PredictedBeat, PredictionEngine};
pub use structure::{Section, SectionState, StructureAnalyzer};

//! Audio ingestion for the callback-driven model: the host's audio device
//! callback pushes stereo PCM blocks from its own thread; `FramePipeline`
//! drains and analyses them on the frame thread with a single-writer/
//! single-reader discipline, matching `spec.md` §5's "triple buffer or
//! atomic swap is acceptable" shared-resource contract.
//!
//! Grounded on the teacher's `audio::player::AudioPlayer`: a
//! `crossbeam_channel` producer/consumer pair plus an
//! `Arc<parking_lot::RwLock<_>>` published-value slot, just generalized
//! from "features written straight into the shared slot" to "raw PCM
//! queued, then analysed on the consumer side" since `pulsegrid`'s
//! `AudioAnalyzer` is not `Send`-shared across the callback boundary.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use crate::audio::{AudioAnalyzer, AudioFrame};

/// One stereo PCM block handed off from the audio callback thread.
pub struct AudioBlock {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub time: f64,
}

/// Producer half, held by the audio device's callback. Bounded at 1: a
/// block that arrives before the frame thread has drained the previous one
/// is dropped rather than queued, so a stalled consumer never backs up the
/// realtime audio callback.
#[derive(Clone)]
pub struct AudioBlockSender {
    tx: Sender<AudioBlock>,
}

impl AudioBlockSender {
    /// Non-blocking send. Returns `false` if the previous block had not yet
    /// been drained (the frame thread is falling behind); the caller should
    /// just carry on rather than retry.
    pub fn try_send(&self, block: AudioBlock) -> bool {
        match self.tx.try_send(block) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Consumer half, polled once per frame by `FramePipeline`.
pub struct AudioBlockReceiver {
    rx: Receiver<AudioBlock>,
}

impl AudioBlockReceiver {
    /// Drain the channel and return only the most recent block, discarding
    /// any older ones still queued (the analyzer only ever needs the
    /// latest window, not a backlog).
    fn take_latest(&self) -> Option<AudioBlock> {
        let mut latest = None;
        while let Ok(block) = self.rx.try_recv() {
            latest = Some(block);
        }
        latest
    }
}

/// Create a bounded (capacity 1) audio block channel.
pub fn audio_block_channel() -> (AudioBlockSender, AudioBlockReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (AudioBlockSender { tx }, AudioBlockReceiver { rx })
}

/// The single published `AudioFrame` slot, atomically swapped each time a
/// new block is analysed. Cloning an `AudioFeed` shares the same slot.
#[derive(Clone)]
struct PublishedFrame(Arc<RwLock<AudioFrame>>);

impl PublishedFrame {
    fn new() -> Self {
        Self(Arc::new(RwLock::new(AudioFrame::default())))
    }

    fn read(&self) -> AudioFrame {
        self.0.read().clone()
    }

    fn write(&self, frame: AudioFrame) {
        *self.0.write() = frame;
    }
}

/// Owns the analyzer and the published-frame slot; drains queued PCM blocks
/// and republishes the latest `AudioFrame` once per poll. This is the
/// callback-driven alternative to calling `AudioAnalyzer::process` directly
/// from `FramePipeline::tick` (the polled-FFT model); a host picks one.
pub struct AudioFeed {
    analyzer: AudioAnalyzer,
    receiver: AudioBlockReceiver,
    published: PublishedFrame,
}

impl AudioFeed {
    pub fn new(analyzer: AudioAnalyzer, receiver: AudioBlockReceiver) -> Self {
        Self {
            analyzer,
            receiver,
            published: PublishedFrame::new(),
        }
    }

    /// A cheap, `Clone`-able handle onto the published `AudioFrame`, for a
    /// reader that lives on a different thread than `poll`.
    pub fn reader(&self) -> AudioFeedReader {
        AudioFeedReader {
            published: self.published.clone(),
        }
    }

    /// Analyse the most recently queued block, if any, and republish.
    /// Returns `true` if a new block was processed this call.
    pub fn poll(&mut self) -> bool {
        let Some(block) = self.receiver.take_latest() else {
            return false;
        };
        let prev = self.published.read();
        let frame = self.analyzer.process(&block.left, &block.right, block.time, &prev);
        self.published.write(frame);
        true
    }

    pub fn latest(&self) -> AudioFrame {
        self.published.read()
    }
}

/// Read-only handle onto an `AudioFeed`'s published frame, safe to hold
/// from a thread that does not own the analyzer itself.
#[derive(Clone)]
pub struct AudioFeedReader {
    published: PublishedFrame,
}

impl AudioFeedReader {
    pub fn latest(&self) -> AudioFrame {
        self.published.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioConfig;

    fn block(size: usize, time: f64, value: f32) -> AudioBlock {
        AudioBlock {
            left: vec![value; size],
            right: vec![value; size],
            time,
        }
    }

    #[test]
    fn bounded_channel_drops_when_consumer_falls_behind() {
        let (tx, rx) = audio_block_channel();
        assert!(tx.try_send(block(64, 0.0, 0.1)));
        assert!(!tx.try_send(block(64, 1.0, 0.2)));
        let latest = rx.take_latest().expect("first block still queued");
        assert_eq!(latest.time, 0.0);
    }

    #[test]
    fn take_latest_discards_stale_blocks() {
        let (tx, rx) = audio_block_channel();
        assert!(tx.try_send(block(64, 0.0, 0.1)));
        // Drain so the channel has room, then queue a second, newer block.
        let _ = rx.take_latest();
        assert!(tx.try_send(block(64, 1.0, 0.2)));
        let latest = rx.take_latest().expect("second block queued");
        assert_eq!(latest.time, 1.0);
    }

    #[test]
    fn poll_with_no_block_leaves_published_frame_unchanged() {
        let config = AudioConfig::default();
        let analyzer = AudioAnalyzer::new(config).unwrap();
        let (_tx, rx) = audio_block_channel();
        let mut feed = AudioFeed::new(analyzer, rx);
        assert!(!feed.poll());
        assert_eq!(feed.latest().tempo, AudioFrame::default().tempo);
    }

    #[test]
    fn poll_publishes_a_new_frame_readable_from_a_cloned_handle() {
        let config = AudioConfig::default();
        let fft_size = config.fft_size;
        let analyzer = AudioAnalyzer::new(config).unwrap();
        let (tx, rx) = audio_block_channel();
        let mut feed = AudioFeed::new(analyzer, rx);
        let reader = feed.reader();

        assert!(tx.try_send(block(fft_size, 0.0, 0.5)));
        assert!(feed.poll());

        assert!((reader.latest().overall - feed.latest().overall).abs() < 1.0e-6);
    }
}

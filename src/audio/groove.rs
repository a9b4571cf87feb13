//! Groove engine: beat-timing history to swing/pocket metrics.

use std::collections::VecDeque;

const MAX_BEATS: usize = 128;
const MIN_BEATS_FOR_ANALYSIS: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct BeatEvent {
    pub time: f64,
    pub intensity: f32,
    pub is_downbeat: bool,
}

/// Smoothed groove-feel metrics derived from recent beat timing.
#[derive(Debug, Clone, Copy)]
pub struct GrooveState {
    pub swing_ratio: f32,
    pub micro_timing_variance: f32,
    pub timing_consistency: f32,
    pub rhythmic_density: f32,
    pub syncopation_level: f32,
    pub polyrhythm_detected: bool,
    pub groove_intensity: f32,
    pub pocket_tightness: f32,
    pub driving_force: f32,
    pub analysis_confidence: f32,
    pub sample_size: usize,
}

impl Default for GrooveState {
    fn default() -> Self {
        Self {
            swing_ratio: 0.0,
            micro_timing_variance: 0.0,
            timing_consistency: 0.0,
            rhythmic_density: 0.0,
            syncopation_level: 0.0,
            polyrhythm_detected: false,
            groove_intensity: 0.0,
            pocket_tightness: 0.0,
            driving_force: 0.0,
            analysis_confidence: 0.0,
            sample_size: 0,
        }
    }
}

pub struct GrooveEngine {
    beats: VecDeque<BeatEvent>,
    state: GrooveState,
}

impl Default for GrooveEngine {
    fn default() -> Self {
        Self {
            beats: VecDeque::with_capacity(MAX_BEATS),
            state: GrooveState::default(),
        }
    }
}

impl GrooveEngine {
    pub fn state(&self) -> GrooveState {
        self.state
    }

    pub fn push_beat(&mut self, event: BeatEvent) {
        if self.beats.len() >= MAX_BEATS {
            self.beats.pop_front();
        }
        self.beats.push_back(event);
        if self.beats.len() >= MIN_BEATS_FOR_ANALYSIS {
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        let iois: Vec<f64> = self
            .beats
            .iter()
            .zip(self.beats.iter().skip(1))
            .map(|(a, b)| b.time - a.time)
            .collect();
        if iois.is_empty() {
            return;
        }

        let mean_ioi = iois.iter().sum::<f64>() / iois.len() as f64;
        let tempo = if mean_ioi > 0.0 { 60.0 / mean_ioi } else { 120.0 };

        // Swing ratio: average |IOI_2k / IOI_2k+1 - 1| across consecutive pairs.
        let mut swing_sum = 0.0;
        let mut swing_count = 0;
        let mut i = 0;
        while i + 1 < iois.len() {
            if iois[i + 1].abs() > 1.0e-9 {
                swing_sum += (iois[i] / iois[i + 1] - 1.0).abs();
                swing_count += 1;
            }
            i += 2;
        }
        let swing_ratio = if swing_count > 0 { swing_sum / swing_count as f64 } else { 0.0 };

        // Micro-timing variance: deviation of IOIs from 60/tempo.
        let expected = 60.0 / tempo;
        let micro_variance = iois.iter().map(|ioi| (ioi - expected).powi(2)).sum::<f64>() / iois.len() as f64;

        let timing_consistency = (1.0 - (micro_variance.sqrt() / expected.max(1.0e-6))).clamp(0.0, 1.0);

        let polyrhythm = detect_pattern(&iois, 2) < 0.7
            && (detect_pattern(&iois, 4) >= 0.7 || detect_pattern(&iois, 8) >= 0.7);

        let sample_size = self.beats.len();
        let confidence = 0.4 * (sample_size as f32 / MAX_BEATS as f32).min(1.0) + 0.6 * timing_consistency as f32;

        let rhythmic_density = (sample_size as f32 / MAX_BEATS as f32).clamp(0.0, 1.0);
        let syncopation = 1.0
            - self
                .beats
                .iter()
                .filter(|b| b.is_downbeat)
                .count() as f32
                / sample_size as f32;
        let groove_intensity = self.beats.iter().map(|b| b.intensity).sum::<f32>() / sample_size as f32;
        let pocket_tightness = timing_consistency as f32;
        let driving_force = groove_intensity * timing_consistency as f32;

        let alpha = 0.3_f32;
        let blend = |prev: f32, next: f32| alpha * next + (1.0 - alpha) * prev;

        self.state = GrooveState {
            swing_ratio: blend(self.state.swing_ratio, swing_ratio as f32),
            micro_timing_variance: blend(self.state.micro_timing_variance, micro_variance as f32),
            timing_consistency: blend(self.state.timing_consistency, timing_consistency as f32),
            rhythmic_density: blend(self.state.rhythmic_density, rhythmic_density),
            syncopation_level: blend(self.state.syncopation_level, syncopation),
            polyrhythm_detected: polyrhythm,
            groove_intensity: blend(self.state.groove_intensity, groove_intensity),
            pocket_tightness: blend(self.state.pocket_tightness, pocket_tightness),
            driving_force: blend(self.state.driving_force, driving_force),
            analysis_confidence: blend(self.state.analysis_confidence, confidence),
            sample_size,
        };
    }
}

/// Similarity (1 - normalised absolute difference) of IOI sequences spaced
/// `lag` beats apart, used to search for repeating 2/4/8-beat patterns.
fn detect_pattern(iois: &[f64], lag: usize) -> f32 {
    if iois.len() <= lag {
        return 0.0;
    }
    let mut total = 0.0;
    let mut count = 0;
    for i in 0..iois.len() - lag {
        let a = iois[i];
        let b = iois[i + lag];
        let denom = a.max(b).max(1.0e-9);
        total += 1.0 - ((a - b).abs() / denom);
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        (total / count as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_beats_yield_low_swing_and_high_consistency() {
        let mut engine = GrooveEngine::default();
        for i in 0..16 {
            engine.push_beat(BeatEvent {
                time: i as f64 * 0.5,
                intensity: 0.8,
                is_downbeat: i % 4 == 0,
            });
        }
        let state = engine.state();
        assert!(state.swing_ratio < 0.05);
        assert!(state.timing_consistency > 0.9);
        assert_eq!(state.sample_size, 16);
    }

    #[test]
    fn two_to_one_shuffle_yields_mid_range_swing_ratio() {
        let mut engine = GrooveEngine::default();
        let mut time = 0.0;
        for i in 0..32 {
            engine.push_beat(BeatEvent {
                time,
                intensity: 0.8,
                is_downbeat: i % 4 == 0,
            });
            // Alternate a short/long IOI pair (2:1 shuffle feel).
            time += if i % 2 == 0 { 0.25 } else { 0.5 };
        }
        let state = engine.state();
        assert!(state.swing_ratio >= 0.3 && state.swing_ratio <= 0.7, "got {}", state.swing_ratio);
    }

    #[test]
    fn fewer_than_minimum_beats_leaves_default_state() {
        let mut engine = GrooveEngine::default();
        for i in 0..5 {
            engine.push_beat(BeatEvent {
                time: i as f64 * 0.5,
                intensity: 0.5,
                is_downbeat: false,
            });
        }
        assert_eq!(engine.state().sample_size, 0);
    }

    #[test]
    fn ring_buffer_caps_at_128_beats() {
        let mut engine = GrooveEngine::default();
        for i in 0..200 {
            engine.push_beat(BeatEvent {
                time: i as f64 * 0.5,
                intensity: 0.5,
                is_downbeat: false,
            });
        }
        assert_eq!(engine.state().sample_size, MAX_BEATS);
    }
}

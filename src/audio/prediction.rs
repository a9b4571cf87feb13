//! Predictive beat timing.

use std::collections::VecDeque;

const MAX_IOIS: usize = 32;
const STABILITY_CV_THRESHOLD: f32 = 0.1;
const LOOKAHEAD_BEATS: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct PredictedBeat {
    pub time: f64,
    pub is_downbeat: bool,
    pub beat_number_in_measure: u32,
    pub confidence: f32,
    pub time_until: f64,
}

/// Base durations (seconds) for anticipation windows at 120 BPM, scaled by
/// `clamp(120/tempo, 0.5, 2.0)`.
#[derive(Debug, Clone, Copy)]
pub struct AnticipationWindows {
    pub swell: f64,
    pub attack: f64,
    pub accent: f64,
    pub breath: f64,
}

const BASE_WINDOWS: AnticipationWindows = AnticipationWindows {
    swell: 0.5,
    attack: 0.05,
    accent: 0.15,
    breath: 1.0,
};

pub struct PredictionEngine {
    iois: VecDeque<f64>,
    last_beat_time: f64,
    last_beat_number: u32,
    tempo: f32,
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self {
            iois: VecDeque::with_capacity(MAX_IOIS),
            last_beat_time: 0.0,
            last_beat_number: 0,
            tempo: 120.0,
        }
    }
}

impl PredictionEngine {
    pub fn observe_beat(&mut self, time: f64, is_downbeat: bool) {
        if self.last_beat_time > 0.0 {
            let ioi = time - self.last_beat_time;
            if ioi > 0.0 {
                if self.iois.len() >= MAX_IOIS {
                    self.iois.pop_front();
                }
                self.iois.push_back(ioi);
            }
        }
        self.last_beat_time = time;
        self.last_beat_number = if is_downbeat { 0 } else { (self.last_beat_number + 1) % 4 };
        if let Some(tempo) = self.tempo_estimate() {
            self.tempo = tempo;
        }
    }

    fn tempo_estimate(&self) -> Option<f32> {
        if self.iois.is_empty() {
            return None;
        }
        let mean = self.iois.iter().sum::<f64>() / self.iois.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        Some((60.0 / mean) as f32)
    }

    fn coefficient_of_variation(&self) -> f32 {
        if self.iois.len() < 2 {
            return f32::MAX;
        }
        let mean = self.iois.iter().sum::<f64>() / self.iois.len() as f64;
        if mean <= 0.0 {
            return f32::MAX;
        }
        let var = self.iois.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.iois.len() as f64;
        (var.sqrt() / mean) as f32
    }

    pub fn is_stable(&self) -> bool {
        self.coefficient_of_variation() < STABILITY_CV_THRESHOLD
    }

    /// Extrapolate the next `LOOKAHEAD_BEATS` beats while tempo is stable;
    /// returns an empty vec otherwise.
    pub fn predict(&self, now: f64) -> Vec<PredictedBeat> {
        if !self.is_stable() || self.tempo <= 0.0 {
            return Vec::new();
        }
        let period = 60.0 / self.tempo as f64;
        (1..=LOOKAHEAD_BEATS)
            .map(|k| {
                let time = self.last_beat_time + k as f64 * period;
                PredictedBeat {
                    time,
                    is_downbeat: (self.last_beat_number as usize + k) % 4 == 0,
                    beat_number_in_measure: (self.last_beat_number + k as u32) % 4,
                    confidence: (1.0 - self.coefficient_of_variation()).clamp(0.0, 1.0),
                    time_until: time - now,
                }
            })
            .collect()
    }

    pub fn anticipation_windows(&self) -> AnticipationWindows {
        let scale = (120.0 / self.tempo.max(1.0e-3)).clamp(0.5, 2.0) as f64;
        AnticipationWindows {
            swell: BASE_WINDOWS.swell * scale,
            attack: BASE_WINDOWS.attack * scale,
            accent: BASE_WINDOWS.accent * scale,
            breath: BASE_WINDOWS.breath * scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_tempo_is_flagged_stable() {
        let mut engine = PredictionEngine::default();
        for i in 0..10 {
            engine.observe_beat(i as f64 * 0.5, i % 4 == 0);
        }
        assert!(engine.is_stable());
        assert!((engine.tempo - 120.0).abs() < 1.0);
    }

    #[test]
    fn erratic_tempo_is_not_stable() {
        let mut engine = PredictionEngine::default();
        let times = [0.0, 0.3, 1.2, 1.4, 3.0, 3.1, 5.5];
        for (i, t) in times.iter().enumerate() {
            engine.observe_beat(*t, i % 4 == 0);
        }
        assert!(!engine.is_stable());
        assert!(engine.predict(6.0).is_empty());
    }

    #[test]
    fn stable_tempo_predicts_eight_beats() {
        let mut engine = PredictionEngine::default();
        for i in 0..10 {
            engine.observe_beat(i as f64 * 0.5, i % 4 == 0);
        }
        let predicted = engine.predict(4.5);
        assert_eq!(predicted.len(), 8);
        assert!(predicted[0].time > 4.5);
    }

    #[test]
    fn anticipation_windows_scale_with_tempo() {
        let mut engine = PredictionEngine::default();
        for i in 0..10 {
            engine.observe_beat(i as f64 * 0.25, i % 4 == 0); // 240 BPM
        }
        let windows = engine.anticipation_windows();
        assert!(windows.swell < BASE_WINDOWS.swell);
    }
}

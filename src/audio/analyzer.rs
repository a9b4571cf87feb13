//! Windowed-FFT feature extraction, grounded on the
//! `realfft`-based analyzer pattern used elsewhere in the retrieval pack
//! (`rf-dsp::analysis::FftAnalyzer`).

use std::collections::VecDeque;

use realfft::{RealFftPlanner, RealToComplex};
use serde::Serialize;
use std::sync::Arc;

use crate::audio::bands::{self, BandRange, BASS, MID, TREBLE};
use crate::config::AudioConfig;
use crate::error::{PulsegridError, Result};

const HISTORY_LEN: usize = 256;

/// Per-tick analysis output, refreshed at the audio sample-block cadence.
/// `Serialize` so `FrameMetrics::to_json` can hand a dashboard consumer the
/// full feature set, per `spec.md` §6's "Frame output (to dashboards)".
#[derive(Debug, Clone, Serialize)]
pub struct AudioFrame {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub overall: f32,
    pub smooth_bass: f32,
    pub smooth_mid: f32,
    pub smooth_treble: f32,
    pub smooth_overall: f32,
    pub beat: bool,
    pub beat_intensity: f32,
    pub tempo_phase: f32,
    pub spectral_flux: f32,
    pub onset_energy: f32,
    pub harmonic_ratio: f32,
    pub harmonic_energy: f32,
    pub rhythm_confidence: f32,
    pub tempo: f32,
    pub stereo_balance: f32,
    pub stereo_width: f32,
    pub groove: f32,
    pub loudness_history: VecDeque<f32>,
    pub flux_history: VecDeque<f32>,
    pub beat_history: VecDeque<f32>,
}

impl Default for AudioFrame {
    fn default() -> Self {
        Self {
            bass: 0.0,
            mid: 0.0,
            treble: 0.0,
            overall: 0.0,
            smooth_bass: 0.0,
            smooth_mid: 0.0,
            smooth_treble: 0.0,
            smooth_overall: 0.0,
            beat: false,
            beat_intensity: 0.0,
            tempo_phase: 0.0,
            spectral_flux: 0.0,
            onset_energy: 0.0,
            harmonic_ratio: 0.0,
            harmonic_energy: 0.0,
            rhythm_confidence: 0.0,
            tempo: 120.0,
            stereo_balance: 0.0,
            stereo_width: 0.0,
            groove: 0.0,
            loudness_history: VecDeque::with_capacity(HISTORY_LEN),
            flux_history: VecDeque::with_capacity(HISTORY_LEN),
            beat_history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }
}

fn push_bounded(buf: &mut VecDeque<f32>, value: f32) {
    if buf.len() >= HISTORY_LEN {
        buf.pop_front();
    }
    buf.push_back(value);
}

/// Running-statistics gate for beat detection: a beat
/// fires when the current bass band exceeds `mean + threshold*stddev` and
/// the refractory period has elapsed.
struct BeatGate {
    window: VecDeque<f32>,
    window_len: usize,
    last_beat_time: f64,
}

impl BeatGate {
    fn new(window_len: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_len),
            window_len,
            last_beat_time: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, value: f32) {
        if self.window.len() >= self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    fn mean_std(&self) -> (f32, f32) {
        if self.window.is_empty() {
            return (0.0, 0.0);
        }
        let mean = self.window.iter().sum::<f32>() / self.window.len() as f32;
        let var = self
            .window
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f32>()
            / self.window.len() as f32;
        (mean, var.sqrt())
    }
}

pub struct AudioAnalyzer {
    config: AudioConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    prev_magnitudes: Vec<f32>,
    beat_gate: BeatGate,
    onset_history: VecDeque<f32>,
    ioi_history: VecDeque<f64>,
    last_beat_time: f64,
    beat_intensity_decay: f32,
    tempo_smoothed: f32,
}

impl AudioAnalyzer {
    pub fn new(config: AudioConfig) -> Result<Self> {
        if !config.fft_size.is_power_of_two() || !(64..=65_536).contains(&config.fft_size) {
            return Err(PulsegridError::InvalidFftSize(config.fft_size));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.fft_size);
        let window = hann_window(config.fft_size);
        Ok(Self {
            fft,
            window,
            prev_magnitudes: vec![0.0; config.fft_size / 2 + 1],
            beat_gate: BeatGate::new(((config.sample_rate as f32) / 64.0) as usize),
            onset_history: VecDeque::with_capacity(HISTORY_LEN),
            ioi_history: VecDeque::with_capacity(32),
            last_beat_time: f64::NEG_INFINITY,
            beat_intensity_decay: 0.0,
            tempo_smoothed: 120.0,
            config,
        })
    }

    /// Process one stereo PCM block. `left`/`right` must be exactly
    /// `fft_size` samples; `time` is the block's start time in seconds.
    pub fn process(&mut self, left: &[f32], right: &[f32], time: f64, prev: &AudioFrame) -> AudioFrame {
        let mono: Vec<f32> = left
            .iter()
            .zip(right.iter())
            .map(|(l, r)| 0.5 * (l + r))
            .collect();

        let magnitudes = self.fft_magnitudes(&mono);

        let bass = bands::band_energy(&magnitudes, self.config.sample_rate, self.config.fft_size, BASS, self.config.bass_gain);
        let mid = bands::band_energy(&magnitudes, self.config.sample_rate, self.config.fft_size, MID, self.config.mid_gain);
        let treble = bands::band_energy(&magnitudes, self.config.sample_rate, self.config.fft_size, TREBLE, self.config.treble_gain);
        let overall = bands::overall_energy(&magnitudes, self.config.overall_gain);

        let alpha = self.config.smoothing;
        let smooth_bass = bands::one_pole(prev.smooth_bass, bass, alpha);
        let smooth_mid = bands::one_pole(prev.smooth_mid, mid, alpha);
        let smooth_treble = bands::one_pole(prev.smooth_treble, treble, alpha);
        let smooth_overall = bands::one_pole(prev.smooth_overall, overall, alpha);

        let band_energy_total = (bass + mid + treble).max(1.0e-6);
        let spectral_flux = self.spectral_flux(&magnitudes) / band_energy_total;
        push_bounded(&mut self.onset_history, spectral_flux);
        let onset_energy = triangle_convolve(&self.onset_history, self.config.sample_rate);

        let harmonic_ratio = harmonic_ratio_autocorrelation(&mono);
        let harmonic_energy = harmonic_ratio * overall;

        self.beat_gate.push(bass);
        let (mean, std) = self.beat_gate.mean_std();
        let refractory_elapsed = time - self.last_beat_time >= self.config.min_beat_interval_secs as f64;
        let gate_value = mean + self.config.beat_threshold * std;
        let beat = std > 1.0e-6 && bass > gate_value && refractory_elapsed;

        if beat {
            if self.last_beat_time.is_finite() {
                let ioi = time - self.last_beat_time;
                if self.ioi_history.len() >= 32 {
                    self.ioi_history.pop_front();
                }
                self.ioi_history.push_back(ioi);
            }
            self.last_beat_time = time;
            let raw_intensity = if std > 1.0e-6 { (bass - mean) / std } else { 0.0 };
            self.beat_intensity_decay = raw_intensity.clamp(0.0, 1.0);
        } else {
            self.beat_intensity_decay *= self.config.beat_decay;
        }

        self.tempo_smoothed = self.estimate_tempo().unwrap_or(self.tempo_smoothed);
        let tempo = self.tempo_smoothed.clamp(40.0, 200.0);
        let beat_period = (60.0 / tempo as f64).max(1.0e-3);
        let tempo_phase = (((time - self.last_beat_time) / beat_period).rem_euclid(1.0)) as f32;

        let rhythm_confidence = rhythm_confidence(&self.ioi_history);

        let stereo_balance = stereo_balance(left, right);
        let stereo_width = 1.0 - correlation(left, right);

        let mut frame = AudioFrame {
            bass,
            mid,
            treble,
            overall,
            smooth_bass,
            smooth_mid,
            smooth_treble,
            smooth_overall,
            beat,
            beat_intensity: self.beat_intensity_decay,
            tempo_phase,
            spectral_flux,
            onset_energy,
            harmonic_ratio,
            harmonic_energy,
            rhythm_confidence,
            tempo,
            stereo_balance,
            stereo_width,
            groove: prev.groove,
            loudness_history: prev.loudness_history.clone(),
            flux_history: prev.flux_history.clone(),
            beat_history: prev.beat_history.clone(),
        };
        push_bounded(&mut frame.loudness_history, overall);
        push_bounded(&mut frame.flux_history, spectral_flux);
        push_bounded(&mut frame.beat_history, if beat { 1.0 } else { 0.0 });

        self.prev_magnitudes = magnitudes;
        frame
    }

    fn fft_magnitudes(&mut self, mono: &[f32]) -> Vec<f32> {
        let n = self.config.fft_size;
        let mut input = self.fft.make_input_vec();
        for (i, sample) in mono.iter().take(n).enumerate() {
            input[i] = sample * self.window[i];
        }
        let mut output = self.fft.make_output_vec();
        // `process` never fails for matching buffer lengths produced by
        // `make_input_vec`/`make_output_vec`.
        let _ = self.fft.process(&mut input, &mut output);
        output.iter().map(|c| c.norm()).collect()
    }

    fn spectral_flux(&self, magnitudes: &[f32]) -> f32 {
        magnitudes
            .iter()
            .zip(self.prev_magnitudes.iter())
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum()
    }

    /// Autocorrelation of the onset envelope over lags for 40-200 BPM.
    fn estimate_tempo(&self) -> Option<f32> {
        if self.onset_history.len() < 8 {
            return None;
        }
        let envelope: Vec<f32> = self.onset_history.iter().copied().collect();
        let block_rate_hz = self.config.sample_rate as f32 / self.config.fft_size as f32;
        let min_lag = (60.0 / 200.0 * block_rate_hz).max(1.0) as usize;
        let max_lag = (60.0 / 40.0 * block_rate_hz).min(envelope.len() as f32 - 1.0) as usize;
        if min_lag >= max_lag {
            return None;
        }
        let mut best_lag = min_lag;
        let mut best_score = f32::MIN;
        for lag in min_lag..=max_lag {
            let mut score = 0.0;
            let mut count = 0;
            for i in lag..envelope.len() {
                score += envelope[i] * envelope[i - lag];
                count += 1;
            }
            if count > 0 {
                score /= count as f32;
            }
            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }
        let bpm = 60.0 * block_rate_hz / best_lag as f32;
        Some(bpm.clamp(40.0, 200.0))
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0
                - (2.0 * std::f32::consts::PI * i as f32 / (size.max(2) - 1) as f32).cos())
        })
        .collect()
}

/// Triangle-window (50 ms) convolution of the onset envelope.
fn triangle_convolve(history: &VecDeque<f32>, sample_rate: u32) -> f32 {
    if history.is_empty() {
        return 0.0;
    }
    let half_width = ((sample_rate as f32 * 0.05) as usize).max(1).min(history.len());
    let recent: Vec<f32> = history.iter().rev().take(half_width).copied().collect();
    let mut acc = 0.0;
    let mut weight_sum = 0.0;
    for (i, v) in recent.iter().enumerate() {
        let w = 1.0 - (i as f32 / half_width as f32);
        acc += v * w;
        weight_sum += w;
    }
    if weight_sum > 0.0 {
        (acc / weight_sum).max(0.0)
    } else {
        0.0
    }
}

/// Autocorrelation-peak / RMS proxy, standing in for a spectral-centroid
/// comparison (harmonic ratio ~ autocorrelation peak / spectral
/// centroid proxy).
fn harmonic_ratio_autocorrelation(mono: &[f32]) -> f32 {
    if mono.len() < 2 {
        return 0.0;
    }
    let rms = (mono.iter().map(|s| s * s).sum::<f32>() / mono.len() as f32).sqrt();
    if rms < 1.0e-6 {
        return 0.0;
    }
    let max_lag = (mono.len() / 2).min(1024);
    let mut best = 0.0_f32;
    for lag in 20..max_lag.max(21) {
        let mut acc = 0.0;
        for i in 0..mono.len() - lag {
            acc += mono[i] * mono[i + lag];
        }
        acc /= (mono.len() - lag) as f32;
        if acc > best {
            best = acc;
        }
    }
    (best / (rms * rms)).clamp(0.0, 1.0)
}

fn rhythm_confidence(ioi_history: &VecDeque<f64>) -> f32 {
    if ioi_history.len() < 2 {
        return 0.0;
    }
    let mean = ioi_history.iter().sum::<f64>() / ioi_history.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let var = ioi_history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / ioi_history.len() as f64;
    let cv = var.sqrt() / mean;
    (1.0 - cv as f32).clamp(0.0, 1.0)
}

fn stereo_balance(left: &[f32], right: &[f32]) -> f32 {
    let l: f32 = left.iter().map(|s| s.abs()).sum();
    let r: f32 = right.iter().map(|s| s.abs()).sum();
    ((r - l) / (r + l + 1.0e-6)).clamp(-1.0, 1.0)
}

fn correlation(left: &[f32], right: &[f32]) -> f32 {
    let n = left.len().min(right.len());
    if n == 0 {
        return 1.0;
    }
    let mean_l = left[..n].iter().sum::<f32>() / n as f32;
    let mean_r = right[..n].iter().sum::<f32>() / n as f32;
    let mut cov = 0.0;
    let mut var_l = 0.0;
    let mut var_r = 0.0;
    for i in 0..n {
        let dl = left[i] - mean_l;
        let dr = right[i] - mean_r;
        cov += dl * dr;
        var_l += dl * dl;
        var_r += dr * dr;
    }
    let denom = (var_l.sqrt() * var_r.sqrt()).max(1.0e-6);
    (cov / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_block(freq: f32, sample_rate: u32, size: usize, phase: f32) -> Vec<f32> {
        (0..size)
            .map(|i| (2.0 * std::f32::consts::PI * freq * (i as f32 / sample_rate as f32) + phase).sin())
            .collect()
    }

    #[test]
    fn rejects_non_power_of_two_fft_size() {
        let mut config = AudioConfig::default();
        config.fft_size = 1000;
        assert!(AudioAnalyzer::new(config).is_err());
    }

    #[test]
    fn silence_produces_zero_bands() {
        let config = AudioConfig::default();
        let mut analyzer = AudioAnalyzer::new(config.clone()).unwrap();
        let silence = vec![0.0_f32; config.fft_size];
        let frame = analyzer.process(&silence, &silence, 0.0, &AudioFrame::default());
        assert_eq!(frame.bass, 0.0);
        assert_eq!(frame.overall, 0.0);
    }

    #[test]
    fn bass_tone_registers_in_bass_band() {
        let config = AudioConfig::default();
        let mut analyzer = AudioAnalyzer::new(config.clone()).unwrap();
        let tone = sine_block(100.0, config.sample_rate, config.fft_size, 0.0);
        let frame = analyzer.process(&tone, &tone, 0.0, &AudioFrame::default());
        assert!(frame.bass > frame.treble);
    }

    #[test]
    fn identical_channels_have_zero_width_and_balance() {
        let config = AudioConfig::default();
        let mut analyzer = AudioAnalyzer::new(config.clone()).unwrap();
        let tone = sine_block(440.0, config.sample_rate, config.fft_size, 0.0);
        let frame = analyzer.process(&tone, &tone, 0.0, &AudioFrame::default());
        assert!(frame.stereo_balance.abs() < 1.0e-3);
        assert!(frame.stereo_width.abs() < 1.0e-3);
    }

    #[test]
    fn spectral_flux_is_non_negative() {
        let config = AudioConfig::default();
        let mut analyzer = AudioAnalyzer::new(config.clone()).unwrap();
        let tone_a = sine_block(200.0, config.sample_rate, config.fft_size, 0.0);
        let tone_b = sine_block(2000.0, config.sample_rate, config.fft_size, 0.0);
        let _ = analyzer.process(&tone_a, &tone_a, 0.0, &AudioFrame::default());
        let frame = analyzer.process(&tone_b, &tone_b, 1.0, &AudioFrame::default());
        assert!(frame.spectral_flux >= 0.0);
    }

    #[test]
    fn tempo_stays_within_clamped_range() {
        let config = AudioConfig::default();
        let mut analyzer = AudioAnalyzer::new(config.clone()).unwrap();
        let mut frame = AudioFrame::default();
        for i in 0..20 {
            let tone = sine_block(80.0, config.sample_rate, config.fft_size, i as f32);
            frame = analyzer.process(&tone, &tone, i as f64 * 0.3, &frame);
        }
        assert!(frame.tempo >= 40.0 && frame.tempo <= 200.0);
    }
}

//! Musical structure classifier.

use std::collections::VecDeque;

const ENERGY_HISTORY_SECS: f64 = 10.0;
const TENSION_HISTORY_LEN: usize = 100;
const MIN_SECTION_SECS: f64 = 4.0;
const MAX_SECTION_SECS: f64 = 32.0;
const ENERGY_DELTA_THRESHOLD: f32 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Intro,
    Verse,
    Chorus,
    Bridge,
    Breakdown,
    BuildUp,
    Drop,
    Outro,
    Unknown,
}

impl Section {
    /// Forced successor after `MAX_SECTION_SECS`.
    fn forced_successor(self) -> Section {
        match self {
            Section::Intro => Section::Verse,
            Section::Verse => Section::Chorus,
            Section::Chorus => Section::Verse,
            Section::Bridge => Section::Chorus,
            Section::BuildUp => Section::Drop,
            Section::Drop => Section::Verse,
            Section::Breakdown => Section::BuildUp,
            Section::Outro | Section::Unknown => Section::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionState {
    pub current: Section,
    pub start_time: f64,
    pub duration: f64,
    pub average_energy: f32,
    pub confidence: f32,
    pub building: bool,
    pub releasing: bool,
}

impl Default for SectionState {
    fn default() -> Self {
        Self {
            current: Section::Intro,
            start_time: 0.0,
            duration: 0.0,
            average_energy: 0.0,
            confidence: 0.5,
            building: false,
            releasing: false,
        }
    }
}

pub struct StructureAnalyzer {
    energy_history: VecDeque<(f64, f32)>,
    tension_history: VecDeque<f32>,
    state: SectionState,
}

impl Default for StructureAnalyzer {
    fn default() -> Self {
        Self {
            energy_history: VecDeque::new(),
            tension_history: VecDeque::with_capacity(TENSION_HISTORY_LEN),
            state: SectionState::default(),
        }
    }
}

impl StructureAnalyzer {
    pub fn state(&self) -> &SectionState {
        &self.state
    }

    /// Feed one tick of audio features. `spectral_flux`/`beat_intensity`/
    /// `harmonic_ratio` come from the current `AudioFrame`.
    pub fn update(&mut self, time: f64, energy: f32, spectral_flux: f32, beat_intensity: f32, harmonic_ratio: f32) {
        self.energy_history.push_back((time, energy));
        while let Some((t, _)) = self.energy_history.front() {
            if time - *t > ENERGY_HISTORY_SECS {
                self.energy_history.pop_front();
            } else {
                break;
            }
        }

        let tension = 0.4 * spectral_flux + 0.3 * beat_intensity + 0.3 * (1.0 - harmonic_ratio);
        if self.tension_history.len() >= TENSION_HISTORY_LEN {
            self.tension_history.pop_front();
        }
        self.tension_history.push_back(tension);

        self.state.duration = time - self.state.start_time;

        let half = self.energy_history.len() / 2;
        let energy_delta = if half > 0 {
            let recent: f32 = self.energy_history.iter().skip(half).map(|(_, e)| *e).sum::<f32>()
                / (self.energy_history.len() - half) as f32;
            let earlier: f32 = self.energy_history.iter().take(half).map(|(_, e)| *e).sum::<f32>() / half as f32;
            recent - earlier
        } else {
            0.0
        };

        self.state.average_energy = self.energy_history.iter().map(|(_, e)| *e).sum::<f32>()
            / self.energy_history.len().max(1) as f32;

        let tension_trend = tension_trend(&self.tension_history);
        self.state.building = tension_trend > 0.02;
        self.state.releasing = tension_trend < -0.02;

        if self.state.duration >= MAX_SECTION_SECS {
            self.transition(time, self.state.current.forced_successor(), 0.5);
            return;
        }

        if self.state.duration >= MIN_SECTION_SECS && energy_delta.abs() > ENERGY_DELTA_THRESHOLD {
            let next = classify(energy_delta, spectral_flux);
            self.transition(time, next, (energy_delta.abs()).min(1.0));
        }
    }

    fn transition(&mut self, time: f64, next: Section, confidence: f32) {
        self.state.current = next;
        self.state.start_time = time;
        self.state.duration = 0.0;
        self.state.confidence = confidence;
    }
}

fn tension_trend(history: &VecDeque<f32>) -> f32 {
    if history.len() < 2 {
        return 0.0;
    }
    let half = history.len() / 2;
    let recent: f32 = history.iter().skip(half).sum::<f32>() / (history.len() - half) as f32;
    let earlier: f32 = history.iter().take(half).sum::<f32>() / half as f32;
    recent - earlier
}

/// Energy-delta/spectral-flux classification table.
fn classify(energy_delta: f32, spectral_flux: f32) -> Section {
    if energy_delta > 0.3 && spectral_flux > 0.5 {
        Section::Drop
    } else if energy_delta > 0.15 {
        Section::Chorus
    } else if energy_delta < -0.3 {
        Section::Breakdown
    } else if energy_delta < -0.15 {
        Section::Bridge
    } else if spectral_flux > 0.3 {
        Section::BuildUp
    } else {
        Section::Verse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_section_before_minimum_duration() {
        let mut analyzer = StructureAnalyzer::default();
        analyzer.update(0.0, 0.2, 0.1, 0.0, 0.5);
        analyzer.update(1.0, 0.9, 0.6, 0.8, 0.2);
        assert_eq!(analyzer.state().current, Section::Intro);
    }

    #[test]
    fn large_energy_jump_after_min_duration_transitions() {
        let mut analyzer = StructureAnalyzer::default();
        for t in 0..5 {
            analyzer.update(t as f64, 0.1, 0.1, 0.0, 0.5);
        }
        analyzer.update(5.0, 0.9, 0.6, 0.9, 0.2);
        assert_ne!(analyzer.state().current, Section::Intro);
    }

    #[test]
    fn forced_transition_after_max_duration() {
        let mut analyzer = StructureAnalyzer::default();
        analyzer.update(0.0, 0.2, 0.1, 0.0, 0.5);
        analyzer.update(33.0, 0.2, 0.1, 0.0, 0.5);
        assert_eq!(analyzer.state().current, Section::Verse);
    }
}

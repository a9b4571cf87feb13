//! Adaptive performance controller.

use serde::Serialize;

use crate::config::PerformanceConfig;

/// Quality tier the pipeline scales particle count and solver substeps by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    fn step_down(self) -> Self {
        match self {
            Tier::High => Tier::Medium,
            Tier::Medium => Tier::Low,
            Tier::Low => Tier::Low,
        }
    }
}

/// FPS-tiered state machine with consecutive-frame hysteresis and an
/// optional manual pin.
pub struct PerformanceController {
    config: PerformanceConfig,
    tier: Tier,
    below_count: u32,
    above_count: u32,
    manual_override: Option<Tier>,
    override_frames_remaining: u32,
}

impl PerformanceController {
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            config,
            tier: Tier::High,
            below_count: 0,
            above_count: 0,
            manual_override: None,
            override_frames_remaining: 0,
        }
    }

    pub fn tier(&self) -> Tier {
        self.manual_override.unwrap_or(self.tier)
    }

    pub fn set_override(&mut self, tier: Tier) {
        self.manual_override = Some(tier);
        self.override_frames_remaining = self.config.manual_override_frames;
    }

    pub fn clear_override(&mut self) {
        self.manual_override = None;
        self.override_frames_remaining = 0;
    }

    /// Feed one frame's instantaneous FPS. A manual override counts down and
    /// expires back to automatic control once its frame budget elapses.
    pub fn observe_fps(&mut self, fps: f32) {
        if self.manual_override.is_some() {
            self.override_frames_remaining = self.override_frames_remaining.saturating_sub(1);
            if self.override_frames_remaining == 0 {
                self.manual_override = None;
            }
            return;
        }

        match self.tier {
            Tier::High => {
                if fps < self.config.high_to_medium_fps {
                    self.below_count += 1;
                    if self.below_count >= self.config.high_to_medium_frames {
                        self.tier = Tier::Medium;
                        self.below_count = 0;
                    }
                } else {
                    self.below_count = 0;
                }
            }
            Tier::Medium => {
                if fps < self.config.medium_to_low_fps {
                    self.below_count += 1;
                    if self.below_count >= self.config.medium_to_low_frames {
                        self.tier = self.tier.step_down();
                        self.below_count = 0;
                    }
                } else if fps >= self.config.recover_to_high_fps {
                    self.above_count += 1;
                    if self.above_count >= self.config.recover_to_high_frames {
                        self.tier = Tier::High;
                        self.above_count = 0;
                    }
                } else {
                    self.below_count = 0;
                    self.above_count = 0;
                }
            }
            Tier::Low => {
                // Jumps straight to High, not a step through Medium.
                if fps >= self.config.recover_to_high_fps {
                    self.above_count += 1;
                    if self.above_count >= self.config.recover_to_high_frames {
                        self.tier = Tier::High;
                        self.above_count = 0;
                    }
                } else {
                    self.above_count = 0;
                }
            }
        }
    }

    pub fn particle_scale(&self) -> f32 {
        match self.tier() {
            Tier::High => 1.0,
            Tier::Medium => 0.5,
            Tier::Low => 0.25,
        }
    }

    pub fn substeps(&self) -> u32 {
        match self.tier() {
            Tier::High => 1,
            Tier::Medium => 1,
            Tier::Low => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sustained_low_fps_demotes_after_threshold_frames() {
        let config = PerformanceConfig::default();
        let frames = config.high_to_medium_frames;
        let mut controller = PerformanceController::new(config);
        for _ in 0..frames - 1 {
            controller.observe_fps(10.0);
            assert_eq!(controller.tier(), Tier::High);
        }
        controller.observe_fps(10.0);
        assert_eq!(controller.tier(), Tier::Medium);
    }

    #[test]
    fn brief_dip_does_not_demote() {
        let mut controller = PerformanceController::new(PerformanceConfig::default());
        for _ in 0..5 {
            controller.observe_fps(10.0);
        }
        controller.observe_fps(120.0);
        assert_eq!(controller.tier(), Tier::High);
    }

    #[test]
    fn manual_override_expires_after_its_frame_budget() {
        let mut config = PerformanceConfig::default();
        config.manual_override_frames = 3;
        let mut controller = PerformanceController::new(config);
        controller.set_override(Tier::Low);
        assert_eq!(controller.tier(), Tier::Low);
        controller.observe_fps(120.0);
        controller.observe_fps(120.0);
        controller.observe_fps(120.0);
        assert_eq!(controller.tier(), Tier::High);
    }

    #[test]
    fn low_tier_recovers_directly_to_high() {
        let mut config = PerformanceConfig::default();
        config.high_to_medium_frames = 1;
        config.medium_to_low_frames = 1;
        config.recover_to_high_frames = 2;
        let mut controller = PerformanceController::new(config);
        controller.observe_fps(1.0);
        assert_eq!(controller.tier(), Tier::Medium);
        controller.observe_fps(1.0);
        assert_eq!(controller.tier(), Tier::Low);
        controller.observe_fps(120.0);
        controller.observe_fps(120.0);
        assert_eq!(controller.tier(), Tier::High);
    }

    #[test]
    fn sustained_stall_cascades_through_each_tier_exactly_once() {
        // FPS=25 sustained for 30 frames must
        // demote high -> medium -> low with exactly one transition per
        // step, never bouncing back up mid-cascade.
        let mut config = PerformanceConfig::default();
        config.high_to_medium_frames = 10;
        config.medium_to_low_frames = 10;
        let mut controller = PerformanceController::new(config);

        let mut transitions = Vec::new();
        let mut last_tier = controller.tier();
        for _ in 0..30 {
            controller.observe_fps(25.0);
            let tier = controller.tier();
            if tier != last_tier {
                transitions.push(tier);
                last_tier = tier;
            }
        }
        assert_eq!(transitions, vec![Tier::Medium, Tier::Low]);
    }

    #[test]
    fn recovery_requires_sustained_high_fps() {
        let mut config = PerformanceConfig::default();
        config.high_to_medium_frames = 1;
        config.recover_to_high_frames = 3;
        let mut controller = PerformanceController::new(config);
        controller.observe_fps(1.0);
        assert_eq!(controller.tier(), Tier::Medium);
        controller.observe_fps(120.0);
        controller.observe_fps(120.0);
        assert_eq!(controller.tier(), Tier::Medium);
        controller.observe_fps(120.0);
        assert_eq!(controller.tier(), Tier::High);
    }
}

//! Activation gate: letters reach the word engine only after the user
//! deliberately repeats the activation gesture.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::tuning::ActivationTuning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionState {
    Dormant,
    Arming,
    Active,
}

impl std::fmt::Display for RecognitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionState::Dormant => write!(f, "dormant"),
            RecognitionState::Arming => write!(f, "arming"),
            RecognitionState::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivationMachine {
    tuning: ActivationTuning,
    count: u32,
    active: bool,
}

impl ActivationMachine {
    pub fn new(tuning: ActivationTuning) -> Self {
        let active = tuning.start_active;
        Self { tuning, count: 0, active }
    }

    /// State derived from the arm counter: zero is dormant, anything short of
    /// the threshold is arming.
    pub fn state(&self) -> RecognitionState {
        if self.active {
            RecognitionState::Active
        } else if self.count > 0 {
            RecognitionState::Arming
        } else {
            RecognitionState::Dormant
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed one confident detection. Returns true when this detection
    /// completed activation.
    pub fn observe(&mut self, label: char) -> bool {
        if self.active {
            return false;
        }

        if label.eq_ignore_ascii_case(&self.tuning.letter) {
            self.count += 1;
            debug!("Activation progress {}/{}", self.count, self.tuning.required_count);
            if self.count >= self.tuning.required_count {
                self.active = true;
                info!("✅ Recognition activated");
                return true;
            }
        } else if self.count > 0 {
            debug!("Activation interrupted by '{}'", label);
            self.count = 0;
        }
        false
    }

    /// Back to the initial state with counters cleared.
    pub fn reset(&mut self) {
        self.count = 0;
        self.active = self.tuning.start_active;
    }

    pub fn progress(&self) -> (u32, u32) {
        (self.count, self.tuning.required_count)
    }

    pub fn letter(&self) -> char {
        self.tuning.letter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ActivationMachine {
        ActivationMachine::new(ActivationTuning::default())
    }

    #[test]
    fn test_threshold_detections_activate() {
        let mut m = machine();
        assert_eq!(m.state(), RecognitionState::Dormant);
        assert!(!m.observe('A'));
        assert_eq!(m.state(), RecognitionState::Arming);
        assert!(!m.observe('A'));
        assert!(m.observe('A'));
        assert_eq!(m.state(), RecognitionState::Active);
    }

    #[test]
    fn test_interruption_resets_progress() {
        let mut m = machine();
        m.observe('A');
        m.observe('A');
        m.observe('B');
        assert_eq!(m.progress(), (0, 3));
        assert_eq!(m.state(), RecognitionState::Dormant);
    }

    #[test]
    fn test_active_ignores_further_letters() {
        let mut m = machine();
        for _ in 0..3 {
            m.observe('A');
        }
        assert!(!m.observe('Z'));
        assert!(!m.observe('A'));
        assert!(m.is_active());
    }

    #[test]
    fn test_reset_returns_to_dormant() {
        let mut m = machine();
        for _ in 0..3 {
            m.observe('A');
        }
        m.reset();
        assert_eq!(m.state(), RecognitionState::Dormant);
        assert_eq!(m.progress(), (0, 3));
    }

    #[test]
    fn test_start_active_skips_ritual() {
        let m = ActivationMachine::new(ActivationTuning { start_active: true, ..Default::default() });
        assert!(m.is_active());
    }
}

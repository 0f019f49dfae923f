//! Confidence-weighted sliding window over per-frame predictions.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::tuning::StabilizerTuning;

/// Window outcome after a push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StabilizedPrediction {
    pub label: Option<char>,
    /// Winner weight over total weight in the window.
    pub confidence: f32,
    pub is_stable: bool,
    /// True on the single push that first made the current run stable.
    #[serde(skip)]
    pub accepted: bool,
}

/// Turns noisy per-frame labels into one accept event per held gesture.
///
/// The run counter tracks how many consecutive pushes the same label has won
/// the window. Once the run is long enough and the winner carries enough of
/// the window's weight, the stabilizer fires once and then stays latched until
/// a different label takes over (or the window is cleared).
#[derive(Debug, Clone)]
pub struct Stabilizer {
    tuning: StabilizerTuning,
    window: VecDeque<(char, f32)>,
    run_label: Option<char>,
    run_length: usize,
    fired: bool, // Accept already emitted for this run
}

impl Stabilizer {
    pub fn new(tuning: StabilizerTuning) -> Self {
        let window = VecDeque::with_capacity(tuning.window_size);
        Self { tuning, window, run_label: None, run_length: 0, fired: false }
    }

    /// Add one frame's prediction and re-evaluate the window.
    pub fn push(&mut self, label: char, confidence: f32) -> StabilizedPrediction {
        if self.window.len() >= self.tuning.window_size {
            self.window.pop_front();
        }
        self.window.push_back((label, confidence));

        let Some((winner, aggregated)) = self.winner() else {
            return StabilizedPrediction::default();
        };

        if self.run_label == Some(winner) {
            self.run_length += 1;
        } else {
            self.run_label = Some(winner);
            self.run_length = 1;
            self.fired = false;
        }

        let is_stable = self.is_stable(aggregated);
        let accepted = is_stable && !self.fired;
        if accepted {
            self.fired = true;
        }

        StabilizedPrediction { label: Some(winner), confidence: aggregated, is_stable, accepted }
    }

    /// Current window winner without pushing anything.
    pub fn current_stable(&self) -> StabilizedPrediction {
        match self.winner() {
            Some((label, confidence)) => StabilizedPrediction {
                label: Some(label),
                confidence,
                is_stable: self.run_label == Some(label) && self.is_stable(confidence),
                accepted: false,
            },
            None => StabilizedPrediction::default(),
        }
    }

    /// Treat the current run as already accepted, so holding the same gesture
    /// emits nothing until another label takes over.
    pub fn latch(&mut self) {
        if self.run_label.is_some() {
            self.fired = true;
        }
    }

    /// Empty the window and run counters.
    pub fn clear(&mut self) {
        self.window.clear();
        self.run_label = None;
        self.run_length = 0;
        self.fired = false;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    fn is_stable(&self, aggregated: f32) -> bool {
        self.run_length >= self.tuning.min_run && aggregated >= self.tuning.acceptance_threshold
    }

    /// Label with the largest summed vote weight. Ties go to the label seen
    /// most recently.
    fn winner(&self) -> Option<(char, f32)> {
        let mut votes: Vec<(char, f32, usize)> = Vec::new();
        let mut total = 0.0f32;

        for (pos, &(label, confidence)) in self.window.iter().enumerate() {
            let weight = confidence.max(0.0).powf(self.tuning.confidence_exponent);
            total += weight;
            match votes.iter_mut().find(|v| v.0 == label) {
                Some(vote) => {
                    vote.1 += weight;
                    vote.2 = pos;
                }
                None => votes.push((label, weight, pos)),
            }
        }

        if total <= 0.0 {
            return None;
        }

        votes
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then(a.2.cmp(&b.2)))
            .map(|(label, weight, _)| (label, weight / total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stabilizer() -> Stabilizer {
        Stabilizer::new(StabilizerTuning::default())
    }

    #[test]
    fn test_held_gesture_accepts_once() {
        let mut s = stabilizer();
        let events: Vec<bool> = (0..12).map(|_| s.push('H', 0.9).accepted).collect();
        assert_eq!(events.iter().filter(|&&e| e).count(), 1);
        assert!(events[3], "accept should fire on the fourth push");
        assert!(s.current_stable().is_stable);
    }

    #[test]
    fn test_alternating_labels_never_stabilize() {
        let mut s = stabilizer();
        for i in 0..30 {
            let label = if i % 2 == 0 { 'M' } else { 'N' };
            let out = s.push(label, 0.9);
            assert!(!out.is_stable && !out.accepted, "stabilized at push {}", i);
        }
    }

    #[test]
    fn test_new_winner_starts_new_run() {
        let mut s = stabilizer();
        for _ in 0..5 {
            s.push('A', 0.9);
        }
        let mut accepted = Vec::new();
        for _ in 0..10 {
            let out = s.push('B', 0.9);
            if out.accepted {
                accepted.push(out.label);
            }
        }
        assert_eq!(accepted, vec![Some('B')]);
    }

    #[test]
    fn test_weak_majority_is_not_stable() {
        let mut s = stabilizer();
        for label in ['C', 'D', 'E', 'C', 'F', 'G', 'C'] {
            s.push(label, 0.9);
        }
        let current = s.current_stable();
        assert_eq!(current.label, Some('C'));
        assert!(current.confidence < 0.5);
        assert!(!current.is_stable);
    }

    #[test]
    fn test_aggregated_confidence_is_weight_share() {
        let mut s = stabilizer();
        s.push('A', 1.0);
        let out = s.push('B', 1.0);
        // equal weights, most recent wins the tie
        assert_eq!(out.label, Some('B'));
        assert!((out.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_latched_run_stays_silent() {
        let mut s = stabilizer();
        s.push('A', 0.9);
        s.latch();
        assert!((0..8).all(|_| !s.push('A', 0.9).accepted));
    }

    #[test]
    fn test_clear_empties_window() {
        let mut s = stabilizer();
        for _ in 0..6 {
            s.push('L', 0.8);
        }
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.current_stable(), StabilizedPrediction::default());

        let fired = (0..4).filter(|_| s.push('L', 0.8).accepted).count();
        assert_eq!(fired, 1);
    }
}

//! Hand localization from landmark sets.
//!
//! The landmark model itself is external: a [`LandmarkDetector`] runs it and
//! hands back normalized points, or the client supplies points it computed
//! alongside the frame. This module turns those points into the crop the
//! classifier sees.

use std::time::Instant;

use image::RgbImage;
use tracing::debug;

use super::frame::{BoundingBox, Landmark, crop};
use crate::config::tuning::LocalizerTuning;

/// Landmarks of one hand, in detector order.
pub type HandLandmarks = Vec<Landmark>;

/// Source of hand landmarks for a frame.
///
/// Implementations wrap an external hand-landmark model. They should be
/// configured for recall (low detection and tracking thresholds) and report
/// at most a few hands; the localizer keeps the two largest.
pub trait LandmarkDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, frame: &RgbImage) -> anyhow::Result<Vec<HandLandmarks>>;
}

/// Detector used when no landmark model is available. Every frame is
/// classified whole.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLandmarks;

impl LandmarkDetector for NoLandmarks {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&self, _frame: &RgbImage) -> anyhow::Result<Vec<HandLandmarks>> {
        Ok(Vec::new())
    }
}

/// Localization outcome for one frame.
#[derive(Debug, Clone, Default)]
pub struct HandDetection {
    /// Region to classify; `None` means classify the whole frame.
    pub crop: Option<RgbImage>,
    pub bbox: Option<BoundingBox>,
    pub hands_present: bool,
    pub hand_count: usize,
    pub landmarks: Vec<HandLandmarks>,
}

/// Turns landmark sets into a classifier crop and tracks hand presence.
#[derive(Debug, Clone)]
pub struct HandLocalizer {
    tuning: LocalizerTuning,
    last_hand_seen: Option<Instant>, // Last frame with a usable hand
    no_hand_frames: u32,             // Consecutive frames without one
}

impl HandLocalizer {
    pub fn new(tuning: LocalizerTuning) -> Self {
        Self { tuning, last_hand_seen: None, no_hand_frames: 0 }
    }

    /// Localize hands in `frame` from the landmark sets found for it.
    pub fn locate(&mut self, frame: &RgbImage, hands: Vec<HandLandmarks>) -> HandDetection {
        let (w, h) = frame.dimensions();

        // (box, landmark-extent area, landmarks) for every hand with a usable box
        let mut candidates: Vec<(BoundingBox, u64, HandLandmarks)> = hands
            .into_iter()
            .filter_map(|lm| self.hand_box(&lm, w, h).map(|(bbox, area)| (bbox, area, lm)))
            .collect();

        if candidates.is_empty() {
            self.no_hand_frames = self.no_hand_frames.saturating_add(1);
            return HandDetection::default();
        }

        if candidates.len() > self.tuning.max_hands {
            candidates.sort_by(|a, b| b.1.cmp(&a.1));
            candidates.truncate(self.tuning.max_hands);
        }

        self.last_hand_seen = Some(Instant::now());
        self.no_hand_frames = 0;

        let boxes: Vec<BoundingBox> = candidates.iter().map(|(bbox, _, _)| *bbox).collect();
        let bbox = if boxes.len() == 1 { boxes[0] } else { self.union_box(&boxes, w, h) };
        let crop = crop(frame, &bbox);

        debug!("Hands: {} -> bbox {:?}", boxes.len(), bbox);

        HandDetection {
            crop,
            bbox: Some(bbox),
            hands_present: true,
            hand_count: candidates.len(),
            landmarks: candidates.into_iter().map(|(_, _, lm)| lm).collect(),
        }
    }

    /// Padded box around one hand's landmarks, with the extent area used for
    /// ranking. `None` when the box is degenerate after clamping.
    ///
    /// Non-finite points are dropped and the rest are clamped into the frame,
    /// so client-supplied landmarks can't push the box arithmetic out of range.
    pub fn hand_box(&self, landmarks: &[Landmark], frame_w: u32, frame_h: u32) -> Option<(BoundingBox, u64)> {
        let points: Vec<(i64, i64)> = landmarks
            .iter()
            .filter(|l| l.x.is_finite() && l.y.is_finite())
            .map(|l| ((l.x.clamp(0.0, 1.0) * frame_w as f32) as i64, (l.y.clamp(0.0, 1.0) * frame_h as f32) as i64))
            .collect();

        let min_x = points.iter().map(|p| p.0).min()?;
        let max_x = points.iter().map(|p| p.0).max()?;
        let min_y = points.iter().map(|p| p.1).min()?;
        let max_y = points.iter().map(|p| p.1).max()?;

        let hand_w = max_x - min_x;
        let hand_h = max_y - min_y;
        let area = (hand_w * hand_h).max(0) as u64;

        let t = &self.tuning;
        let ratio = if area < t.small_hand_area as u64 { t.small_pad_ratio } else { t.pad_ratio };
        let min_size = t.min_hand_size as i64;
        let mut pad_x = ((hand_w as f32 * ratio) as i64).max(t.min_pad as i64);
        let mut pad_y = ((hand_h as f32 * ratio) as i64).max(t.min_pad as i64);
        if hand_w < min_size {
            pad_x = pad_x.max((min_size - hand_w) / 2);
        }
        if hand_h < min_size {
            pad_y = pad_y.max((min_size - hand_h) / 2);
        }

        let bbox = clamp_box(min_x - pad_x, min_y - pad_y, max_x + pad_x, max_y + pad_y, frame_w, frame_h);
        let min_box = t.min_box_size;
        if bbox.x2 > bbox.x1 + min_box && bbox.y2 > bbox.y1 + min_box { Some((bbox, area)) } else { None }
    }

    /// Union of hand boxes, padded by a term that shrinks as the hands get
    /// closer together.
    pub fn union_box(&self, boxes: &[BoundingBox], frame_w: u32, frame_h: u32) -> BoundingBox {
        let min_x = boxes.iter().map(|b| b.x1).min().unwrap_or(0) as i64;
        let min_y = boxes.iter().map(|b| b.y1).min().unwrap_or(0) as i64;
        let max_x = boxes.iter().map(|b| b.x2).max().unwrap_or(0) as i64;
        let max_y = boxes.iter().map(|b| b.y2).max().unwrap_or(0) as i64;

        let span = max_x - min_x;
        let pad = (self.tuning.max_union_pad as i64).min(span / self.tuning.union_pad_divisor as i64);

        clamp_box(min_x - pad, min_y - pad, max_x + pad, max_y + pad, frame_w, frame_h)
    }

    /// Consecutive frames without a usable hand.
    pub fn no_hand_frames(&self) -> u32 {
        self.no_hand_frames
    }

    pub fn last_hand_seen(&self) -> Option<Instant> {
        self.last_hand_seen
    }

    /// True once the hand-less streak is long enough to warn the user.
    pub fn should_warn(&self) -> bool {
        self.no_hand_frames > self.tuning.no_hand_warning_frames
    }

    pub fn reset(&mut self) {
        self.last_hand_seen = None;
        self.no_hand_frames = 0;
    }
}

fn clamp_box(x1: i64, y1: i64, x2: i64, y2: i64, frame_w: u32, frame_h: u32) -> BoundingBox {
    BoundingBox {
        x1: x1.clamp(0, frame_w as i64) as u32,
        y1: y1.clamp(0, frame_h as i64) as u32,
        x2: x2.clamp(0, frame_w as i64) as u32,
        y2: y2.clamp(0, frame_h as i64) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand(points: &[(f32, f32)]) -> HandLandmarks {
        points.iter().map(|&(x, y)| Landmark::new(x, y, 0.0)).collect()
    }

    fn localizer() -> HandLocalizer {
        HandLocalizer::new(LocalizerTuning::default())
    }

    #[test]
    fn test_single_small_hand_gets_minimum_padding() {
        let frame = RgbImage::new(640, 480);
        let mut loc = localizer();
        let det = loc.locate(&frame, vec![hand(&[(0.5, 0.5), (0.53125, 0.5625)])]);
        assert!(det.hands_present);
        assert_eq!(det.hand_count, 1);
        assert_eq!(det.bbox, Some(BoundingBox { x1: 280, y1: 200, x2: 380, y2: 310 }));
        assert_eq!(det.crop.unwrap().dimensions(), (100, 110));
    }

    #[test]
    fn test_two_hands_union_covers_both_padded_boxes() {
        let frame = RgbImage::new(640, 480);
        let left = hand(&[(0.125, 0.25), (0.25, 0.5)]);
        let right = hand(&[(0.75, 0.5), (0.875, 0.75)]);

        let loc = localizer();
        let (left_box, _) = loc.hand_box(&left, 640, 480).unwrap();
        let (right_box, _) = loc.hand_box(&right, 640, 480).unwrap();
        assert_eq!(left_box, BoundingBox { x1: 40, y1: 80, x2: 200, y2: 280 });
        assert_eq!(right_box, BoundingBox { x1: 440, y1: 200, x2: 600, y2: 400 });

        let mut loc = localizer();
        let det = loc.locate(&frame, vec![left, right]);
        let union = det.bbox.unwrap();
        // span 560 -> pad min(30, 56) = 30
        assert_eq!(union, BoundingBox { x1: 10, y1: 50, x2: 630, y2: 430 });
        assert!(union.contains(&left_box) && union.contains(&right_box));
        assert_eq!(det.hand_count, 2);
    }

    #[test]
    fn test_adjacent_hands_get_smaller_union_padding() {
        let loc = localizer();
        let a = BoundingBox { x1: 100, y1: 100, x2: 150, y2: 200 };
        let b = BoundingBox { x1: 150, y1: 100, x2: 200, y2: 200 };
        // span 100 -> pad 10
        assert_eq!(loc.union_box(&[a, b], 640, 480), BoundingBox { x1: 90, y1: 90, x2: 210, y2: 210 });
    }

    #[test]
    fn test_keeps_two_largest_hands() {
        let frame = RgbImage::new(640, 480);
        let tiny = hand(&[(0.5, 0.5), (0.5078125, 0.5078125)]);
        let big = hand(&[(0.0625, 0.0625), (0.3125, 0.4375)]);
        let medium = hand(&[(0.625, 0.5), (0.75, 0.6875)]);

        let mut loc = localizer();
        let det = loc.locate(&frame, vec![tiny, big.clone(), medium.clone()]);
        assert_eq!(det.hand_count, 2);
        assert_eq!(det.landmarks, vec![big, medium]);
    }

    #[test]
    fn test_degenerate_box_reports_no_hands() {
        let frame = RgbImage::new(15, 15);
        let mut loc = localizer();
        let det = loc.locate(&frame, vec![hand(&[(0.5, 0.5), (0.6, 0.6)])]);
        assert!(!det.hands_present);
        assert!(det.crop.is_none() && det.bbox.is_none());
        assert_eq!(loc.no_hand_frames(), 1);
    }

    #[test]
    fn test_out_of_range_landmarks_stay_inside_frame() {
        let frame = RgbImage::new(640, 480);
        let mut loc = localizer();
        let det = loc.locate(&frame, vec![hand(&[(-1e30, 0.5), (1e30, 0.6)])]);
        let bbox = det.bbox.unwrap();
        assert!(bbox.x2 <= 640 && bbox.y2 <= 480);
        assert_eq!((bbox.x1, bbox.x2), (0, 640));

        let det = loc.locate(&frame, vec![hand(&[(f32::NAN, 0.5), (f32::INFINITY, f32::NEG_INFINITY)])]);
        assert!(!det.hands_present);
        assert_eq!(loc.no_hand_frames(), 1);
    }

    #[test]
    fn test_no_hand_counter_resets_when_hand_returns() {
        let frame = RgbImage::new(640, 480);
        let mut loc = localizer();
        for _ in 0..31 {
            loc.locate(&frame, Vec::new());
        }
        assert!(loc.should_warn());
        loc.locate(&frame, vec![hand(&[(0.4, 0.4), (0.6, 0.6)])]);
        assert_eq!(loc.no_hand_frames(), 0);
        assert!(loc.last_hand_seen().is_some());
    }
}

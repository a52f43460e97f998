//! Observation Model - what the recognizer reports each capture cycle
//!
//! Provides:
//! - Screen regions (card bounding boxes) with value equality
//! - Card identities with a reserved face-down sentinel
//! - Detector observations and the region similarity test shared by
//!   the layout cache and the board memory

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rectangle region in source screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub fn center_x(&self) -> i32 {
        midpoint(self.x, self.width)
    }

    #[inline]
    pub fn center_y(&self) -> i32 {
        midpoint(self.y, self.height)
    }

    /// Ordering key used wherever a deterministic region order is needed:
    /// top-to-bottom, then left-to-right.
    #[inline]
    pub fn sort_key(&self) -> (i32, i32, i32, i32) {
        (self.y, self.x, self.width, self.height)
    }

    /// Two regions are similar when every one of |dx|, |dy|, |dw|, |dh| is
    /// within `tolerance` (inclusive).
    #[inline]
    pub fn is_similar(&self, other: &Rect, tolerance: i32) -> bool {
        let tolerance = tolerance.max(0) as u32;
        self.x.abs_diff(other.x) <= tolerance
            && self.y.abs_diff(other.y) <= tolerance
            && self.width.abs_diff(other.width) <= tolerance
            && self.height.abs_diff(other.height) <= tolerance
    }
}

/// `start + extent / 2`, saturated to the i32 range for garbage coordinates.
#[inline]
fn midpoint(start: i32, extent: i32) -> i32 {
    (start as i64 + extent as i64 / 2).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{} {}x{}]", self.x, self.y, self.width, self.height)
    }
}

/// Drop near-duplicate regions (first one wins), then sort by (y, x).
pub fn dedup_and_sort(regions: &[Rect], tolerance: i32) -> Vec<Rect> {
    let mut unique: Vec<Rect> = Vec::with_capacity(regions.len());
    for region in regions {
        if !unique.iter().any(|kept| kept.is_similar(region, tolerance)) {
            unique.push(*region);
        }
    }
    unique.sort_by_key(Rect::sort_key);
    unique
}

/// Printed face of a card, as labelled by the recognizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub i32);

impl CardId {
    /// Card back: the recognizer could not (or did not) read a face.
    pub const BACK: CardId = CardId(-1);

    #[inline]
    pub fn is_back(&self) -> bool {
        *self == Self::BACK
    }

    #[inline]
    pub fn is_known(&self) -> bool {
        !self.is_back()
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_back() {
            write!(f, "back")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// One card reported by the recognizer for a single capture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CardObservation {
    pub identity: CardId,
    pub face_up: bool,
    pub region: Rect,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl CardObservation {
    pub fn new(identity: CardId, face_up: bool, region: Rect, confidence: f32) -> Self {
        Self {
            identity,
            face_up,
            region,
            confidence,
        }
    }
}

/// Screen resolution a layout was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: i32,
    pub height: i32,
}

impl ScreenSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_operations() {
        let rect = Rect::new(10, 20, 100, 50);
        assert_eq!(rect.center_x(), 60);
        assert_eq!(rect.center_y(), 45);
    }

    #[test]
    fn test_extreme_coordinates_do_not_overflow() {
        let garbage = Rect::new(i32::MIN, i32::MAX, i32::MAX, i32::MIN);
        let real = Rect::new(100, 100, 50, 50);
        assert!(!garbage.is_similar(&real, 25));
        assert!(!real.is_similar(&garbage, i32::MAX));
        assert!(garbage.is_similar(&garbage, 0));

        assert_eq!(Rect::new(i32::MAX, 0, i32::MAX, 10).center_x(), i32::MAX);
        assert_eq!(Rect::new(0, i32::MIN, 10, i32::MIN).center_y(), i32::MIN);
    }

    #[test]
    fn test_similarity_is_closed_interval() {
        let base = Rect::new(100, 100, 80, 120);
        assert!(base.is_similar(&Rect::new(125, 100, 80, 120), 25));
        assert!(!base.is_similar(&Rect::new(126, 100, 80, 120), 25));
        assert!(base.is_similar(&Rect::new(100, 100, 80, 95), 25));
        assert!(!base.is_similar(&Rect::new(100, 100, 80, 94), 25));
    }

    #[test]
    fn test_dedup_keeps_first_and_sorts() {
        let regions = [
            Rect::new(300, 500, 80, 120),
            Rect::new(100, 100, 80, 120),
            Rect::new(105, 98, 82, 118), // near-duplicate of the previous one
            Rect::new(300, 100, 80, 120),
        ];

        let unique = dedup_and_sort(&regions, 20);
        assert_eq!(
            unique,
            vec![
                Rect::new(100, 100, 80, 120),
                Rect::new(300, 100, 80, 120),
                Rect::new(300, 500, 80, 120),
            ]
        );
    }

    #[test]
    fn test_card_id_sentinel() {
        assert!(CardId::BACK.is_back());
        assert!(CardId(0).is_known());
        assert_eq!(serde_json::to_string(&CardId(7)).unwrap(), "7");
    }

    #[test]
    fn test_observation_default_confidence() {
        let json = r#"{"identity":3,"face_up":true,"region":{"x":1,"y":2,"width":3,"height":4}}"#;
        let obs: CardObservation = serde_json::from_str(json).unwrap();
        assert_eq!(obs.identity, CardId(3));
        assert!((obs.confidence - 1.0).abs() < f32::EPSILON);
    }
}

//! Canonical detection findings.
//!
//! A `Finding` is created only by the normalizer and is immutable afterwards.
//! Each label is classified exactly once into a `LabelClass`, so downstream
//! code works on categories instead of string heuristics. Labels outside the
//! known vocabulary are kept verbatim as `LabelClass::Other`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracked protective equipment categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Equipment {
    Helmet,
    Vest,
    Gloves,
    Boots,
    Mask,
    Goggles,
}

impl Equipment {
    pub const ALL: [Equipment; 6] = [
        Equipment::Helmet,
        Equipment::Vest,
        Equipment::Gloves,
        Equipment::Boots,
        Equipment::Mask,
        Equipment::Goggles,
    ];

    /// Identifier used in logs and serialized evaluations.
    pub fn id(self) -> &'static str {
        match self {
            Equipment::Helmet => "helmet",
            Equipment::Vest => "vest",
            Equipment::Gloves => "gloves",
            Equipment::Boots => "boots",
            Equipment::Mask => "mask",
            Equipment::Goggles => "goggles",
        }
    }

    /// Operator-facing name.
    pub fn display_name(self) -> &'static str {
        match self {
            Equipment::Helmet => "Safety Helmet",
            Equipment::Vest => "Safety Vest",
            Equipment::Gloves => "Safety Gloves",
            Equipment::Boots => "Safety Boots",
            Equipment::Mask => "Face Mask",
            Equipment::Goggles => "Safety Goggles",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "helmet" | "hardhat" => Some(Equipment::Helmet),
            "vest" | "safetyvest" => Some(Equipment::Vest),
            "gloves" | "glove" => Some(Equipment::Gloves),
            "boots" | "boot" => Some(Equipment::Boots),
            "mask" | "facemask" => Some(Equipment::Mask),
            "goggles" | "glasses" => Some(Equipment::Goggles),
            _ => None,
        }
    }
}

impl fmt::Display for Equipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Classification of a finding label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelClass {
    /// Equipment expected but not worn ("NoHelmet", "no_vest").
    Absent(Equipment),
    /// Equipment detected ("Helmet", "Vest").
    Present(Equipment),
    /// Explicit all-clear marker ("GoodToGo").
    AllClear,
    /// The person the equipment belongs to.
    Subject,
    /// Anything outside the known vocabulary.
    Other,
}

impl LabelClass {
    /// Classify a raw service label.
    ///
    /// Matching ignores case, whitespace, `-` and `_`, so "NoHelmet",
    /// "no-helmet" and "NO_HELMET" all map to `Absent(Helmet)`.
    pub fn classify(label: &str) -> Self {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "goodtogo" | "compliant" | "allclear" => return LabelClass::AllClear,
            "person" | "worker" => return LabelClass::Subject,
            _ => {}
        }

        for prefix in ["no", "missing", "without"] {
            if let Some(rest) = key.strip_prefix(prefix) {
                if let Some(equipment) = Equipment::from_token(rest) {
                    return LabelClass::Absent(equipment);
                }
            }
        }

        match Equipment::from_token(&key) {
            Some(equipment) => LabelClass::Present(equipment),
            None => LabelClass::Other,
        }
    }

    pub fn absent_equipment(self) -> Option<Equipment> {
        match self {
            LabelClass::Absent(equipment) => Some(equipment),
            _ => None,
        }
    }
}

/// Axis-aligned box in image coordinates (x1,y1 top-left; x2,y2 bottom-right).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box, reordering corners so x1 <= x2 and y1 <= y2.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        })
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Finding {
    label: String,
    confidence: f32,
    bounding_box: Option<BoundingBox>,
    class: LabelClass,
}

impl Finding {
    /// Confidence must already be clamped into [0,1] by the caller.
    pub(crate) fn new(label: String, confidence: f32, bounding_box: Option<BoundingBox>) -> Self {
        debug_assert!((0.0..=1.0).contains(&confidence));
        let class = LabelClass::classify(&label);
        Self {
            label,
            confidence,
            bounding_box,
            class,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bounding_box
    }

    pub fn class(&self) -> LabelClass {
        self.class
    }

    pub fn is_violation(&self) -> bool {
        matches!(self.class, LabelClass::Absent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_absence_labels() {
        assert_eq!(
            LabelClass::classify("NoHelmet"),
            LabelClass::Absent(Equipment::Helmet)
        );
        assert_eq!(
            LabelClass::classify("no-vest"),
            LabelClass::Absent(Equipment::Vest)
        );
        assert_eq!(
            LabelClass::classify("NO_GLOVES"),
            LabelClass::Absent(Equipment::Gloves)
        );
        assert_eq!(
            LabelClass::classify("Missing Boots"),
            LabelClass::Absent(Equipment::Boots)
        );
    }

    #[test]
    fn classifies_presence_and_markers() {
        assert_eq!(
            LabelClass::classify("Helmet"),
            LabelClass::Present(Equipment::Helmet)
        );
        assert_eq!(
            LabelClass::classify("Vest"),
            LabelClass::Present(Equipment::Vest)
        );
        assert_eq!(LabelClass::classify("GoodToGo"), LabelClass::AllClear);
        assert_eq!(LabelClass::classify("Person"), LabelClass::Subject);
    }

    #[test]
    fn unknown_labels_are_other_not_absence() {
        // "Nose" starts with "no" but is not an equipment token.
        assert_eq!(LabelClass::classify("Nose"), LabelClass::Other);
        assert_eq!(LabelClass::classify("Forklift"), LabelClass::Other);
        assert_eq!(LabelClass::classify(""), LabelClass::Other);
    }

    #[test]
    fn bounding_box_reorders_corners() {
        let bbox = BoundingBox::from_corners(10.0, 40.0, 2.0, 8.0).unwrap();
        assert_eq!(bbox.x1, 2.0);
        assert_eq!(bbox.y1, 8.0);
        assert_eq!(bbox.width(), 8.0);
        assert_eq!(bbox.height(), 32.0);
        assert!(BoundingBox::from_corners(f32::NAN, 0.0, 1.0, 1.0).is_none());
    }
}

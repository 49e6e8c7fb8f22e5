//! Sticky per-hazard box persistence.
//!
//! Expensive detectors do not fire on every frame; carrying the last-fired
//! boxes forward keeps the on-screen feedback stable instead of flickering.
//! This is intentionally not an IOU/Kalman tracker: positional accuracy is
//! traded for continuity. One instance lives for exactly one stream
//! session and is never shared across streams.

use std::collections::HashMap;

use crate::detect::Detection;
use crate::frame::BBox;
use crate::HazardKind;

/// Last-known boxes per hazard type.
///
/// Policy: if the detector fired this frame, replace the stored list with
/// the new one; otherwise keep the previous list verbatim. No decay.
#[derive(Debug, Default)]
pub struct PersistentBoxes {
    boxes: HashMap<HazardKind, Vec<BBox>>,
}

impl PersistentBoxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one frame's detection result for one hazard.
    pub fn update(&mut self, kind: HazardKind, detection: &Detection) {
        if detection.fired {
            self.boxes.insert(kind, detection.boxes.clone());
        }
    }

    /// Current boxes to render for a hazard (empty until its first firing).
    pub fn get(&self, kind: HazardKind) -> &[BBox] {
        self.boxes.get(&kind).map_or(&[], Vec::as_slice)
    }
}

//! Restricted-zone intrusion detector.
//!
//! Runs a general object model, keeps person-class detections above the
//! confidence threshold, and optionally restricts violations to detections
//! whose box center falls inside a configured region.

use anyhow::Result;

use crate::detect::adapter::{Detection, HazardDetector};
use crate::detect::model::ObjectModel;
use crate::frame::Frame;
use crate::{HazardKind, RegionConfig};

/// COCO person class in the default detection models.
pub const DEFAULT_PERSON_CLASS: u32 = 0;
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

pub struct RestrictedZoneDetector {
    model: Box<dyn ObjectModel>,
    enabled: bool,
    region: Option<RegionConfig>,
    person_class: u32,
    confidence: f32,
}

impl RestrictedZoneDetector {
    pub fn new(model: Box<dyn ObjectModel>, enabled: bool, region: Option<RegionConfig>) -> Self {
        Self {
            model,
            enabled,
            region,
            person_class: DEFAULT_PERSON_CLASS,
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_person_class(mut self, class_id: u32) -> Self {
        self.person_class = class_id;
        self
    }
}

impl HazardDetector for RestrictedZoneDetector {
    fn kind(&self) -> HazardKind {
        HazardKind::RestrictedZone
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, frame: &Frame) -> Result<Detection> {
        if !self.enabled {
            return Ok(Detection::none());
        }

        let candidates = self.model.infer(frame)?;
        let boxes: Vec<_> = candidates
            .into_iter()
            .filter(|c| c.class_id == self.person_class && c.confidence > self.confidence)
            .filter(|c| {
                self.region.as_ref().map_or(true, |region| {
                    let (cx, cy) = c.bbox.center();
                    region.contains(cx, cy)
                })
            })
            .map(|c| c.bbox)
            .collect();

        if boxes.is_empty() {
            Ok(Detection::none())
        } else {
            Ok(Detection::fired(boxes))
        }
    }
}

//! Safety-gear detector.
//!
//! Object model restricted to an allow-list of class ids representing the
//! required gear (helmets, vests, ...). Fires when any in-list detection
//! exceeds the confidence threshold.

use anyhow::Result;

use crate::detect::adapter::{Detection, HazardDetector};
use crate::detect::model::ObjectModel;
use crate::frame::Frame;
use crate::HazardKind;

pub const DEFAULT_CONFIDENCE: f32 = 0.85;

pub struct GearDetector {
    model: Box<dyn ObjectModel>,
    enabled: bool,
    class_ids: Vec<u32>,
    confidence: f32,
}

impl GearDetector {
    pub fn new(model: Box<dyn ObjectModel>, enabled: bool, class_ids: Vec<u32>) -> Self {
        Self {
            model,
            enabled,
            class_ids,
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

impl HazardDetector for GearDetector {
    fn kind(&self) -> HazardKind {
        HazardKind::SafetyGear
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
            .filter(|c| self.class_ids.contains(&c.class_id) && c.confidence > self.confidence)
            .map(|c| c.bbox)
            .collect();

        if boxes.is_empty() {
            Ok(Detection::none())
        } else {
            Ok(Detection::fired(boxes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::model::{ModelBox, StubModel};
    use crate::frame::BBox;

    fn gear(class_id: u32, confidence: f32) -> ModelBox {
        ModelBox {
            bbox: BBox::clamped(10, 10, 60, 60, 1000, 500),
            class_id,
            confidence,
        }
    }

    #[test]
    fn fires_only_on_allow_listed_classes_above_threshold() {
        let model = StubModel::firing_once(vec![
            gear(2, 0.9),  // helmet, confident
            gear(2, 0.5),  // helmet, not confident enough
            gear(9, 0.99), // not in allow-list
        ]);
        let mut det = GearDetector::new(Box::new(model), true, vec![2, 3]);
        let frame = Frame::solid(1000, 500, [0, 0, 0]);

        let result = det.process(&frame).unwrap();
        assert!(result.fired);
        assert_eq!(result.boxes.len(), 1);
    }

    #[test]
    fn disabled_gear_detector_is_a_no_op() {
        let model = StubModel::firing_once(vec![gear(2, 0.99)]);
        let mut det = GearDetector::new(Box::new(model), false, vec![2]);
        let frame = Frame::solid(1000, 500, [0, 0, 0]);

        let result = det.process(&frame).unwrap();
        assert!(!result.fired);
        assert!(!result.reportable);
    }
}

use anyhow::Result;
use std::collections::VecDeque;

use crate::frame::{BBox, Frame};

/// One raw detection from a black-box object model.
#[derive(Clone, Copy, Debug)]
pub struct ModelBox {
    pub bbox: BBox,
    pub class_id: u32,
    pub confidence: f32,
}

/// Black-box object detector contract.
///
/// Models are pre-trained artifacts that map an image to a list of
/// axis-aligned boxes with class and confidence. Adapters apply their own
/// thresholds and class filters on top; implementations should return every
/// candidate detection.
pub trait ObjectModel: Send {
    fn name(&self) -> &'static str;

    fn infer(&mut self, frame: &Frame) -> Result<Vec<ModelBox>>;
}

/// Scripted model for tests and synthetic deployments.
///
/// Responses are played back in push order; once the script is exhausted
/// the model returns no detections.
#[derive(Default)]
pub struct StubModel {
    script: VecDeque<Vec<ModelBox>>,
    calls: u64,
}

impl StubModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response for the next `infer` call.
    pub fn push_response(&mut self, boxes: Vec<ModelBox>) {
        self.script.push_back(boxes);
    }

    /// Convenience: a script that fires once with `boxes` and then stays quiet.
    pub fn firing_once(boxes: Vec<ModelBox>) -> Self {
        let mut model = Self::new();
        model.push_response(boxes);
        model
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl ObjectModel for StubModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<ModelBox>> {
        self.calls += 1;
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_model_plays_back_script_then_goes_quiet() {
        let mut model = StubModel::new();
        model.push_response(vec![ModelBox {
            bbox: BBox::clamped(0, 0, 10, 10, 100, 100),
            class_id: 0,
            confidence: 0.9,
        }]);

        let frame = Frame::solid(100, 100, [0, 0, 0]);
        assert_eq!(model.infer(&frame).unwrap().len(), 1);
        assert!(model.infer(&frame).unwrap().is_empty());
        assert_eq!(model.calls(), 2);
    }
}

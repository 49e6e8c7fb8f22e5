use anyhow::Result;

use crate::frame::{BBox, Frame};
use crate::HazardKind;

/// Result of one adapter invocation on one frame. Transient; never persisted.
#[derive(Clone, Debug, Default)]
pub struct Detection {
    /// Did the detector fire on this frame?
    pub fired: bool,
    /// Detected boxes, clamped to frame bounds.
    pub boxes: Vec<BBox>,
    /// Whether this firing qualifies for alert dispatch. Equal to `fired`
    /// for most detectors; the fire confirmation gate clears it until the
    /// hazard has been observed continuously for the configured delay.
    pub reportable: bool,
}

impl Detection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fired(boxes: Vec<BBox>) -> Self {
        Self {
            fired: true,
            reportable: true,
            boxes,
        }
    }
}

/// Uniform capability wrapper around one hazard model.
///
/// Adapters own their model instance and any temporal state (confirmation
/// timers, pose hold timers). They must not share mutable state with other
/// adapter instances; the pipeline runs them sequentially in `HazardKind`
/// order.
pub trait HazardDetector: Send {
    /// Which hazard this adapter detects.
    fn kind(&self) -> HazardKind;

    /// Whether the adapter is enabled for this stream. Disabled adapters
    /// must return `Detection::none()` from `process` without touching the
    /// frame.
    fn enabled(&self) -> bool;

    /// Run detection on a frame.
    fn process(&mut self, frame: &Frame) -> Result<Detection>;
}

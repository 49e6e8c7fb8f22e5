//! Fire detector.
//!
//! Two interchangeable variants behind the same adapter contract, selected
//! by configuration rather than inheritance:
//!
//! - `Model`: a trained classifier thresholded at a confidence value
//!   (default 0.60).
//! - `Segmentation`: color segmentation fallback. HSV range mask (hue
//!   0-35 degrees, high saturation/value) -> 3x3 morphological open ->
//!   connected components -> minimum-area filter -> one box per surviving
//!   component. Also computes an intensity metric (fire area / frame area
//!   as a percentage) used for display severity, and a confirmation gate:
//!   a fire must be observed continuously for the configured delay before
//!   it becomes reportable. A single empty frame resets the gate.

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::detect::adapter::{Detection, HazardDetector};
use crate::detect::model::ObjectModel;
use crate::frame::{BBox, Frame};
use crate::HazardKind;

pub const DEFAULT_MODEL_CONFIDENCE: f32 = 0.60;
pub const DEFAULT_MIN_CONTOUR_AREA: u32 = 500;
pub const DEFAULT_CONFIRM_DELAY: Duration = Duration::from_secs(1);

/// Display severity derived from the segmentation intensity metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireSeverity {
    /// Intensity below 1% of the frame.
    Low,
    /// Intensity below 5% of the frame.
    Moderate,
    /// Intensity at or above 5% of the frame.
    Severe,
}

impl FireSeverity {
    pub fn from_intensity_pct(pct: f32) -> Self {
        if pct < 1.0 {
            FireSeverity::Low
        } else if pct < 5.0 {
            FireSeverity::Moderate
        } else {
            FireSeverity::Severe
        }
    }
}

// -------------------- Confirmation gate --------------------

/// Requires continuous observation for `required` before confirming.
///
/// The timer resets to "undetected" the instant a frame has zero fire
/// boxes; confirmation holds for as long as observation stays continuous.
#[derive(Debug)]
pub struct ConfirmGate {
    required: Duration,
    seen_since: Option<Instant>,
}

impl ConfirmGate {
    pub fn new(required: Duration) -> Self {
        Self {
            required,
            seen_since: None,
        }
    }

    /// Feed one frame's observation; returns whether the fire is confirmed.
    pub fn observe(&mut self, found: bool, now: Instant) -> bool {
        if !found {
            self.seen_since = None;
            return false;
        }
        let since = *self.seen_since.get_or_insert(now);
        now.duration_since(since) >= self.required
    }
}

// -------------------- Segmentation --------------------

/// Tunables for the color-segmentation variant.
#[derive(Clone, Copy, Debug)]
pub struct SegmentationParams {
    /// Upper hue bound in degrees (lower bound is 0).
    pub max_hue_deg: f32,
    /// Minimum saturation, 0..1.
    pub min_saturation: f32,
    /// Minimum value (brightness), 0..1.
    pub min_value: f32,
    /// Minimum surviving component area in px^2.
    pub min_area: u32,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            max_hue_deg: 35.0,
            min_saturation: 0.4,
            min_value: 0.5,
            min_area: DEFAULT_MIN_CONTOUR_AREA,
        }
    }
}

/// Hue (degrees), saturation and value for one RGB pixel.
fn rgb_to_hsv(rgb: [u8; 3]) -> (f32, f32, f32) {
    let r = rgb[0] as f32 / 255.0;
    let g = rgb[1] as f32 / 255.0;
    let b = rgb[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    (hue, saturation, max)
}

/// Runs the segmentation pipeline on a frame, returning surviving component
/// boxes and the intensity metric (fire area as a percentage of the frame).
pub fn segment_fire(frame: &Frame, params: &SegmentationParams) -> (Vec<BBox>, f32) {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    if width == 0 || height == 0 {
        return (Vec::new(), 0.0);
    }

    let mut mask = vec![false; width * height];
    for y in 0..height {
        for x in 0..width {
            let (h, s, v) = rgb_to_hsv(frame.pixel(x as u32, y as u32));
            mask[y * width + x] =
                h <= params.max_hue_deg && s >= params.min_saturation && v >= params.min_value;
        }
    }

    let opened = dilate(&erode(&mask, width, height), width, height);
    let components = connected_components(&opened, width, height);

    let mut boxes = Vec::new();
    let mut fire_area = 0u64;
    for comp in components {
        if comp.area <= params.min_area as u64 {
            continue;
        }
        fire_area += comp.area;
        boxes.push(BBox::clamped(
            comp.min_x as i32,
            comp.min_y as i32,
            comp.max_x as i32,
            comp.max_y as i32,
            frame.width(),
            frame.height(),
        ));
    }

    let intensity = fire_area as f32 / (width * height) as f32 * 100.0;
    (boxes, intensity)
}

/// 3x3 erosion: a pixel survives only if its full 8-neighborhood is set.
fn erode(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut out = vec![false; mask.len()];
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let mut all = true;
            'probe: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = (x as i32 + dx) as usize;
                    let ny = (y as i32 + dy) as usize;
                    if !mask[ny * width + nx] {
                        all = false;
                        break 'probe;
                    }
                }
            }
            out[y * width + x] = all;
        }
    }
    out
}

/// 3x3 dilation: a pixel is set if any of its 8-neighborhood is set.
fn dilate(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut out = vec![false; mask.len()];
    for y in 0..height {
        for x in 0..width {
            let mut any = false;
            'probe: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }
                    if mask[ny as usize * width + nx as usize] {
                        any = true;
                        break 'probe;
                    }
                }
            }
            out[y * width + x] = any;
        }
    }
    out
}

struct Component {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    area: u64,
}

/// 4-connected component labeling via breadth-first flood fill.
fn connected_components(mask: &[bool], width: usize, height: usize) -> Vec<Component> {
    let mut visited = vec![false; mask.len()];
    let mut components = Vec::new();
    let mut queue = std::collections::VecDeque::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);
        let mut comp = Component {
            min_x: usize::MAX,
            min_y: usize::MAX,
            max_x: 0,
            max_y: 0,
            area: 0,
        };

        while let Some(idx) = queue.pop_front() {
            let x = idx % width;
            let y = idx / width;
            comp.area += 1;
            comp.min_x = comp.min_x.min(x);
            comp.min_y = comp.min_y.min(y);
            comp.max_x = comp.max_x.max(x);
            comp.max_y = comp.max_y.max(y);

            let mut push = |nx: usize, ny: usize| {
                let nidx = ny * width + nx;
                if mask[nidx] && !visited[nidx] {
                    visited[nidx] = true;
                    queue.push_back(nidx);
                }
            };
            if x > 0 {
                push(x - 1, y);
            }
            if x + 1 < width {
                push(x + 1, y);
            }
            if y > 0 {
                push(x, y - 1);
            }
            if y + 1 < height {
                push(x, y + 1);
            }
        }
        components.push(comp);
    }
    components
}

// -------------------- Detector --------------------

enum FireVariant {
    Model {
        model: Box<dyn ObjectModel>,
        confidence: f32,
    },
    Segmentation {
        params: SegmentationParams,
        gate: ConfirmGate,
    },
}

pub struct FireDetector {
    enabled: bool,
    variant: FireVariant,
    last_severity: Option<FireSeverity>,
    last_confirmed: bool,
}

impl FireDetector {
    /// Trained-classifier variant at the default confidence threshold.
    pub fn with_model(model: Box<dyn ObjectModel>, enabled: bool) -> Self {
        Self::with_model_confidence(model, enabled, DEFAULT_MODEL_CONFIDENCE)
    }

    pub fn with_model_confidence(
        model: Box<dyn ObjectModel>,
        enabled: bool,
        confidence: f32,
    ) -> Self {
        Self {
            enabled,
            variant: FireVariant::Model { model, confidence },
            last_severity: None,
            last_confirmed: false,
        }
    }

    /// Color-segmentation fallback variant.
    pub fn with_segmentation(enabled: bool, confirm_delay: Duration) -> Self {
        Self {
            enabled,
            variant: FireVariant::Segmentation {
                params: SegmentationParams::default(),
                gate: ConfirmGate::new(confirm_delay),
            },
            last_severity: None,
            last_confirmed: false,
        }
    }

    /// Display severity of the most recent firing frame, segmentation only.
    pub fn severity(&self) -> Option<FireSeverity> {
        self.last_severity
    }

    /// Whether the most recent frame passed the confirmation gate.
    pub fn confirmed(&self) -> bool {
        self.last_confirmed
    }

    fn process_at(&mut self, frame: &Frame, now: Instant) -> Result<Detection> {
        if !self.enabled {
            return Ok(Detection::none());
        }

        match &mut self.variant {
            FireVariant::Model { model, confidence } => {
                let boxes: Vec<_> = model
                    .infer(frame)?
                    .into_iter()
                    .filter(|c| c.confidence > *confidence)
                    .map(|c| c.bbox)
                    .collect();
                self.last_severity = None;
                self.last_confirmed = !boxes.is_empty();
                if boxes.is_empty() {
                    Ok(Detection::none())
                } else {
                    Ok(Detection::fired(boxes))
                }
            }
            FireVariant::Segmentation { params, gate } => {
                let (boxes, intensity) = segment_fire(frame, params);
                let found = !boxes.is_empty();
                let confirmed = gate.observe(found, now);
                self.last_severity = found.then(|| FireSeverity::from_intensity_pct(intensity));
                self.last_confirmed = confirmed;
                Ok(Detection {
                    fired: found,
                    boxes,
                    reportable: confirmed,
                })
            }
        }
    }
}

impl HazardDetector for FireDetector {
    fn kind(&self) -> HazardKind {
        HazardKind::Fire
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, frame: &Frame) -> Result<Detection> {
        self.process_at(frame, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::model::{ModelBox, StubModel};
    use image::RgbImage;

    const FIRE_ORANGE: [u8; 3] = [255, 120, 40];

    fn frame_with_orange_rect(x1: u32, y1: u32, w: u32, h: u32) -> Frame {
        let mut image = RgbImage::from_pixel(320, 240, image::Rgb([0, 0, 0]));
        for y in y1..y1 + h {
            for x in x1..x1 + w {
                image.put_pixel(x, y, image::Rgb(FIRE_ORANGE));
            }
        }
        Frame::from_image(image)
    }

    #[test]
    fn segmentation_finds_a_single_orange_rectangle() {
        // 50x40 = 2000 px^2, comfortably above the 500 px^2 floor.
        let frame = frame_with_orange_rect(60, 80, 50, 40);
        let (boxes, intensity) = segment_fire(&frame, &SegmentationParams::default());

        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        // Bounds within morphological tolerance of the painted rectangle.
        assert!((b.x1 - 60).abs() <= 2, "x1 = {}", b.x1);
        assert!((b.y1 - 80).abs() <= 2, "y1 = {}", b.y1);
        assert!((b.x2 - 109).abs() <= 2, "x2 = {}", b.x2);
        assert!((b.y2 - 119).abs() <= 2, "y2 = {}", b.y2);
        assert!(intensity > 0.0);
    }

    #[test]
    fn segmentation_ignores_an_all_black_frame() {
        let frame = Frame::solid(320, 240, [0, 0, 0]);
        let (boxes, intensity) = segment_fire(&frame, &SegmentationParams::default());
        assert!(boxes.is_empty());
        assert_eq!(intensity, 0.0);
    }

    #[test]
    fn segmentation_drops_components_below_minimum_area() {
        // 20x20 = 400 px^2, below the 500 px^2 floor.
        let frame = frame_with_orange_rect(10, 10, 20, 20);
        let (boxes, _) = segment_fire(&frame, &SegmentationParams::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn severity_thresholds() {
        assert_eq!(FireSeverity::from_intensity_pct(0.5), FireSeverity::Low);
        assert_eq!(
            FireSeverity::from_intensity_pct(3.0),
            FireSeverity::Moderate
        );
        assert_eq!(FireSeverity::from_intensity_pct(5.0), FireSeverity::Severe);
    }

    #[test]
    fn confirm_gate_requires_continuous_observation() {
        let mut gate = ConfirmGate::new(Duration::from_secs(1));
        let t0 = Instant::now();

        assert!(!gate.observe(true, t0));
        assert!(!gate.observe(true, t0 + Duration::from_millis(500)));
        assert!(gate.observe(true, t0 + Duration::from_millis(1100)));

        // A single empty frame resets the timer.
        assert!(!gate.observe(false, t0 + Duration::from_millis(1200)));
        assert!(!gate.observe(true, t0 + Duration::from_millis(1300)));
        assert!(!gate.observe(true, t0 + Duration::from_millis(2200)));
        assert!(gate.observe(true, t0 + Duration::from_millis(2400)));
    }

    #[test]
    fn segmentation_detector_reports_only_after_confirmation() {
        let mut det = FireDetector::with_segmentation(true, Duration::from_secs(1));
        let frame = frame_with_orange_rect(60, 80, 50, 40);
        let t0 = Instant::now();

        let first = det.process_at(&frame, t0).unwrap();
        assert!(first.fired);
        assert!(!first.reportable);
        // 2000 px^2 of a 320x240 frame is ~2.6% intensity.
        assert_eq!(det.severity(), Some(FireSeverity::Moderate));

        let later = det
            .process_at(&frame, t0 + Duration::from_millis(1200))
            .unwrap();
        assert!(later.fired);
        assert!(later.reportable);
        assert!(det.confirmed());
    }

    #[test]
    fn model_variant_thresholds_on_confidence() {
        let model = StubModel::firing_once(vec![
            ModelBox {
                bbox: BBox::clamped(10, 10, 60, 60, 320, 240),
                class_id: 0,
                confidence: 0.7,
            },
            ModelBox {
                bbox: BBox::clamped(100, 10, 160, 60, 320, 240),
                class_id: 0,
                confidence: 0.4,
            },
        ]);
        let mut det = FireDetector::with_model(Box::new(model), true);
        let frame = Frame::solid(320, 240, [0, 0, 0]);

        let result = det.process(&frame).unwrap();
        assert!(result.fired);
        assert!(result.reportable);
        assert_eq!(result.boxes.len(), 1);
    }

    #[test]
    fn disabled_fire_detector_is_free() {
        let mut det = FireDetector::with_segmentation(false, Duration::from_secs(1));
        let frame = frame_with_orange_rect(60, 80, 50, 40);
        let result = det.process(&frame).unwrap();
        assert!(!result.fired);
        assert!(result.boxes.is_empty());
    }
}

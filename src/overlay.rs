//! Overlay rendering.
//!
//! Split in two pure stages so the interesting part is testable without
//! pixel assertions: `overlay_plan` computes the draw operations for a
//! frame from tracker state and pose status, and `render_plan` rasterizes
//! them. Neither stage mutates tracker or adapter state.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::{FireSeverity, GestureClass};
use crate::frame::{BBox, Frame};
use crate::tracker::PersistentBoxes;
use crate::HazardKind;

pub const COLOR_RESTRICTED: [u8; 3] = [0, 0, 255];
pub const COLOR_FIRE: [u8; 3] = [255, 0, 0];
pub const COLOR_GEAR: [u8; 3] = [0, 255, 0];
pub const COLOR_POSE: [u8; 3] = [255, 0, 0];
pub const COLOR_BANNER: [u8; 3] = [255, 255, 255];
pub const COLOR_SAFE: [u8; 3] = [0, 255, 0];
pub const COLOR_UNSAFE: [u8; 3] = [255, 0, 0];
pub const COLOR_SEVERITY_LOW: [u8; 3] = [0, 255, 0];
pub const COLOR_SEVERITY_MODERATE: [u8; 3] = [255, 255, 0];
pub const COLOR_SEVERITY_SEVERE: [u8; 3] = [255, 0, 0];

const BOX_THICKNESS: i32 = 2;
const POSE_BORDER_THICKNESS: i32 = 5;

/// One draw operation in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawOp {
    Rect {
        bbox: BBox,
        color: [u8; 3],
        thickness: i32,
    },
    Label {
        text: String,
        x: i32,
        y: i32,
        color: [u8; 3],
    },
}

/// Everything the renderer needs for one frame, read-only.
pub struct OverlayState<'a> {
    /// Enabled hazards in processing order (drives the banner).
    pub active: &'a [HazardKind],
    pub tracker: &'a PersistentBoxes,
    /// Fire display severity (segmentation variant only).
    pub fire_severity: Option<FireSeverity>,
    /// Whether the pose emergency is currently triggered.
    pub pose_emergency: bool,
    /// Last classified gesture, when the gesture model is configured.
    pub gesture: Option<GestureClass>,
}

fn severity_color(severity: Option<FireSeverity>) -> [u8; 3] {
    match severity {
        Some(FireSeverity::Low) => COLOR_SEVERITY_LOW,
        Some(FireSeverity::Moderate) => COLOR_SEVERITY_MODERATE,
        Some(FireSeverity::Severe) | None => COLOR_SEVERITY_SEVERE,
    }
}

/// Computes the overlay for one frame.
pub fn overlay_plan(state: &OverlayState<'_>) -> Vec<DrawOp> {
    let mut ops = Vec::new();

    let banner = state
        .active
        .iter()
        .map(|kind| kind.display_name())
        .collect::<Vec<_>>()
        .join(" + ");
    if !banner.is_empty() {
        ops.push(DrawOp::Label {
            text: banner,
            x: 10,
            y: 30,
            color: COLOR_BANNER,
        });
    }

    for &kind in state.active {
        match kind {
            HazardKind::RestrictedZone => {
                for &bbox in state.tracker.get(kind) {
                    ops.push(DrawOp::Rect {
                        bbox,
                        color: COLOR_RESTRICTED,
                        thickness: BOX_THICKNESS,
                    });
                    ops.push(DrawOp::Label {
                        text: "Restricted Zone Violation".to_string(),
                        x: bbox.x1,
                        y: bbox.y1 - 10,
                        color: COLOR_RESTRICTED,
                    });
                }
            }
            HazardKind::Fire => {
                let label_color = severity_color(state.fire_severity);
                for &bbox in state.tracker.get(kind) {
                    ops.push(DrawOp::Rect {
                        bbox,
                        color: COLOR_FIRE,
                        thickness: BOX_THICKNESS,
                    });
                    ops.push(DrawOp::Label {
                        text: "Fire Detected".to_string(),
                        x: bbox.x1,
                        y: bbox.y1 - 10,
                        color: label_color,
                    });
                }
            }
            HazardKind::SafetyGear => {
                for &bbox in state.tracker.get(kind) {
                    ops.push(DrawOp::Rect {
                        bbox,
                        color: COLOR_GEAR,
                        thickness: BOX_THICKNESS,
                    });
                    ops.push(DrawOp::Label {
                        text: "Gear Detected".to_string(),
                        x: bbox.x1,
                        y: bbox.y1 - 10,
                        color: COLOR_GEAR,
                    });
                }
            }
            HazardKind::Pose => {
                if state.pose_emergency {
                    for &bbox in state.tracker.get(kind) {
                        ops.push(DrawOp::Rect {
                            bbox,
                            color: COLOR_POSE,
                            thickness: POSE_BORDER_THICKNESS,
                        });
                    }
                    ops.push(DrawOp::Label {
                        text: "EMERGENCY DETECTED!".to_string(),
                        x: 50,
                        y: 50,
                        color: COLOR_POSE,
                    });
                }
                if let Some(gesture) = state.gesture {
                    let color = if gesture.is_unsafe() {
                        COLOR_UNSAFE
                    } else {
                        COLOR_SAFE
                    };
                    ops.push(DrawOp::Label {
                        text: format!("Gesture: {}", gesture.display_name()),
                        x: 50,
                        y: 80,
                        color,
                    });
                }
            }
        }
    }

    ops
}

/// Label font used by the rasterizer. Loaded from a configured TTF/OTF
/// path; when absent, labels are skipped and only rectangles are drawn.
pub struct OverlayFont {
    font: FontVec,
    scale: PxScale,
}

impl OverlayFont {
    pub fn load<P: AsRef<Path>>(path: P, size: f32) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())
            .with_context(|| format!("read overlay font {}", path.as_ref().display()))?;
        let font = FontVec::try_from_vec(bytes).context("parse overlay font")?;
        Ok(Self {
            font,
            scale: PxScale::from(size),
        })
    }
}

/// Rasterizes a plan onto the frame.
pub fn render_plan(frame: &mut Frame, ops: &[DrawOp], font: Option<&OverlayFont>) {
    let width = frame.width();
    let height = frame.height();
    let image = frame.image_mut();

    for op in ops {
        match op {
            DrawOp::Rect {
                bbox,
                color,
                thickness,
            } => {
                // Nested hollow rects approximate line thickness.
                for inset in 0..*thickness {
                    let x = bbox.x1 + inset;
                    let y = bbox.y1 + inset;
                    // Inclusive corner coordinates: a box spans width()+1 pixels.
                    let w = bbox.width() - 2 * inset + 1;
                    let h = bbox.height() - 2 * inset + 1;
                    if w <= 0 || h <= 0 || x >= width as i32 || y >= height as i32 {
                        break;
                    }
                    draw_hollow_rect_mut(
                        image,
                        Rect::at(x, y).of_size(w as u32, h as u32),
                        Rgb(*color),
                    );
                }
            }
            DrawOp::Label { text, x, y, color } => {
                if let Some(font) = font {
                    let x = (*x).max(0);
                    let y = (*y).max(0);
                    if x < width as i32 && y < height as i32 {
                        draw_text_mut(image, Rgb(*color), x, y, font.scale, &font.font, text);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    fn tracker_with(kind: HazardKind, coords: (i32, i32, i32, i32)) -> PersistentBoxes {
        let mut tracker = PersistentBoxes::new();
        let bbox = BBox::clamped(coords.0, coords.1, coords.2, coords.3, 1000, 500);
        tracker.update(kind, &Detection::fired(vec![bbox]));
        tracker
    }

    fn rects(ops: &[DrawOp]) -> Vec<&DrawOp> {
        ops.iter()
            .filter(|op| matches!(op, DrawOp::Rect { .. }))
            .collect()
    }

    fn labels(ops: &[DrawOp]) -> Vec<&String> {
        ops.iter()
            .filter_map(|op| match op {
                DrawOp::Label { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn banner_joins_active_detector_names() {
        let tracker = PersistentBoxes::new();
        let state = OverlayState {
            active: &[HazardKind::RestrictedZone, HazardKind::Fire],
            tracker: &tracker,
            fire_severity: None,
            pose_emergency: false,
            gesture: None,
        };
        let ops = overlay_plan(&state);
        assert_eq!(
            labels(&ops)[0],
            "Restricted Zone Detection + Fire Detection"
        );
    }

    #[test]
    fn disabled_hazard_contributes_nothing() {
        // Tracker holds fire boxes, but fire is not in the active set.
        let tracker = tracker_with(HazardKind::Fire, (10, 10, 60, 60));
        let state = OverlayState {
            active: &[HazardKind::RestrictedZone],
            tracker: &tracker,
            fire_severity: None,
            pose_emergency: false,
            gesture: None,
        };
        let ops = overlay_plan(&state);
        assert!(rects(&ops).is_empty());
        assert!(!labels(&ops).iter().any(|t| t.contains("Fire")));
    }

    #[test]
    fn fire_boxes_draw_red_with_severity_label_color() {
        let tracker = tracker_with(HazardKind::Fire, (10, 10, 60, 60));
        let state = OverlayState {
            active: &[HazardKind::Fire],
            tracker: &tracker,
            fire_severity: Some(FireSeverity::Moderate),
            pose_emergency: false,
            gesture: None,
        };
        let ops = overlay_plan(&state);
        let rect = rects(&ops)[0];
        assert!(matches!(
            rect,
            DrawOp::Rect {
                color: COLOR_FIRE,
                ..
            }
        ));
        let label = ops
            .iter()
            .find(|op| matches!(op, DrawOp::Label { text, .. } if text == "Fire Detected"))
            .unwrap();
        assert!(matches!(
            label,
            DrawOp::Label {
                color: COLOR_SEVERITY_MODERATE,
                ..
            }
        ));
    }

    #[test]
    fn pose_emergency_draws_border_and_status() {
        let tracker = tracker_with(HazardKind::Pose, (10, 10, 990, 490));
        let state = OverlayState {
            active: &[HazardKind::Pose],
            tracker: &tracker,
            fire_severity: None,
            pose_emergency: true,
            gesture: Some(GestureClass::IndexFinger),
        };
        let ops = overlay_plan(&state);
        assert_eq!(rects(&ops).len(), 1);
        assert!(labels(&ops).iter().any(|t| *t == "EMERGENCY DETECTED!"));
        assert!(labels(&ops).iter().any(|t| *t == "Gesture: Index Finger"));
    }

    #[test]
    fn render_without_font_still_draws_rectangles() {
        let mut frame = Frame::solid(100, 100, [0, 0, 0]);
        let ops = vec![DrawOp::Rect {
            bbox: BBox::clamped(10, 10, 50, 50, 100, 100),
            color: COLOR_GEAR,
            thickness: 1,
        }];
        render_plan(&mut frame, &ops, None);
        assert_eq!(frame.pixel(10, 10), COLOR_GEAR);
        assert_eq!(frame.pixel(50, 10), COLOR_GEAR);
        // Interior untouched.
        assert_eq!(frame.pixel(30, 30), [0, 0, 0]);
    }
}

//! Per-stream processing pipeline.
//!
//! One pipeline owns one camera connection end to end: pull a frame,
//! resize to the working resolution, run every enabled detector in a
//! fixed order, refresh the sticky overlay boxes, render, report, and
//! push the annotated JPEG to the viewer as one multipart segment.
//!
//! A failure in one stage of one frame is logged and the frame is
//! dropped; the stream keeps going. Only a dead source or a gone viewer
//! ends the loop.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;

use crate::detect::{
    Detection, FireDetector, GearDetector, HazardDetector, PoseAlert, RestrictedZoneDetector,
};
use crate::dispatch::AlertDispatcher;
use crate::ingest::FrameSource;
use crate::overlay::{overlay_plan, render_plan, OverlayFont, OverlayState};
use crate::tracker::PersistentBoxes;
use crate::HazardKind;

/// Boundary token used for the multipart stream.
pub const MULTIPART_BOUNDARY: &str = "frame";

/// The enabled hazard checks for one camera, processed in the fixed
/// `HazardKind::ALL` order.
#[derive(Default)]
pub struct DetectorSet {
    pub restricted_zone: Option<RestrictedZoneDetector>,
    pub fire: Option<FireDetector>,
    pub safety_gear: Option<GearDetector>,
    pub pose: Option<PoseAlert>,
}

impl DetectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled hazards in processing order. Drives the overlay banner.
    pub fn active_kinds(&self) -> Vec<HazardKind> {
        self.iter()
            .filter(|detector| detector.enabled())
            .map(|detector| detector.kind())
            .collect()
    }

    fn iter(&self) -> impl Iterator<Item = &dyn HazardDetector> {
        let slots: [Option<&dyn HazardDetector>; 4] = [
            self.restricted_zone.as_ref().map(|d| d as _),
            self.fire.as_ref().map(|d| d as _),
            self.safety_gear.as_ref().map(|d| d as _),
            self.pose.as_ref().map(|d| d as _),
        ];
        slots.into_iter().flatten()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut dyn HazardDetector> {
        let slots: [Option<&mut dyn HazardDetector>; 4] = [
            self.restricted_zone.as_mut().map(|d| d as _),
            self.fire.as_mut().map(|d| d as _),
            self.safety_gear.as_mut().map(|d| d as _),
            self.pose.as_mut().map(|d| d as _),
        ];
        slots.into_iter().flatten()
    }
}

pub struct StreamPipeline {
    source: Box<dyn FrameSource>,
    detectors: DetectorSet,
    tracker: PersistentBoxes,
    dispatcher: Arc<AlertDispatcher>,
    user_id: i64,
    width: u32,
    height: u32,
    font: Option<Arc<OverlayFont>>,
}

impl StreamPipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        detectors: DetectorSet,
        dispatcher: Arc<AlertDispatcher>,
        user_id: i64,
        width: u32,
        height: u32,
        font: Option<Arc<OverlayFont>>,
    ) -> Self {
        Self {
            source,
            detectors,
            tracker: PersistentBoxes::new(),
            dispatcher,
            user_id,
            width,
            height,
            font,
        }
    }

    /// Connect the underlying source. Fails fast when the camera is
    /// unreachable so the caller can report it before streaming starts.
    pub fn connect(&mut self) -> Result<()> {
        self.source.connect()
    }

    /// Run the stream until the source ends or the sink closes.
    ///
    /// Returns an error only when the source cannot be reached. Once
    /// streaming has started, a read failure or a closed sink ends the
    /// loop cleanly.
    pub fn run(&mut self, sink: &mut dyn Write) -> Result<()> {
        self.connect()?;
        self.stream(sink)
    }

    /// The frame loop, assuming a connected source.
    pub fn stream(&mut self, sink: &mut dyn Write) -> Result<()> {
        loop {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("stream ended for user {}", self.user_id);
                    return Ok(());
                }
                Err(err) => {
                    log::warn!("stream read failed, closing: {:#}", err);
                    return Ok(());
                }
            };

            let jpeg = match self.process_frame(frame) {
                Ok(jpeg) => jpeg,
                Err(err) => {
                    log::error!("frame processing failed: {:#}", err);
                    continue;
                }
            };

            if write_segment(sink, &jpeg).is_err() {
                log::info!("viewer disconnected, stopping stream");
                return Ok(());
            }
        }
    }

    /// One frame through resize, detection, tracking, overlay, and
    /// dispatch. Returns the annotated JPEG bytes.
    pub fn process_frame(&mut self, frame: crate::frame::Frame) -> Result<Vec<u8>> {
        let mut frame = frame.resized(self.width, self.height);

        let mut detections: Vec<(HazardKind, Detection)> = Vec::new();
        for detector in self.detectors.iter_mut() {
            if !detector.enabled() {
                continue;
            }
            let kind = detector.kind();
            match detector.process(&frame) {
                Ok(detection) => detections.push((kind, detection)),
                Err(err) => log::error!("{} detector failed: {:#}", kind.as_str(), err),
            }
        }

        for (kind, detection) in &detections {
            self.tracker.update(*kind, detection);
        }

        let active = self.detectors.active_kinds();
        let state = OverlayState {
            active: &active,
            tracker: &self.tracker,
            fire_severity: self.detectors.fire.as_ref().and_then(|fire| fire.severity()),
            pose_emergency: self
                .detectors
                .pose
                .as_ref()
                .map(|pose| pose.emergency_active())
                .unwrap_or(false),
            gesture: self.detectors.pose.as_ref().and_then(|pose| pose.last_gesture()),
        };
        let ops = overlay_plan(&state);
        render_plan(&mut frame, &ops, self.font.as_deref());

        for (kind, detection) in &detections {
            if !detection.reportable {
                continue;
            }
            if let Err(err) = self.dispatcher.report(*kind, self.user_id, &frame) {
                log::error!("alert dispatch failed for {}: {:#}", kind.as_str(), err);
            }
        }

        frame.to_jpeg()
    }
}

/// Write one multipart segment. The framing is fixed: boundary line,
/// content type, blank line, JPEG bytes, trailing CRLF.
pub fn write_segment(sink: &mut dyn Write, jpeg: &[u8]) -> std::io::Result<()> {
    sink.write_all(
        format!(
            "--{}\r\nContent-Type: image/jpeg\r\n\r\n",
            MULTIPART_BOUNDARY
        )
        .as_bytes(),
    )?;
    sink.write_all(jpeg)?;
    sink.write_all(b"\r\n")?;
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubModel;

    #[test]
    fn active_kinds_follow_processing_order() {
        let mut set = DetectorSet::new();
        set.pose = Some(PoseAlert::new(
            Box::new(crate::detect::StubPoseEstimator::new()),
            true,
        ));
        set.safety_gear = Some(GearDetector::new(
            Box::new(StubModel::new()),
            true,
            vec![1],
        ));
        assert_eq!(
            set.active_kinds(),
            vec![HazardKind::SafetyGear, HazardKind::Pose]
        );
    }

    #[test]
    fn disabled_detectors_are_not_active() {
        let mut set = DetectorSet::new();
        set.fire = Some(FireDetector::with_segmentation(
            false,
            std::time::Duration::from_secs(1),
        ));
        assert!(set.active_kinds().is_empty());
    }

    #[test]
    fn segment_framing_is_exact() {
        let mut sink = Vec::new();
        write_segment(&mut sink, b"JPEGDATA").unwrap();
        assert_eq!(
            sink,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n"
        );
    }
}

//! Pose-based emergency detection.
//!
//! Two signals feed the pose hazard:
//!
//! - A sustained-gesture state machine over body landmarks: both wrists
//!   above both shoulders, held continuously for the configured duration
//!   (default 5s), triggers at most once per episode. Any frame that
//!   breaks the posture resets the machine to idle.
//! - A stateless 10-class gesture classifier; one reserved class maps to
//!   "unsafe" and relies entirely on the dispatcher's alert-rate limiting.

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::detect::adapter::{Detection, HazardDetector};
use crate::frame::{BBox, Frame};
use crate::HazardKind;

pub const DEFAULT_HOLD: Duration = Duration::from_secs(5);

/// Normalized body landmarks; y decreases upward (0 = top of frame).
#[derive(Clone, Copy, Debug)]
pub struct PoseLandmarks {
    pub left_wrist_y: f32,
    pub right_wrist_y: f32,
    pub left_shoulder_y: f32,
    pub right_shoulder_y: f32,
}

impl PoseLandmarks {
    /// Both wrists above both shoulders (smaller y is higher).
    pub fn hands_raised(&self) -> bool {
        self.left_wrist_y < self.left_shoulder_y && self.right_wrist_y < self.right_shoulder_y
    }
}

/// Black-box pose model: frame in, landmarks out (None when no person).
pub trait PoseEstimator: Send {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<PoseLandmarks>>;
}

/// Scripted pose estimator for tests.
#[derive(Default)]
pub struct StubPoseEstimator {
    script: std::collections::VecDeque<Option<PoseLandmarks>>,
}

impl StubPoseEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, landmarks: Option<PoseLandmarks>) {
        self.script.push_back(landmarks);
    }
}

impl PoseEstimator for StubPoseEstimator {
    fn estimate(&mut self, _frame: &Frame) -> Result<Option<PoseLandmarks>> {
        Ok(self.script.pop_front().flatten())
    }
}

// -------------------- Emergency state machine --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoseState {
    Idle,
    Armed { since: Instant },
    Triggered,
}

/// `Idle -> Armed(start) -> Triggered` over the raised-hands posture.
///
/// Triggers exactly once per sustained episode; re-triggering requires the
/// posture to be broken (a full pass through `Idle`) and re-established.
#[derive(Debug)]
pub struct EmergencyStateMachine {
    state: PoseState,
    hold: Duration,
}

impl EmergencyStateMachine {
    pub fn new(hold: Duration) -> Self {
        Self {
            state: PoseState::Idle,
            hold,
        }
    }

    pub fn state(&self) -> PoseState {
        self.state
    }

    /// Whether the machine currently sits in the triggered state.
    pub fn triggered(&self) -> bool {
        matches!(self.state, PoseState::Triggered)
    }

    /// Advance one frame. Returns true exactly on the `Armed -> Triggered`
    /// transition.
    pub fn update(&mut self, landmarks: Option<&PoseLandmarks>, now: Instant) -> bool {
        let held = landmarks.map_or(false, PoseLandmarks::hands_raised);
        if !held {
            self.state = PoseState::Idle;
            return false;
        }
        match self.state {
            PoseState::Idle => {
                self.state = PoseState::Armed { since: now };
                false
            }
            PoseState::Armed { since } => {
                if now.duration_since(since) >= self.hold {
                    self.state = PoseState::Triggered;
                    true
                } else {
                    false
                }
            }
            PoseState::Triggered => false,
        }
    }
}

// -------------------- Gesture classifier --------------------

/// Discrete gesture classes produced by the pretrained gesture model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureClass {
    Palm,
    LSign,
    Fist,
    FistMoved,
    ThumbsUp,
    IndexFinger,
    OkSign,
    PalmMoved,
    CShape,
    ThumbsDown,
}

impl GestureClass {
    /// The reserved distress gesture maps to unsafe; everything else is safe.
    pub fn is_unsafe(&self) -> bool {
        matches!(self, GestureClass::IndexFinger)
    }

    /// Overlay label. Only the two gestures with a safety meaning get a
    /// name; the rest show as "Unknown".
    pub fn display_name(&self) -> &'static str {
        match self {
            GestureClass::IndexFinger => "Index Finger",
            GestureClass::OkSign => "OK Sign",
            _ => "Unknown",
        }
    }
}

/// Black-box gesture model: frame in, gesture class out (None when no hand).
pub trait GestureClassifier: Send {
    fn classify(&mut self, frame: &Frame) -> Result<Option<GestureClass>>;
}

/// Scripted gesture classifier for tests.
#[derive(Default)]
pub struct StubGestureClassifier {
    script: std::collections::VecDeque<Option<GestureClass>>,
}

impl StubGestureClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, gesture: Option<GestureClass>) {
        self.script.push_back(gesture);
    }
}

impl GestureClassifier for StubGestureClassifier {
    fn classify(&mut self, _frame: &Frame) -> Result<Option<GestureClass>> {
        Ok(self.script.pop_front().flatten())
    }
}

// -------------------- Adapter --------------------

/// Pose hazard adapter: fuses the sustained-posture state machine and the
/// optional gesture classifier into the common detector contract.
///
/// While the state machine is triggered the detection carries a full-frame
/// border box; `reportable` is true on the trigger transition and on any
/// unsafe-gesture frame (the dispatcher's debounce handles the rest).
pub struct PoseAlert {
    estimator: Box<dyn PoseEstimator>,
    classifier: Option<Box<dyn GestureClassifier>>,
    machine: EmergencyStateMachine,
    enabled: bool,
    last_gesture: Option<GestureClass>,
}

impl PoseAlert {
    pub fn new(estimator: Box<dyn PoseEstimator>, enabled: bool) -> Self {
        Self {
            estimator,
            classifier: None,
            machine: EmergencyStateMachine::new(DEFAULT_HOLD),
            enabled,
            last_gesture: None,
        }
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.machine = EmergencyStateMachine::new(hold);
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn GestureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Gesture classified on the most recent frame, for the overlay label.
    pub fn last_gesture(&self) -> Option<GestureClass> {
        self.last_gesture
    }

    /// Whether the emergency posture is currently triggered.
    pub fn emergency_active(&self) -> bool {
        self.machine.triggered()
    }

    fn process_at(&mut self, frame: &Frame, now: Instant) -> Result<Detection> {
        if !self.enabled {
            return Ok(Detection::none());
        }

        let landmarks = self.estimator.estimate(frame)?;
        let just_triggered = self.machine.update(landmarks.as_ref(), now);

        self.last_gesture = match self.classifier.as_mut() {
            Some(classifier) => classifier.classify(frame)?,
            None => None,
        };
        let unsafe_gesture = self.last_gesture.map_or(false, |g| g.is_unsafe());

        let active = self.machine.triggered();
        let boxes = if active {
            // Full-frame border, inset like the legacy renderer.
            vec![BBox::clamped(
                10,
                10,
                frame.width() as i32 - 10,
                frame.height() as i32 - 10,
                frame.width(),
                frame.height(),
            )]
        } else {
            Vec::new()
        };

        Ok(Detection {
            fired: active,
            boxes,
            reportable: just_triggered || unsafe_gesture,
        })
    }
}

impl HazardDetector for PoseAlert {
    fn kind(&self) -> HazardKind {
        HazardKind::Pose
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

    fn raised() -> PoseLandmarks {
        PoseLandmarks {
            left_wrist_y: 0.2,
            right_wrist_y: 0.25,
            left_shoulder_y: 0.5,
            right_shoulder_y: 0.5,
        }
    }

    fn lowered() -> PoseLandmarks {
        PoseLandmarks {
            left_wrist_y: 0.8,
            right_wrist_y: 0.8,
            left_shoulder_y: 0.5,
            right_shoulder_y: 0.5,
        }
    }

    #[test]
    fn posture_broken_before_hold_never_triggers() {
        let mut machine = EmergencyStateMachine::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(!machine.update(Some(&raised()), t0));
        assert!(!machine.update(Some(&raised()), t0 + Duration::from_millis(4900)));
        // Broken at 4.9s: back to idle, no trigger ever.
        assert!(!machine.update(Some(&lowered()), t0 + Duration::from_millis(4950)));
        assert_eq!(machine.state(), PoseState::Idle);
    }

    #[test]
    fn sustained_posture_triggers_exactly_once() {
        let mut machine = EmergencyStateMachine::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(!machine.update(Some(&raised()), t0));
        assert!(machine.update(Some(&raised()), t0 + Duration::from_millis(5100)));
        // Still held: no second trigger.
        assert!(!machine.update(Some(&raised()), t0 + Duration::from_millis(6000)));
        assert!(machine.triggered());
    }

    #[test]
    fn retrigger_requires_idle_interval() {
        let mut machine = EmergencyStateMachine::new(Duration::from_secs(5));
        let t0 = Instant::now();

        machine.update(Some(&raised()), t0);
        assert!(machine.update(Some(&raised()), t0 + Duration::from_secs(6)));

        // Break, then re-establish from scratch.
        assert!(!machine.update(Some(&lowered()), t0 + Duration::from_secs(7)));
        assert!(!machine.update(Some(&raised()), t0 + Duration::from_secs(8)));
        assert!(machine.update(Some(&raised()), t0 + Duration::from_secs(14)));
    }

    #[test]
    fn missing_landmarks_reset_the_machine() {
        let mut machine = EmergencyStateMachine::new(Duration::from_secs(5));
        let t0 = Instant::now();

        machine.update(Some(&raised()), t0);
        assert!(!machine.update(None, t0 + Duration::from_secs(3)));
        assert_eq!(machine.state(), PoseState::Idle);
    }

    #[test]
    fn unsafe_gesture_mapping() {
        assert!(GestureClass::IndexFinger.is_unsafe());
        assert!(!GestureClass::OkSign.is_unsafe());
        assert!(!GestureClass::Palm.is_unsafe());
    }

    #[test]
    fn only_meaningful_gestures_get_a_label() {
        assert_eq!(GestureClass::IndexFinger.display_name(), "Index Finger");
        assert_eq!(GestureClass::OkSign.display_name(), "OK Sign");
        for other in [
            GestureClass::Palm,
            GestureClass::LSign,
            GestureClass::Fist,
            GestureClass::FistMoved,
            GestureClass::ThumbsUp,
            GestureClass::PalmMoved,
            GestureClass::CShape,
            GestureClass::ThumbsDown,
        ] {
            assert_eq!(other.display_name(), "Unknown");
        }
    }

    #[test]
    fn pose_alert_reports_on_trigger_and_draws_full_frame_border() {
        let mut estimator = StubPoseEstimator::new();
        estimator.push(Some(raised()));
        estimator.push(Some(raised()));
        let mut alert =
            PoseAlert::new(Box::new(estimator), true).with_hold(Duration::from_secs(5));
        let frame = Frame::solid(1000, 500, [0, 0, 0]);
        let t0 = Instant::now();

        let first = alert.process_at(&frame, t0).unwrap();
        assert!(!first.reportable);
        assert!(first.boxes.is_empty());

        let second = alert
            .process_at(&frame, t0 + Duration::from_millis(5100))
            .unwrap();
        assert!(second.reportable);
        assert_eq!(second.boxes.len(), 1);
        assert_eq!(second.boxes[0], BBox::clamped(10, 10, 990, 490, 1000, 500));
        assert!(alert.emergency_active());
    }

    #[test]
    fn unsafe_gesture_is_reportable_without_posture() {
        let mut estimator = StubPoseEstimator::new();
        estimator.push(None);
        let mut classifier = StubGestureClassifier::new();
        classifier.push(Some(GestureClass::IndexFinger));

        let mut alert = PoseAlert::new(Box::new(estimator), true)
            .with_classifier(Box::new(classifier));
        let frame = Frame::solid(1000, 500, [0, 0, 0]);

        let result = alert.process_at(&frame, Instant::now()).unwrap();
        assert!(result.reportable);
        assert!(!result.fired);
        assert_eq!(alert.last_gesture(), Some(GestureClass::IndexFinger));
    }
}
